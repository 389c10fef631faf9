// SPDX-License-Identifier: Apache-2.0
//! JSON-Patch folding engine for DagVault (spec §4.5).
//!
//! Wraps the `json-patch` crate (RFC 6902) rather than hand-rolling a patch
//! applier. Patches are applied strictly in order; the first failing
//! operation stops materialization and reports the 1-based seq it occurred
//! at. Canonicalization for hashing is delegated to
//! [`dagvault_core::canonical_json_bytes`]/[`dagvault_core::version_hash`].

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use dagvault_core::{canonical_json_bytes, version_hash, Id};
use serde_json::Value;

/// The result of folding a base document and an ordered patch list.
#[derive(Debug, Clone)]
pub struct MaterializedDocument {
    /// The materialized value.
    pub value: Value,
    /// Canonical JSON bytes of `value`, suitable for hashing and storage.
    pub canonical_bytes: Vec<u8>,
    /// `"sha256:" + hex(SHA-256(canonical_bytes))`.
    pub version_hash: String,
}

impl MaterializedDocument {
    fn from_value(value: Value) -> Self {
        let canonical_bytes = canonical_json_bytes(&value);
        let hash = version_hash(&value);
        Self {
            value,
            canonical_bytes,
            version_hash: hash,
        }
    }
}

/// Parse `bytes` as a JSON document, the base of a materialization chain.
///
/// # Errors
///
/// Returns [`dagvault_core::Error::MalformedContent`] if `bytes` is not
/// valid JSON.
pub fn parse_base(artifact_id: Id, bytes: &[u8]) -> Result<Value, dagvault_core::Error> {
    serde_json::from_slice(bytes).map_err(|e| dagvault_core::Error::MalformedContent {
        artifact_id,
        message: format!("base document is not valid JSON: {e}"),
    })
}

/// Apply one RFC 6902 patch body (`patch_bytes`) at chain position `seq`
/// (1-based) to `doc` in place.
///
/// # Errors
///
/// Returns [`dagvault_core::Error::MalformedContent`] if `patch_bytes` is
/// not a valid JSON-Patch document, or
/// [`dagvault_core::Error::PatchApplyFailed`] if every operation parses but
/// one fails to apply (missing path, failed `test`, type mismatch, ...).
pub fn apply_one(
    doc: &mut Value,
    seq: i64,
    patch_artifact_id: Id,
    patch_bytes: &[u8],
) -> Result<(), dagvault_core::Error> {
    let patch: json_patch::Patch =
        serde_json::from_slice(patch_bytes).map_err(|e| dagvault_core::Error::MalformedContent {
            artifact_id: patch_artifact_id,
            message: format!("patch body is not valid JSON-Patch: {e}"),
        })?;

    json_patch::patch(doc, &patch).map_err(|e| dagvault_core::Error::PatchApplyFailed {
        seq,
        artifact_id: patch_artifact_id,
        cause: e.to_string(),
    })
}

/// One member of a patch chain to be folded in order: its artifact id (for
/// error reporting) and its serialized RFC 6902 operation list.
pub type PatchMember<'a> = (Id, &'a [u8]);

/// Fold `base` forward through `patches`, in order, never skipping a
/// failing operation and never reordering.
///
/// # Errors
///
/// Returns [`dagvault_core::Error::PatchApplyFailed`] or
/// [`dagvault_core::Error::MalformedContent`] from the first patch in the
/// list that fails to parse or apply; no later patches are attempted.
pub fn fold(mut base: Value, patches: &[PatchMember<'_>]) -> Result<Value, dagvault_core::Error> {
    for (i, (artifact_id, bytes)) in patches.iter().enumerate() {
        let seq = i64::try_from(i + 1).unwrap_or(i64::MAX);
        apply_one(&mut base, seq, *artifact_id, bytes)?;
    }
    Ok(base)
}

/// Materialize a full chain: parse the base, fold every patch in order, and
/// canonicalize the result.
///
/// # Errors
///
/// Propagates [`parse_base`] and [`fold`] errors.
pub fn materialize(
    base_artifact_id: Id,
    base_bytes: &[u8],
    patches: &[PatchMember<'_>],
) -> Result<MaterializedDocument, dagvault_core::Error> {
    let base = parse_base(base_artifact_id, base_bytes)?;
    let folded = fold(base, patches)?;
    Ok(MaterializedDocument::from_value(folded))
}

/// Materialize the prefix of a chain up to and including `seq` (1-based).
/// `seq = 0` returns the base version unmodified, matching
/// `GetWorkflowAtVersion` (spec §4.6). `seq` outside `[0, patches.len()]`
/// is rejected.
///
/// # Errors
///
/// Returns [`dagvault_core::Error::Validation`] if `seq` is negative or
/// exceeds the chain depth; otherwise propagates [`materialize`]'s errors.
pub fn materialize_at_seq(
    base_artifact_id: Id,
    base_bytes: &[u8],
    patches: &[PatchMember<'_>],
    seq: i64,
) -> Result<MaterializedDocument, dagvault_core::Error> {
    let depth = i64::try_from(patches.len()).unwrap_or(i64::MAX);
    if seq < 0 || seq > depth {
        return Err(dagvault_core::Error::Validation {
            message: format!("seq {seq} is out of range [0, {depth}]"),
        });
    }
    let prefix = &patches[..usize::try_from(seq).unwrap_or(usize::MAX)];
    materialize(base_artifact_id, base_bytes, prefix)
}
