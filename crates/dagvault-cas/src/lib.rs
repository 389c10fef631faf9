// SPDX-License-Identifier: Apache-2.0
//! Content-addressed blob store for DagVault.
//!
//! `dagvault-cas` provides an async [`BlobStore`] trait for content-addressed
//! storage keyed by SHA-256 hash. Hashing is content-only: `SHA-256(bytes)`
//! with no domain prefix. Two blobs with identical bytes are the same CAS
//! blob regardless of the artifact that references them — deduplication is
//! the point.
//!
//! # Absence Semantics
//!
//! [`BlobStore::get`] returns `None` for a missing id — that is not an
//! error. [`BlobStore::get_many`] extends this: ids absent from the backing
//! store are simply absent from the returned map, logged once at `warn`
//! with a count, never surfaced as an error. CAS is a lookup table.
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod memory;
mod postgres;

pub use memory::MemoryBlobStore;
pub use postgres::PgBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A SHA-256 content hash, rendered as `"sha256:" + hex`.
///
/// Thin newtype over `[u8; 32]` following the `NodeId`/`BlobHash` pattern
/// used throughout the donor workspace. The inner bytes are public for
/// zero-cost access; `Display` renders the lowercase-hex form used as the
/// primary key in the `cas_blob` table.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CasId(pub [u8; 32]);

impl CasId {
    /// View the hash as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", hex::encode(self.0))
    }
}

/// Error parsing a [`CasId`] from its string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CasIdParseError {
    /// The string did not begin with the `sha256:` prefix.
    #[error("cas id missing sha256: prefix: {0:?}")]
    MissingPrefix(String),
    /// The hex payload after the prefix did not decode to 32 bytes.
    #[error("cas id hex payload is not 32 bytes: {0:?}")]
    BadHex(String),
}

impl FromStr for CasId {
    type Err = CasIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("sha256:")
            .ok_or_else(|| CasIdParseError::MissingPrefix(s.to_string()))?;
        let bytes =
            hex::decode(hex_part).map_err(|_| CasIdParseError::BadHex(s.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CasIdParseError::BadHex(s.to_string()))?;
        Ok(Self(array))
    }
}

/// Compute the SHA-256 content hash of `bytes`. No domain prefix — the
/// content is the identity.
#[must_use]
pub fn hash(bytes: &[u8]) -> CasId {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    CasId(out)
}

/// A content-addressed blob, with an optional pointer to externally-hosted
/// bytes in place of an inline body.
///
/// `content` is `None` only when `external_url` is set. spec.md mentions an
/// optional external URL field on the blob record without describing the
/// flow that populates it; here it models a pointer row with no inline
/// bytes — useful for oversized snapshots a caller has already pushed to
/// object storage before registering the row. Pushing the bytes there is
/// out of scope for this store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    /// Content hash, also the primary key under which the blob is stored.
    pub cas_id: CasId,
    /// MIME-ish media type the caller declared when storing this blob.
    pub media_type: String,
    /// Size in bytes of the content this hash addresses.
    pub size: u64,
    /// Inline bytes, when stored directly rather than by external reference.
    pub content: Option<Bytes>,
    /// Pointer to externally-hosted bytes, when `content` is `None`.
    pub external_url: Option<String>,
}

/// Recompute the hash of `blob.content` and compare it against `blob.cas_id`,
/// the `Integrity` check every [`BlobStore::get`] implementation must run
/// before returning a blob. Blobs with no inline content (`external_url`
/// set instead) have nothing to rehash and pass trivially.
///
/// # Errors
///
/// Returns [`dagvault_core::Error::Integrity`] if the stored bytes no
/// longer hash to `blob.cas_id`.
pub fn verify_integrity(blob: &Blob) -> Result<(), dagvault_core::Error> {
    let Some(content) = blob.content.as_ref() else {
        return Ok(());
    };
    let actual = hash(content);
    if actual != blob.cas_id {
        return Err(dagvault_core::Error::Integrity {
            message: format!(
                "blob {} rehashes to {actual} — stored content does not match its cas id",
                blob.cas_id
            ),
        });
    }
    Ok(())
}

/// Content-addressed blob store.
///
/// Implementations store opaque byte blobs keyed by their SHA-256 hash.
/// `put` is idempotent: storing the same bytes twice is a no-op the second
/// time and returns the same [`CasId`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Compute the hash of `bytes`, store the blob under `media_type`, and
    /// return the resulting [`CasId`]. Idempotent — re-putting identical
    /// bytes is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] if the backing store
    /// could not be reached.
    async fn put(&self, media_type: &str, bytes: Bytes) -> Result<CasId, dagvault_core::Error>;

    /// Retrieve a blob by its content hash.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no blob is stored under
    /// `cas_id`, or [`dagvault_core::Error::Integrity`] if the stored bytes
    /// no longer match `cas_id`.
    async fn get(&self, cas_id: CasId) -> Result<Blob, dagvault_core::Error>;

    /// Retrieve many blobs in a single round trip. Ids absent from the
    /// backing store are simply absent from the returned map — this never
    /// errors for misses, only logs a `tracing::warn!` with the count.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] if the backing store
    /// could not be reached at all.
    async fn get_many(
        &self,
        cas_ids: &[CasId],
    ) -> Result<HashMap<CasId, Blob>, dagvault_core::Error>;

    /// Check existence without retrieving the blob body.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] if the backing store
    /// could not be reached.
    async fn exists(&self, cas_id: CasId) -> Result<bool, dagvault_core::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_sha256_prefixed_hex() {
        let id = hash(b"hello");
        let text = id.to_string();
        assert!(text.starts_with("sha256:"));
        assert_eq!(text.len(), "sha256:".len() + 64);
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = hash(b"round trip me");
        let text = id.to_string();
        let parsed: CasId = text.parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_missing_prefix() {
        let err = "deadbeef".parse::<CasId>().unwrap_err();
        assert!(matches!(err, CasIdParseError::MissingPrefix(_)));
    }

    #[test]
    fn parse_rejects_bad_hex_length() {
        let err = "sha256:deadbeef".parse::<CasId>().unwrap_err();
        assert!(matches!(err, CasIdParseError::BadHex(_)));
    }

    #[test]
    fn hash_is_deterministic_and_content_only() {
        assert_eq!(hash(b"same bytes"), hash(b"same bytes"));
        assert_ne!(hash(b"these bytes"), hash(b"those bytes"));
    }
}
