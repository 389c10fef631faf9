// SPDX-License-Identifier: Apache-2.0
//! The semantic error taxonomy shared by every DagVault crate.
//!
//! Each variant carries the structured context a caller needs to act on it
//! (which tag, which cas id, which seq) rather than a bare string — the same
//! discipline `warp-core`'s `HistoryError`/`EngineError` use. Handlers at the
//! edge (CLI, HTTP layer, worker) map these to transport-specific codes; the
//! core never encodes a transport concern here.

use crate::Id;
use thiserror::Error;

/// Errors returned by DagVault core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A tag, artifact, or blob did not exist.
    #[error("not found: {resource} {reference}")]
    NotFound {
        /// Kind of resource that was missing (`"tag"`, `"artifact"`, `"blob"`).
        resource: &'static str,
        /// Human-readable reference to the missing resource (id, cas id, or
        /// `username/tag_name`).
        reference: String,
    },

    /// A tag creation targeted a name that already exists.
    #[error("tag already exists: {username}/{tag_name}")]
    AlreadyExists {
        /// Owning username.
        username: String,
        /// Tag name within that username's namespace.
        tag_name: String,
    },

    /// A `dag_version` artifact insert collided with an existing row under
    /// the same `version_hash` — two concurrent callers raced to create
    /// the same content. The caller should re-fetch by `version_hash` and
    /// reuse the winner's artifact rather than treat this as a failure.
    #[error("version hash collision: {version_hash}")]
    VersionHashCollision {
        /// The version hash both the losing insert and the winning row share.
        version_hash: String,
    },

    /// Input failed validation (bad name, empty operation list, negative
    /// seq, reserved prefix, artifact-kind mismatch, ...).
    #[error("validation failed: {message}")]
    Validation {
        /// Description of what failed validation and why.
        message: String,
    },

    /// An optimistic compare-and-swap lost the race.
    #[error("conflict on {username}/{tag_name}: expected version {expected}, found {actual:?}")]
    Conflict {
        /// Owning username.
        username: String,
        /// Tag name within that username's namespace.
        tag_name: String,
        /// Version the caller expected.
        expected: i64,
        /// Version actually found, if the tag still exists.
        actual: Option<i64>,
    },

    /// Stored content's hash did not match its declared hash, or a patch
    /// chain failed its structural invariants.
    #[error("integrity violation: {message}")]
    Integrity {
        /// Description of the violated invariant.
        message: String,
    },

    /// Base document or a patch body was not valid JSON.
    #[error("malformed content in artifact {artifact_id}: {message}")]
    MalformedContent {
        /// The artifact whose content failed to parse.
        artifact_id: Id,
        /// Underlying parse error description.
        message: String,
    },

    /// A JSON-Patch operation could not be applied during materialization.
    #[error("patch apply failed at seq {seq} of artifact {artifact_id}: {cause}")]
    PatchApplyFailed {
        /// 1-based position of the failing operation within the chain.
        seq: i64,
        /// The patch artifact that failed to apply.
        artifact_id: Id,
        /// Description of why the operation could not be applied.
        cause: String,
    },

    /// The caller attempted to read or write a tag it does not own and that
    /// is not a global tag.
    #[error("unauthorized: {username} may not access {owner}/{tag_name}")]
    Unauthorized {
        /// Caller's username.
        username: String,
        /// Owner of the tag being accessed.
        owner: String,
        /// Tag name within the owner's namespace.
        tag_name: String,
    },

    /// A backing store or the run-request stream was unavailable.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Description of which dependency was unavailable.
        message: String,
    },
}

impl Error {
    /// Construct a [`Error::NotFound`] for a blob by cas id.
    #[must_use]
    pub fn blob_not_found(cas_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "blob",
            reference: cas_id.into(),
        }
    }

    /// Construct a [`Error::NotFound`] for an artifact by id.
    #[must_use]
    pub fn artifact_not_found(id: Id) -> Self {
        Self::NotFound {
            resource: "artifact",
            reference: id.to_string(),
        }
    }

    /// Construct a [`Error::NotFound`] for a tag by `(username, tag_name)`.
    #[must_use]
    pub fn tag_not_found(username: impl AsRef<str>, tag_name: impl AsRef<str>) -> Self {
        Self::NotFound {
            resource: "tag",
            reference: format!("{}/{}", username.as_ref(), tag_name.as_ref()),
        }
    }

    /// Construct a [`Error::NotFound`] for a run by id.
    #[must_use]
    pub fn run_not_found(id: Id) -> Self {
        Self::NotFound {
            resource: "run",
            reference: id.to_string(),
        }
    }
}
