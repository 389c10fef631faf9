// SPDX-License-Identifier: Apache-2.0
//! Immutable artifact catalog for DagVault.
//!
//! Artifacts are append-only metadata rows keyed by [`dagvault_core::Id`],
//! one of three kinds carried as enum-variant payload rather than a flat
//! struct with optional fields — the same preference the donor workspace
//! shows for `WarpOp`/delta-op enums over wide option-heavy structs.
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod memory;
mod postgres;

pub use memory::MemoryArtifactCatalog;
pub use postgres::PgArtifactCatalog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dagvault_core::Id;
use serde_json::Value;

/// Kind-specific fields of an [`Artifact`].
#[derive(Clone, Debug, PartialEq)]
pub enum ArtifactKind {
    /// A fully materialized workflow graph.
    DagVersion {
        /// Version hash, currently equal to the backing blob's `cas_id`.
        version_hash: Option<String>,
        /// Number of nodes in the materialized graph.
        node_count: Option<i32>,
        /// Number of edges in the materialized graph.
        edge_count: Option<i32>,
        /// The patch artifact whose chain was squashed to produce this
        /// base version, if this version resulted from compaction.
        compacted_from_id: Option<Id>,
    },
    /// An ordered JSON-Patch operation list applied on top of a base.
    PatchSet {
        /// The `dag_version` this patch set applies on top of.
        base_version: Id,
        /// Chain depth — position of this patch set in its own chain.
        depth: i32,
        /// Number of JSON-Patch operations this patch set carries.
        op_count: i32,
    },
    /// A frozen workflow tied to a submitted run.
    RunSnapshot {
        /// Hash of the run's execution plan, for caching.
        plan_hash: String,
        /// Version hash of the frozen graph.
        version_hash: Option<String>,
        /// Number of nodes in the frozen graph.
        node_count: Option<i32>,
        /// Number of edges in the frozen graph.
        edge_count: Option<i32>,
    },
}

impl ArtifactKind {
    /// The string discriminant stored in the `kind` column.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::DagVersion { .. } => "dag_version",
            Self::PatchSet { .. } => "patch_set",
            Self::RunSnapshot { .. } => "run_snapshot",
        }
    }
}

/// An immutable artifact row.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    /// Time-ordered identifier.
    pub id: Id,
    /// Kind-specific fields.
    pub kind: ArtifactKind,
    /// The blob this artifact's content lives in.
    pub cas_id: dagvault_cas::CasId,
    /// Identity that created this artifact.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Free-form metadata.
    pub metadata: Value,
}

/// The artifact catalog.
#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    /// Insert exactly one artifact row. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Validation`] if `artifact`'s
    /// kind-specific fields violate the shape invariants (e.g. a
    /// `patch_set` with `depth == 0`),
    /// [`dagvault_core::Error::VersionHashCollision`] if `artifact` is a
    /// `dag_version` whose `version_hash` already belongs to a different
    /// row (the caller should re-fetch and reuse that row), or
    /// [`dagvault_core::Error::Unavailable`] on a backing-store failure.
    async fn create(&self, artifact: Artifact) -> Result<Id, dagvault_core::Error>;

    /// Fetch an artifact by id.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no artifact has `id`.
    async fn get_by_id(&self, id: Id) -> Result<Artifact, dagvault_core::Error>;

    /// Fetch a `dag_version` or `run_snapshot` artifact by its version hash.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no artifact carries
    /// `version_hash`.
    async fn get_by_version_hash(&self, version_hash: &str) -> Result<Artifact, dagvault_core::Error>;

    /// Fetch a `run_snapshot` artifact by its plan hash, for run-admission
    /// caching.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no artifact carries
    /// `plan_hash`.
    async fn get_by_plan_hash(&self, plan_hash: &str) -> Result<Artifact, dagvault_core::Error>;

    /// List the most recent artifacts of a given kind, indexed by
    /// `(kind, created_at)`.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] on a backing-store
    /// failure.
    async fn list_by_kind(
        &self,
        kind: &str,
        limit: u32,
    ) -> Result<Vec<Artifact>, dagvault_core::Error>;

    /// Insert a patch-chain membership row set: `(head_id, seq, member_id)`
    /// for `seq` in `1..=members.len()`, in the order given. Transactional —
    /// fails entirely if any uniqueness constraint is violated.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Integrity`] if a uniqueness
    /// constraint on `(head_id, seq)` or `(head_id, member_id)` is violated.
    async fn insert_patch_chain(
        &self,
        head_id: Id,
        members: &[Id],
    ) -> Result<(), dagvault_core::Error>;

    /// Fetch a patch chain's member artifacts, in application order.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if `head_id` has no chain.
    async fn get_patch_chain(&self, head_id: Id) -> Result<Vec<Artifact>, dagvault_core::Error>;

    /// Look up the `dag_version` produced by compacting `patch_id`'s chain,
    /// via the indexed `compacted_from_id` column — never a JSONB
    /// containment scan.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] on a backing-store
    /// failure. Returns `Ok(None)` if `patch_id` has not been compacted.
    async fn find_compacted_base(
        &self,
        patch_id: Id,
    ) -> Result<Option<Artifact>, dagvault_core::Error>;

    /// List `patch_set` artifacts with `depth >= threshold`, candidates for
    /// compaction.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] on a backing-store
    /// failure.
    async fn get_compaction_candidates(
        &self,
        threshold: i32,
    ) -> Result<Vec<Artifact>, dagvault_core::Error>;
}
