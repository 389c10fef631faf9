// SPDX-License-Identifier: Apache-2.0
//! Wires the in-memory or Postgres-backed collaborators into the
//! service objects each subcommand drives.

use std::sync::Arc;

use dagvault_cas::{BlobStore, MemoryBlobStore, PgBlobStore};
use dagvault_catalog::{ArtifactCatalog, MemoryArtifactCatalog, PgArtifactCatalog};
use dagvault_compact::CompactionEngine;
use dagvault_patchchain::{CatalogPatchChainIndex, PatchChainIndex};
use dagvault_runs::{
    InMemoryEphemeralCache, LogRunEventPublisher, MemoryRunRepository, PgRunRepository,
    RunAdmission, RunRepository,
};
use dagvault_tags::{MemoryTagRegistry, PgTagRegistry, TagRegistry};
use dagvault_workflow::WorkflowService;

/// The collaborators and service objects every subcommand is built
/// against, selected once at startup by `--store`.
pub struct Engine {
    pub catalog: Arc<dyn ArtifactCatalog>,
    pub blobs: Arc<dyn BlobStore>,
    pub tags: Arc<dyn TagRegistry>,
    pub chain: Arc<dyn PatchChainIndex>,
    pub workflow: WorkflowService,
    pub compaction: CompactionEngine,
    pub runs: RunAdmission,
}

impl Engine {
    /// Build an engine over fresh, empty in-memory stores. Useful for
    /// scripted smoke tests within a single invocation (e.g. piping a
    /// `create` straight into a `get` in the same shell pipeline is not
    /// possible across process boundaries) but does not persist anything
    /// once the process exits — point `--store postgres` at a real
    /// database for anything that needs to survive the CLI call.
    #[must_use]
    pub fn in_memory() -> Self {
        let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let tags: Arc<dyn TagRegistry> = Arc::new(MemoryTagRegistry::new());
        let runs: Arc<dyn RunRepository> = Arc::new(MemoryRunRepository::new());
        Self::build(catalog, blobs, tags, runs)
    }

    /// Build an engine over a live Postgres connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn postgres(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = dagvault_store::connect(database_url, max_connections).await?;
        let catalog: Arc<dyn ArtifactCatalog> = Arc::new(PgArtifactCatalog::new(db.clone()));
        let blobs: Arc<dyn BlobStore> = Arc::new(PgBlobStore::new(db.clone()));
        let tags: Arc<dyn TagRegistry> = Arc::new(PgTagRegistry::new(db.clone()));
        let runs: Arc<dyn RunRepository> = Arc::new(PgRunRepository::new(db));
        Ok(Self::build(catalog, blobs, tags, runs))
    }

    fn build(
        catalog: Arc<dyn ArtifactCatalog>,
        blobs: Arc<dyn BlobStore>,
        tags: Arc<dyn TagRegistry>,
        runs: Arc<dyn RunRepository>,
    ) -> Self {
        let chain: Arc<dyn PatchChainIndex> =
            Arc::new(CatalogPatchChainIndex::new(catalog.clone()));
        let workflow = WorkflowService::new(
            catalog.clone(),
            blobs.clone(),
            tags.clone(),
            chain.clone(),
        );
        let compaction = CompactionEngine::new(catalog.clone(), blobs.clone());
        let runs = RunAdmission::new(
            catalog.clone(),
            blobs.clone(),
            Arc::new(LogRunEventPublisher),
            Arc::new(InMemoryEphemeralCache::new()),
            runs,
        );
        Self {
            catalog,
            blobs,
            tags,
            chain,
            workflow,
            compaction,
            runs,
        }
    }
}
