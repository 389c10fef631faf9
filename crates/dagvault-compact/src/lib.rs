// SPDX-License-Identifier: Apache-2.0
//! Patch-chain compaction engine for DagVault (spec §4.7).
//!
//! Compaction squashes a long patch chain into a single new `dag_version`
//! base. It never deletes the old chain, never moves a tag, and never
//! takes a `TagRegistry` — `compact` and `migrate_tag` are kept as two
//! structurally disjoint operations so the "never move a tag
//! automatically" invariant is enforced by the type signature, not by a
//! comment.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use bytes::Bytes;
use dagvault_cas::BlobStore;
use dagvault_catalog::{Artifact, ArtifactCatalog, ArtifactKind};
use dagvault_core::Id;
use dagvault_materialize::{self as materialize, PatchMember};
use dagvault_tags::{NewTarget, TagKey, TagRegistry, TargetKind};

/// Outcome of [`CompactionEngine::compact`].
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// The new `dag_version` artifact id produced by squashing the chain.
    pub new_base_id: Id,
    /// Chain depth before compaction.
    pub old_depth: i32,
    /// The new base's content hash.
    pub new_cas_id: dagvault_cas::CasId,
}

/// Aggregate statistics over all patch sets at or beyond a depth threshold
/// (spec §4.7's `GetCompactionStats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Number of `patch_set` artifacts with `depth >= threshold`.
    pub candidate_count: usize,
    /// Sum of those artifacts' depths.
    pub total_depth: i64,
    /// Estimated row savings from compacting every candidate,
    /// `Σ n(n+1)/2 − 1` over each candidate's depth `n`.
    pub estimated_row_savings: i64,
    /// The single deepest candidate, if any.
    pub longest_chain: Option<(Id, i32)>,
}

/// Pure decision function: should a chain of depth `depth` be compacted?
/// Any of the three conditions is sufficient. `cache_hit_rate` is the
/// observed hit rate of lookups keyed on this chain's (eventual) plan
/// hash; `operator_requested` is an explicit manual trigger.
#[must_use]
pub fn should_compact(
    depth: i32,
    cache_hit_rate: f64,
    cache_hit_rate_threshold: f64,
    operator_requested: bool,
    depth_threshold: i32,
) -> bool {
    depth >= depth_threshold || cache_hit_rate >= cache_hit_rate_threshold || operator_requested
}

/// Squashes patch chains and migrates tags onto their compacted bases.
pub struct CompactionEngine {
    catalog: Arc<dyn ArtifactCatalog>,
    blobs: Arc<dyn BlobStore>,
}

impl CompactionEngine {
    /// Construct a compaction engine over a catalog and blob store.
    #[must_use]
    pub fn new(catalog: Arc<dyn ArtifactCatalog>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { catalog, blobs }
    }

    /// Squash the chain headed by `patch_head_id` into a new `dag_version`
    /// base. Does not touch any tag.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Integrity`] if `patch_head_id` does
    /// not name a `patch_set` artifact with `depth > 0`, or propagates
    /// catalog/blob-store/materializer errors.
    pub async fn compact(&self, patch_head_id: Id) -> Result<CompactionResult, dagvault_core::Error> {
        let head = self.catalog.get_by_id(patch_head_id).await?;
        let ArtifactKind::PatchSet {
            base_version,
            depth,
            ..
        } = head.kind
        else {
            return Err(dagvault_core::Error::Integrity {
                message: format!("{patch_head_id} is not a patch_set artifact"),
            });
        };
        if depth <= 0 {
            return Err(dagvault_core::Error::Integrity {
                message: format!("{patch_head_id} has non-positive depth {depth}"),
            });
        }

        let base = self.catalog.get_by_id(base_version).await?;
        let chain = self.catalog.get_patch_chain(patch_head_id).await?;

        let mut cas_ids = vec![base.cas_id];
        cas_ids.extend(chain.iter().map(|a| a.cas_id));
        let blobs = self.blobs.get_many(&cas_ids).await?;

        let base_blob = blobs
            .get(&base.cas_id)
            .ok_or_else(|| dagvault_core::Error::blob_not_found(base.cas_id.to_string()))?;
        let base_bytes = base_blob
            .content
            .clone()
            .ok_or_else(|| dagvault_core::Error::blob_not_found(base.cas_id.to_string()))?;

        let mut owned: Vec<(Id, Vec<u8>)> = Vec::with_capacity(chain.len());
        for artifact in &chain {
            let blob = blobs
                .get(&artifact.cas_id)
                .ok_or_else(|| dagvault_core::Error::blob_not_found(artifact.cas_id.to_string()))?;
            let bytes = blob
                .content
                .clone()
                .ok_or_else(|| dagvault_core::Error::blob_not_found(artifact.cas_id.to_string()))?;
            owned.push((artifact.id, bytes.to_vec()));
        }
        let members: Vec<PatchMember<'_>> =
            owned.iter().map(|(id, bytes)| (*id, bytes.as_slice())).collect();

        let materialized = materialize::materialize(base.id, &base_bytes, &members)?;

        let new_cas_id = self
            .blobs
            .put("application/json", Bytes::from(materialized.canonical_bytes))
            .await?;

        let new_id = Id::new();
        let (node_count, edge_count) = count_nodes_and_edges(&materialized.value);
        self.catalog
            .create(Artifact {
                id: new_id,
                kind: ArtifactKind::DagVersion {
                    version_hash: Some(materialized.version_hash),
                    node_count: Some(node_count),
                    edge_count: Some(edge_count),
                    compacted_from_id: Some(patch_head_id),
                },
                cas_id: new_cas_id,
                created_by: "compaction-engine".to_string(),
                created_at: chrono::Utc::now(),
                metadata: serde_json::json!({
                    "original_depth": depth,
                    "original_patch_count": chain.len(),
                }),
            })
            .await?;

        tracing::info!(
            patch_head_id = %patch_head_id,
            new_base_id = %new_id,
            old_depth = depth,
            "compacted patch chain"
        );

        Ok(CompactionResult {
            new_base_id: new_id,
            old_depth: depth,
            new_cas_id,
        })
    }

    /// List candidate chains with `depth >= threshold` and summarize the
    /// savings compacting all of them would realize.
    ///
    /// # Errors
    ///
    /// Propagates catalog errors.
    pub async fn get_compaction_stats(
        &self,
        threshold: i32,
    ) -> Result<CompactionStats, dagvault_core::Error> {
        let candidates = self.catalog.get_compaction_candidates(threshold).await?;

        let mut total_depth: i64 = 0;
        let mut estimated_row_savings: i64 = 0;
        let mut longest_chain: Option<(Id, i32)> = None;

        for artifact in &candidates {
            let ArtifactKind::PatchSet { depth, .. } = artifact.kind else {
                continue;
            };
            let n = i64::from(depth);
            total_depth += n;
            estimated_row_savings += n * (n + 1) / 2 - 1;
            if longest_chain.is_none_or(|(_, best)| depth > best) {
                longest_chain = Some((artifact.id, depth));
            }
        }

        Ok(CompactionStats {
            candidate_count: candidates.len(),
            total_depth,
            estimated_row_savings,
            longest_chain,
        })
    }

    /// Move `key` to point at `new_base_id`. Validates that `new_base_id`
    /// names an existing `dag_version` artifact before moving the tag —
    /// this is the only place a compacted base becomes visible to readers.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Integrity`] if `new_base_id` is not
    /// a `dag_version` artifact, or propagates catalog/tag-registry errors.
    pub async fn migrate_tag(
        &self,
        tags: &dyn TagRegistry,
        key: &TagKey,
        new_base_id: Id,
        mover: &str,
    ) -> Result<dagvault_tags::Tag, dagvault_core::Error> {
        let artifact = self.catalog.get_by_id(new_base_id).await?;
        let ArtifactKind::DagVersion { version_hash, .. } = artifact.kind else {
            return Err(dagvault_core::Error::Integrity {
                message: format!("{new_base_id} is not a dag_version artifact"),
            });
        };

        let tag = tags
            .r#move(
                key,
                NewTarget {
                    kind: TargetKind::DagVersion,
                    id: new_base_id,
                    hash: version_hash,
                },
                mover,
            )
            .await?;

        tracing::info!(
            username = %key.username,
            tag_name = %key.tag_name,
            new_base_id = %new_base_id,
            "tag migrated onto compacted base"
        );
        Ok(tag)
    }
}

fn count_nodes_and_edges(workflow: &serde_json::Value) -> (i32, i32) {
    let node_count = workflow
        .get("nodes")
        .and_then(serde_json::Value::as_array)
        .map_or(0, |a| i32::try_from(a.len()).unwrap_or(i32::MAX));
    let edge_count = workflow
        .get("edges")
        .and_then(serde_json::Value::as_array)
        .map_or(0, |a| i32::try_from(a.len()).unwrap_or(i32::MAX));
    (node_count, edge_count)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dagvault_catalog::MemoryArtifactCatalog;
    use dagvault_cas::MemoryBlobStore;
    use dagvault_patchchain::{CatalogPatchChainIndex, ChainParent, PatchChainIndex};
    use dagvault_tags::MemoryTagRegistry;

    fn engine() -> (CompactionEngine, Arc<dyn ArtifactCatalog>, Arc<dyn BlobStore>) {
        let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::default());
        (CompactionEngine::new(catalog.clone(), blobs.clone()), catalog, blobs)
    }

    async fn seed_chain(
        catalog: &Arc<dyn ArtifactCatalog>,
        blobs: &Arc<dyn BlobStore>,
        depth: usize,
    ) -> Id {
        let base_json = serde_json::json!({"nodes": [], "edges": []});
        let base_cas = blobs
            .put("application/json", Bytes::from(serde_json::to_vec(&base_json).unwrap()))
            .await
            .unwrap();
        let base_id = Id::new();
        catalog
            .create(Artifact {
                id: base_id,
                kind: ArtifactKind::DagVersion {
                    version_hash: Some(format!("sha256:{base_id}")),
                    node_count: Some(0),
                    edge_count: Some(0),
                    compacted_from_id: None,
                },
                cas_id: base_cas,
                created_by: "alice".to_string(),
                created_at: chrono::Utc::now(),
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        let chain_index = CatalogPatchChainIndex::new(catalog.clone());
        let mut parent = ChainParent::DagVersion;
        let mut head_id = base_id;
        for i in 0..depth {
            let ops = serde_json::json!([{"op": "add", "path": "/nodes/-", "value": i}]);
            let cas = blobs
                .put("application/json-patch+json", Bytes::from(serde_json::to_vec(&ops).unwrap()))
                .await
                .unwrap();
            let patch_id = Id::new();
            let d = i32::try_from(i + 1).unwrap();
            catalog
                .create(Artifact {
                    id: patch_id,
                    kind: ArtifactKind::PatchSet {
                        base_version: base_id,
                        depth: d,
                        op_count: 1,
                    },
                    cas_id: cas,
                    created_by: "alice".to_string(),
                    created_at: chrono::Utc::now(),
                    metadata: serde_json::json!({}),
                })
                .await
                .unwrap();
            chain_index.copy_and_append(parent, patch_id).await.unwrap();
            parent = ChainParent::PatchSet { id: patch_id, depth: d };
            head_id = patch_id;
        }
        head_id
    }

    #[tokio::test]
    async fn compact_squashes_chain_into_new_base() {
        let (engine, catalog, blobs) = engine();
        let head_id = seed_chain(&catalog, &blobs, 3).await;

        let result = engine.compact(head_id).await.unwrap();
        assert_eq!(result.old_depth, 3);

        let new_base = catalog.get_by_id(result.new_base_id).await.unwrap();
        match new_base.kind {
            ArtifactKind::DagVersion {
                compacted_from_id, ..
            } => assert_eq!(compacted_from_id, Some(head_id)),
            other => panic!("expected dag_version, got {other:?}"),
        }

        // Original chain remains readable.
        assert!(catalog.get_patch_chain(head_id).await.is_ok());
    }

    #[tokio::test]
    async fn compact_rejects_non_patch_set() {
        let (engine, catalog, blobs) = engine();
        let base_cas = blobs
            .put("application/json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let base_id = Id::new();
        catalog
            .create(Artifact {
                id: base_id,
                kind: ArtifactKind::DagVersion {
                    version_hash: Some("sha256:x".to_string()),
                    node_count: Some(0),
                    edge_count: Some(0),
                    compacted_from_id: None,
                },
                cas_id: base_cas,
                created_by: "alice".to_string(),
                created_at: chrono::Utc::now(),
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        let err = engine.compact(base_id).await.unwrap_err();
        assert!(matches!(err, dagvault_core::Error::Integrity { .. }));
    }

    #[tokio::test]
    async fn migrate_tag_moves_existing_tag_onto_compacted_base() {
        let (engine, catalog, blobs) = engine();
        let head_id = seed_chain(&catalog, &blobs, 2).await;
        let result = engine.compact(head_id).await.unwrap();

        let tags = MemoryTagRegistry::new();
        let key = TagKey::new(
            dagvault_core::Username::new("alice").unwrap(),
            dagvault_core::TagName::new("main").unwrap(),
        );
        tags.create(
            &key,
            NewTarget {
                kind: TargetKind::PatchSet,
                id: head_id,
                hash: None,
            },
            "alice",
        )
        .await
        .unwrap();

        let moved = engine
            .migrate_tag(&tags, &key, result.new_base_id, "alice")
            .await
            .unwrap();
        assert_eq!(moved.target_id, result.new_base_id);
        assert_eq!(moved.version, 2);
    }

    #[test]
    fn should_compact_triggers_on_any_condition() {
        assert!(should_compact(25, 0.0, 0.8, false, 20));
        assert!(should_compact(5, 0.9, 0.8, false, 20));
        assert!(should_compact(5, 0.0, 0.8, true, 20));
        assert!(!should_compact(5, 0.0, 0.8, false, 20));
    }

    #[tokio::test]
    async fn get_compaction_stats_sums_candidates() {
        let (engine, catalog, blobs) = engine();
        // seed_chain creates one patch_set artifact per depth 1..=n, so a
        // chain of length n contributes one candidate per depth that meets
        // the threshold, not just its head.
        seed_chain(&catalog, &blobs, 3).await;
        seed_chain(&catalog, &blobs, 5).await;

        let stats = engine.get_compaction_stats(3).await.unwrap();
        // chain of 3: depth 3 qualifies (1). chain of 5: depths 3,4,5 qualify (3).
        assert_eq!(stats.candidate_count, 4);
        assert_eq!(stats.total_depth, 3 + 3 + 4 + 5);
        // n=3: 5, n=3: 5, n=4: 9, n=5: 14 -> 33
        assert_eq!(stats.estimated_row_savings, 33);
        assert_eq!(stats.longest_chain.map(|(_, d)| d), Some(5));
    }
}
