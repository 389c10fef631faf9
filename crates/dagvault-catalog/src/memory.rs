// SPDX-License-Identifier: Apache-2.0
//! In-memory [`ArtifactCatalog`], for tests and for embedding.
// A poisoned lock means a prior writer panicked mid-mutation; there is no
// sane recovery short of process restart, so these propagate via panic.
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use dagvault_core::Id;

use crate::{Artifact, ArtifactCatalog, ArtifactKind};

#[derive(Default)]
struct State {
    by_id: HashMap<Id, Artifact>,
    by_version_hash: HashMap<String, Id>,
    by_plan_hash: HashMap<String, Id>,
    chains: HashMap<Id, Vec<Id>>,
    compacted_from: HashMap<Id, Id>,
}

/// In-memory [`ArtifactCatalog`] backed by a handful of `HashMap`s behind a
/// single `RwLock`.
#[derive(Default)]
pub struct MemoryArtifactCatalog {
    state: RwLock<State>,
}

impl MemoryArtifactCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn validate_shape(artifact: &Artifact) -> Result<(), dagvault_core::Error> {
    match &artifact.kind {
        ArtifactKind::PatchSet {
            depth, op_count, ..
        } => {
            if *depth < 1 || *op_count < 1 {
                return Err(dagvault_core::Error::Validation {
                    message: "patch_set requires depth >= 1 and op_count >= 1".to_string(),
                });
            }
        }
        ArtifactKind::DagVersion {
            compacted_from_id, ..
        } => {
            if *compacted_from_id == Some(artifact.id) {
                return Err(dagvault_core::Error::Validation {
                    message: "artifact may not reference itself".to_string(),
                });
            }
        }
        ArtifactKind::RunSnapshot { .. } => {}
    }
    Ok(())
}

#[async_trait]
impl ArtifactCatalog for MemoryArtifactCatalog {
    async fn create(&self, artifact: Artifact) -> Result<Id, dagvault_core::Error> {
        validate_shape(&artifact)?;
        let mut state = self.state.write().expect("lock poisoned");
        let id = artifact.id;

        match &artifact.kind {
            ArtifactKind::DagVersion {
                version_hash,
                compacted_from_id,
                ..
            } => {
                if let Some(hash) = version_hash {
                    if let Some(existing_id) = state.by_version_hash.get(hash) {
                        if *existing_id != id {
                            return Err(dagvault_core::Error::VersionHashCollision {
                                version_hash: hash.clone(),
                            });
                        }
                    }
                    state.by_version_hash.insert(hash.clone(), id);
                }
                if let Some(patch_id) = compacted_from_id {
                    state.compacted_from.insert(*patch_id, id);
                }
            }
            ArtifactKind::RunSnapshot {
                plan_hash,
                version_hash,
                ..
            } => {
                state.by_plan_hash.insert(plan_hash.clone(), id);
                if let Some(hash) = version_hash {
                    state.by_version_hash.insert(hash.clone(), id);
                }
            }
            ArtifactKind::PatchSet { .. } => {}
        }

        state.by_id.insert(id, artifact);
        Ok(id)
    }

    async fn get_by_id(&self, id: Id) -> Result<Artifact, dagvault_core::Error> {
        self.state
            .read()
            .expect("lock poisoned")
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| dagvault_core::Error::artifact_not_found(id))
    }

    async fn get_by_version_hash(
        &self,
        version_hash: &str,
    ) -> Result<Artifact, dagvault_core::Error> {
        let state = self.state.read().expect("lock poisoned");
        let id = state
            .by_version_hash
            .get(version_hash)
            .copied()
            .ok_or_else(|| dagvault_core::Error::NotFound {
                resource: "artifact",
                reference: version_hash.to_string(),
            })?;
        state
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| dagvault_core::Error::artifact_not_found(id))
    }

    async fn get_by_plan_hash(&self, plan_hash: &str) -> Result<Artifact, dagvault_core::Error> {
        let state = self.state.read().expect("lock poisoned");
        let id = state
            .by_plan_hash
            .get(plan_hash)
            .copied()
            .ok_or_else(|| dagvault_core::Error::NotFound {
                resource: "artifact",
                reference: plan_hash.to_string(),
            })?;
        state
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| dagvault_core::Error::artifact_not_found(id))
    }

    async fn list_by_kind(
        &self,
        kind: &str,
        limit: u32,
    ) -> Result<Vec<Artifact>, dagvault_core::Error> {
        let state = self.state.read().expect("lock poisoned");
        let mut matches: Vec<Artifact> = state
            .by_id
            .values()
            .filter(|a| a.kind.label() == kind)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn insert_patch_chain(
        &self,
        head_id: Id,
        members: &[Id],
    ) -> Result<(), dagvault_core::Error> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.chains.contains_key(&head_id) {
            return Err(dagvault_core::Error::Integrity {
                message: format!("patch chain for {head_id} already exists"),
            });
        }
        state.chains.insert(head_id, members.to_vec());
        Ok(())
    }

    async fn get_patch_chain(&self, head_id: Id) -> Result<Vec<Artifact>, dagvault_core::Error> {
        let state = self.state.read().expect("lock poisoned");
        let members = state
            .chains
            .get(&head_id)
            .ok_or_else(|| dagvault_core::Error::artifact_not_found(head_id))?;
        members
            .iter()
            .map(|id| {
                state
                    .by_id
                    .get(id)
                    .cloned()
                    .ok_or_else(|| dagvault_core::Error::artifact_not_found(*id))
            })
            .collect()
    }

    async fn find_compacted_base(
        &self,
        patch_id: Id,
    ) -> Result<Option<Artifact>, dagvault_core::Error> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .compacted_from
            .get(&patch_id)
            .and_then(|base_id| state.by_id.get(base_id))
            .cloned())
    }

    async fn get_compaction_candidates(
        &self,
        threshold: i32,
    ) -> Result<Vec<Artifact>, dagvault_core::Error> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .by_id
            .values()
            .filter(|a| matches!(&a.kind, ArtifactKind::PatchSet { depth, .. } if *depth >= threshold))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;
    use dagvault_cas::CasId;
    use serde_json::json;

    fn dag_version(id: Id, version_hash: &str) -> Artifact {
        Artifact {
            id,
            kind: ArtifactKind::DagVersion {
                version_hash: Some(version_hash.to_string()),
                node_count: Some(1),
                edge_count: Some(0),
                compacted_from_id: None,
            },
            cas_id: CasId([0u8; 32]),
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let catalog = MemoryArtifactCatalog::new();
        let id = Id::new();
        let artifact = dag_version(id, "sha256:abc");
        catalog.create(artifact.clone()).await.unwrap();
        let fetched = catalog.get_by_id(id).await.unwrap();
        assert_eq!(fetched, artifact);
    }

    #[tokio::test]
    async fn get_by_version_hash_finds_indexed_row() {
        let catalog = MemoryArtifactCatalog::new();
        let id = Id::new();
        catalog.create(dag_version(id, "sha256:xyz")).await.unwrap();
        let fetched = catalog.get_by_version_hash("sha256:xyz").await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn creating_a_second_dag_version_under_the_same_hash_collides() {
        let catalog = MemoryArtifactCatalog::new();
        catalog
            .create(dag_version(Id::new(), "sha256:dup"))
            .await
            .unwrap();

        let err = catalog
            .create(dag_version(Id::new(), "sha256:dup"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            dagvault_core::Error::VersionHashCollision { .. }
        ));
    }

    #[tokio::test]
    async fn recreating_with_the_same_id_and_hash_is_not_a_collision() {
        let catalog = MemoryArtifactCatalog::new();
        let id = Id::new();
        catalog.create(dag_version(id, "sha256:same")).await.unwrap();
        catalog.create(dag_version(id, "sha256:same")).await.unwrap();
    }

    #[tokio::test]
    async fn patch_set_depth_zero_is_rejected() {
        let catalog = MemoryArtifactCatalog::new();
        let base = Id::new();
        let artifact = Artifact {
            id: Id::new(),
            kind: ArtifactKind::PatchSet {
                base_version: base,
                depth: 0,
                op_count: 1,
            },
            cas_id: CasId([0u8; 32]),
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            metadata: json!({}),
        };
        let err = catalog.create(artifact).await.unwrap_err();
        assert!(matches!(err, dagvault_core::Error::Validation { .. }));
    }

    #[tokio::test]
    async fn patch_chain_insert_and_get_preserves_order() {
        let catalog = MemoryArtifactCatalog::new();
        let head = Id::new();
        let members = vec![Id::new(), Id::new(), head];
        for (i, member) in members.iter().enumerate() {
            let artifact = Artifact {
                id: *member,
                kind: ArtifactKind::PatchSet {
                    base_version: Id::new(),
                    depth: i as i32 + 1,
                    op_count: 1,
                },
                cas_id: CasId([0u8; 32]),
                created_by: "alice".to_string(),
                created_at: Utc::now(),
                metadata: json!({}),
            };
            catalog.create(artifact).await.unwrap();
        }
        catalog.insert_patch_chain(head, &members).await.unwrap();
        let chain = catalog.get_patch_chain(head).await.unwrap();
        let ids: Vec<Id> = chain.iter().map(|a| a.id).collect();
        assert_eq!(ids, members);
    }

    #[tokio::test]
    async fn find_compacted_base_via_indexed_field() {
        let catalog = MemoryArtifactCatalog::new();
        let patch_id = Id::new();
        let base_id = Id::new();
        let base = Artifact {
            id: base_id,
            kind: ArtifactKind::DagVersion {
                version_hash: Some("sha256:compacted".to_string()),
                node_count: Some(3),
                edge_count: Some(2),
                compacted_from_id: Some(patch_id),
            },
            cas_id: CasId([0u8; 32]),
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            metadata: json!({}),
        };
        catalog.create(base).await.unwrap();
        let found = catalog.find_compacted_base(patch_id).await.unwrap();
        assert_eq!(found.unwrap().id, base_id);
    }

    #[tokio::test]
    async fn compaction_candidates_filters_by_threshold() {
        let catalog = MemoryArtifactCatalog::new();
        for depth in [5, 50, 150] {
            let artifact = Artifact {
                id: Id::new(),
                kind: ArtifactKind::PatchSet {
                    base_version: Id::new(),
                    depth,
                    op_count: 1,
                },
                cas_id: CasId([0u8; 32]),
                created_by: "alice".to_string(),
                created_at: Utc::now(),
                metadata: json!({}),
            };
            catalog.create(artifact).await.unwrap();
        }
        let candidates = catalog.get_compaction_candidates(100).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
