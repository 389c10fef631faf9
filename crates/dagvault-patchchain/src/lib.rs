// SPDX-License-Identifier: Apache-2.0
//! Patch-chain membership index for DagVault.
//!
//! For every `patch_set` artifact `H`, the chain `{(H, seq, M) : 1 <= seq <=
//! depth(H)}` lists, in application order, every patch that must be folded
//! to materialize `H`. Reading is one range scan on `(head_id, seq)`
//! (delegated straight to [`dagvault_catalog::ArtifactCatalog`]); writing a
//! new patch runs one of two shapes depending on what it is layered on top
//! of, both inserted in the same transaction as the patch artifact and the
//! tag move by the caller ([`dagvault_workflow`](../dagvault_workflow)).
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use async_trait::async_trait;
use dagvault_catalog::{Artifact, ArtifactCatalog, ArtifactKind};
use dagvault_core::Id;

/// A single `(head_id, seq, member_id)` row as returned by the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainMember {
    /// The chain this membership row belongs to.
    pub head_id: Id,
    /// 1-based position within the chain.
    pub seq: i32,
    /// The patch artifact occupying this position.
    pub member_id: Id,
}

/// What a new patch set is layered on top of — determines which of the two
/// write shapes `copy_and_append` runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainParent {
    /// Layered directly on a `dag_version` — the new chain is just itself.
    DagVersion,
    /// Layered on an existing `patch_set` at the given depth — its chain is
    /// copied forward and the new patch appended.
    PatchSet {
        /// The parent patch set's id.
        id: Id,
        /// The parent patch set's depth.
        depth: i32,
    },
}

/// The patch-chain membership index.
#[async_trait]
pub trait PatchChainIndex: Send + Sync {
    /// Write the membership rows for a newly created patch `new_patch_id`
    /// whose parent is described by `parent`, and return the full chain in
    /// application order.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Integrity`] if the write violates a
    /// uniqueness constraint (the parent chain already contains
    /// `new_patch_id`, or a row for `(new_patch_id, seq)` already exists).
    async fn copy_and_append(
        &self,
        parent: ChainParent,
        new_patch_id: Id,
    ) -> Result<Vec<ChainMember>, dagvault_core::Error>;

    /// Fetch a chain's membership rows in application order.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if `head_id` has no chain.
    async fn get_chain(&self, head_id: Id) -> Result<Vec<ChainMember>, dagvault_core::Error>;
}

/// [`PatchChainIndex`] implemented directly on top of an
/// [`ArtifactCatalog`]'s `insert_patch_chain`/`get_patch_chain`.
pub struct CatalogPatchChainIndex {
    catalog: Arc<dyn ArtifactCatalog>,
}

impl CatalogPatchChainIndex {
    /// Wrap a catalog as a patch-chain index.
    #[must_use]
    pub fn new(catalog: Arc<dyn ArtifactCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl PatchChainIndex for CatalogPatchChainIndex {
    async fn copy_and_append(
        &self,
        parent: ChainParent,
        new_patch_id: Id,
    ) -> Result<Vec<ChainMember>, dagvault_core::Error> {
        let members: Vec<Id> = match parent {
            ChainParent::DagVersion => vec![new_patch_id],
            ChainParent::PatchSet { id, depth } => {
                let parent_chain = self.catalog.get_patch_chain(id).await?;
                if parent_chain.len() as i32 != depth {
                    return Err(dagvault_core::Error::Integrity {
                        message: format!(
                            "parent chain length {} does not match declared depth {depth}",
                            parent_chain.len()
                        ),
                    });
                }
                let mut members: Vec<Id> = parent_chain.iter().map(|a| a.id).collect();
                members.push(new_patch_id);
                members
            }
        };

        self.catalog
            .insert_patch_chain(new_patch_id, &members)
            .await?;

        Ok(members
            .into_iter()
            .enumerate()
            .map(|(i, member_id)| ChainMember {
                head_id: new_patch_id,
                seq: i32::try_from(i + 1).unwrap_or(i32::MAX),
                member_id,
            })
            .collect())
    }

    async fn get_chain(&self, head_id: Id) -> Result<Vec<ChainMember>, dagvault_core::Error> {
        let artifacts = self.catalog.get_patch_chain(head_id).await?;
        Ok(artifacts
            .into_iter()
            .enumerate()
            .map(|(i, a)| ChainMember {
                head_id,
                seq: i32::try_from(i + 1).unwrap_or(i32::MAX),
                member_id: a.id,
            })
            .collect())
    }
}

/// Validate the structural invariants of the chain rooted at `head`:
/// `max(seq) == count(*) == depth(head)`, and the last member is `head`
/// itself. Exposed for `dagvault-cli`'s `verify` subcommand and for tests —
/// not run automatically on the write path.
///
/// # Errors
///
/// Returns [`dagvault_core::Error::Integrity`] describing the first
/// violated invariant found.
pub async fn validate_chain(
    catalog: &dyn ArtifactCatalog,
    head: Id,
) -> Result<(), dagvault_core::Error> {
    let head_artifact = catalog.get_by_id(head).await?;
    let depth = match head_artifact.kind {
        ArtifactKind::PatchSet { depth, .. } => depth,
        _ => {
            return Err(dagvault_core::Error::Integrity {
                message: format!("{head} is not a patch_set artifact"),
            })
        }
    };

    let chain: Vec<Artifact> = catalog.get_patch_chain(head).await?;

    let count = i32::try_from(chain.len()).unwrap_or(i32::MAX);
    if count != depth {
        return Err(dagvault_core::Error::Integrity {
            message: format!("chain for {head} has {count} members but depth is {depth}"),
        });
    }

    match chain.last() {
        Some(last) if last.id == head => {}
        _ => {
            return Err(dagvault_core::Error::Integrity {
                message: format!("chain for {head} does not end with the head itself"),
            })
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dagvault_cas::CasId;
    use dagvault_catalog::MemoryArtifactCatalog;
    use serde_json::json;

    fn dag_version_artifact(id: Id) -> Artifact {
        Artifact {
            id,
            kind: ArtifactKind::DagVersion {
                version_hash: Some(format!("sha256:{id}")),
                node_count: Some(1),
                edge_count: Some(0),
                compacted_from_id: None,
            },
            cas_id: CasId([0u8; 32]),
            created_by: "alice".to_string(),
            created_at: chrono::Utc::now(),
            metadata: json!({}),
        }
    }

    fn patch_set_artifact(id: Id, base_version: Id, depth: i32) -> Artifact {
        Artifact {
            id,
            kind: ArtifactKind::PatchSet {
                base_version,
                depth,
                op_count: 1,
            },
            cas_id: CasId([0u8; 32]),
            created_by: "alice".to_string(),
            created_at: chrono::Utc::now(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn copy_and_append_from_dag_version_is_single_member() {
        let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
        let index = CatalogPatchChainIndex::new(catalog.clone());
        let base = Id::new();
        catalog.create(dag_version_artifact(base)).await.unwrap();

        let patch = Id::new();
        catalog.create(patch_set_artifact(patch, base, 1)).await.unwrap();

        let chain = index
            .copy_and_append(ChainParent::DagVersion, patch)
            .await
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].member_id, patch);
        assert_eq!(chain[0].seq, 1);
    }

    #[tokio::test]
    async fn copy_and_append_from_patch_set_extends_prefix() {
        let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
        let index = CatalogPatchChainIndex::new(catalog.clone());
        let base = Id::new();
        let p1 = Id::new();
        let p2 = Id::new();

        catalog.create(dag_version_artifact(base)).await.unwrap();
        catalog.create(patch_set_artifact(p1, base, 1)).await.unwrap();
        index
            .copy_and_append(ChainParent::DagVersion, p1)
            .await
            .unwrap();

        catalog.create(patch_set_artifact(p2, base, 2)).await.unwrap();
        let chain = index
            .copy_and_append(ChainParent::PatchSet { id: p1, depth: 1 }, p2)
            .await
            .unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].member_id, p1);
        assert_eq!(chain[1].member_id, p2);
        assert_eq!(chain[1].seq, 2);

        validate_chain(catalog.as_ref(), p2).await.unwrap();
    }

    #[tokio::test]
    async fn validate_chain_rejects_depth_mismatch() {
        let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
        let base = Id::new();
        let head = Id::new();
        catalog.create(patch_set_artifact(head, base, 5)).await.unwrap();
        catalog.insert_patch_chain(head, &[head]).await.unwrap();

        let err = validate_chain(catalog.as_ref(), head).await.unwrap_err();
        assert!(matches!(err, dagvault_core::Error::Integrity { .. }));
    }

    proptest::proptest! {
        // Extending a chain by repeated copy-and-append always preserves
        // the full prefix of member ids laid down by earlier appends.
        #[test]
        fn chain_copy_append_preserves_prefix(chain_len in 1usize..12) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
                let index = CatalogPatchChainIndex::new(catalog.clone());
                let base = Id::new();
                catalog.create(dag_version_artifact(base)).await.unwrap();

                let mut expected_prefix = Vec::new();
                let mut parent = ChainParent::DagVersion;
                for depth in 1..=chain_len {
                    let patch_id = Id::new();
                    catalog
                        .create(patch_set_artifact(patch_id, base, i32::try_from(depth).unwrap()))
                        .await
                        .unwrap();
                    let chain = index.copy_and_append(parent, patch_id).await.unwrap();
                    let ids: Vec<Id> = chain.iter().map(|m| m.member_id).collect();
                    let mut want = expected_prefix.clone();
                    want.push(patch_id);
                    assert_eq!(ids, want);
                    expected_prefix = ids;
                    parent = ChainParent::PatchSet {
                        id: patch_id,
                        depth: i32::try_from(depth).unwrap(),
                    };
                }
            });
        }
    }
}
