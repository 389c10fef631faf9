// SPDX-License-Identifier: Apache-2.0
//! Workflow service orchestration for DagVault (spec §4.6).
//!
//! `WorkflowService` is the one place that resolves a tag, branches on the
//! current artifact shape (`dag_version` vs `patch_set`), and drives the
//! catalog/blob-store/tag-registry/patch-chain collaborators together —
//! the same "resolve state, branch on current shape, mutate, ack" structure
//! `echo-session-service::handle_message` uses for its own dispatch, here
//! generalized from a single `match` arm per message kind to one method per
//! workflow operation. No global state: every collaborator is injected at
//! construction.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use bytes::Bytes;
use dagvault_cas::BlobStore;
use dagvault_catalog::{Artifact, ArtifactCatalog, ArtifactKind};
use dagvault_core::{CancellationToken, Id};
use dagvault_materialize::{self as materialize, MaterializedDocument, PatchMember};
use dagvault_patchchain::{ChainParent, PatchChainIndex};
use dagvault_tags::{Access, NewTarget, TagKey, TagRegistry, TargetKind};
use serde_json::Value;

/// Outcome of [`WorkflowService::create_workflow`].
#[derive(Debug, Clone)]
pub struct CreatedWorkflow {
    /// The `dag_version` artifact id (new, or reused on dedupe).
    pub artifact_id: Id,
    /// Its content hash.
    pub cas_id: dagvault_cas::CasId,
    /// Node count recorded for the graph.
    pub node_count: i32,
    /// Edge count recorded for the graph.
    pub edge_count: i32,
}

/// Outcome of [`WorkflowService::create_patch`].
#[derive(Debug, Clone)]
pub struct CreatedPatch {
    /// The new `patch_set` artifact id.
    pub artifact_id: Id,
    /// Its content hash.
    pub cas_id: dagvault_cas::CasId,
    /// Chain depth of the new patch set.
    pub depth: i32,
}

/// Orchestrates workflow creation, retrieval, and patching over the four
/// repository traits, generic so callers can plug in either the in-memory
/// or Postgres-backed implementation of each without this crate depending
/// on `dagvault-store` directly.
pub struct WorkflowService {
    catalog: Arc<dyn ArtifactCatalog>,
    blobs: Arc<dyn BlobStore>,
    tags: Arc<dyn TagRegistry>,
    chain: Arc<dyn PatchChainIndex>,
}

impl WorkflowService {
    /// Construct a workflow service from its four collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn ArtifactCatalog>,
        blobs: Arc<dyn BlobStore>,
        tags: Arc<dyn TagRegistry>,
        chain: Arc<dyn PatchChainIndex>,
    ) -> Self {
        Self {
            catalog,
            blobs,
            tags,
            chain,
        }
    }

    fn count_nodes_and_edges(workflow: &Value) -> (i32, i32) {
        let node_count = workflow
            .get("nodes")
            .and_then(Value::as_array)
            .map_or(0, |a| i32::try_from(a.len()).unwrap_or(i32::MAX));
        let edge_count = workflow
            .get("edges")
            .and_then(Value::as_array)
            .map_or(0, |a| i32::try_from(a.len()).unwrap_or(i32::MAX));
        (node_count, edge_count)
    }

    /// `CreateWorkflow`: hash and store `workflow_json`, dedupe against an
    /// existing `dag_version` by version hash, then `CreateOrMove` the tag
    /// to point at it. If a concurrent caller wins the race to create the
    /// same `version_hash` first, this falls back to reusing the winner's
    /// artifact rather than erroring (spec §5).
    ///
    /// # Errors
    ///
    /// Propagates catalog, blob store, or tag registry errors, or
    /// [`dagvault_core::Error::Unavailable`] if `cancel` has already been
    /// cancelled.
    pub async fn create_workflow(
        &self,
        key: &TagKey,
        workflow_json: &Value,
        author: &str,
        cancel: &CancellationToken,
    ) -> Result<CreatedWorkflow, dagvault_core::Error> {
        cancel.check()?;
        check_access(Access::Write, author, key)?;

        let canonical = dagvault_core::canonical_json_bytes(workflow_json);
        let version_hash = dagvault_core::version_hash(workflow_json);

        let existing = self.catalog.get_by_version_hash(&version_hash).await;
        let (artifact_id, cas_id, node_count, edge_count) = match existing {
            Ok(artifact) => {
                let ArtifactKind::DagVersion {
                    node_count,
                    edge_count,
                    ..
                } = artifact.kind
                else {
                    return Err(dagvault_core::Error::Integrity {
                        message: format!(
                            "version_hash {version_hash} is claimed by a non-dag_version artifact"
                        ),
                    });
                };
                (
                    artifact.id,
                    artifact.cas_id,
                    node_count.unwrap_or(0),
                    edge_count.unwrap_or(0),
                )
            }
            Err(dagvault_core::Error::NotFound { .. }) => {
                let cas_id = self
                    .blobs
                    .put("application/json", Bytes::from(canonical))
                    .await?;
                let (node_count, edge_count) = Self::count_nodes_and_edges(workflow_json);
                let id = Id::new();
                let created = self
                    .catalog
                    .create(Artifact {
                        id,
                        kind: ArtifactKind::DagVersion {
                            version_hash: Some(version_hash.clone()),
                            node_count: Some(node_count),
                            edge_count: Some(edge_count),
                            compacted_from_id: None,
                        },
                        cas_id,
                        created_by: author.to_string(),
                        created_at: chrono::Utc::now(),
                        metadata: serde_json::json!({}),
                    })
                    .await;
                match created {
                    Ok(_) => (id, cas_id, node_count, edge_count),
                    // Lost the race to a concurrent identical creation: the
                    // winner's row is the one to use, not our own insert.
                    Err(dagvault_core::Error::VersionHashCollision { .. }) => {
                        let winner = self.catalog.get_by_version_hash(&version_hash).await?;
                        let ArtifactKind::DagVersion {
                            node_count,
                            edge_count,
                            ..
                        } = winner.kind
                        else {
                            return Err(dagvault_core::Error::Integrity {
                                message: format!(
                                    "version_hash {version_hash} is claimed by a non-dag_version artifact"
                                ),
                            });
                        };
                        (
                            winner.id,
                            winner.cas_id,
                            node_count.unwrap_or(0),
                            edge_count.unwrap_or(0),
                        )
                    }
                    Err(other) => return Err(other),
                }
            }
            Err(other) => return Err(other),
        };

        cancel.check()?;
        self.tags
            .create_or_move(
                key,
                NewTarget {
                    kind: TargetKind::DagVersion,
                    id: artifact_id,
                    hash: Some(version_hash),
                },
                author,
            )
            .await?;

        tracing::info!(
            username = %key.username,
            tag_name = %key.tag_name,
            artifact_id = %artifact_id,
            "workflow created"
        );
        Ok(CreatedWorkflow {
            artifact_id,
            cas_id,
            node_count,
            edge_count,
        })
    }

    async fn load_patch_chain_bytes(
        &self,
        head: &Artifact,
    ) -> Result<(Id, Vec<u8>, Vec<Artifact>), dagvault_core::Error> {
        let ArtifactKind::PatchSet { base_version, .. } = head.kind else {
            return Err(dagvault_core::Error::Integrity {
                message: format!("{} is not a patch_set artifact", head.id),
            });
        };
        let base = self.catalog.get_by_id(base_version).await?;
        let chain = self.catalog.get_patch_chain(head.id).await?;

        let mut cas_ids = vec![base.cas_id];
        cas_ids.extend(chain.iter().map(|a| a.cas_id));
        let blobs = self.blobs.get_many(&cas_ids).await?;

        let base_blob = blobs
            .get(&base.cas_id)
            .ok_or_else(|| dagvault_core::Error::blob_not_found(base.cas_id.to_string()))?;
        let base_bytes = base_blob
            .content
            .clone()
            .ok_or_else(|| dagvault_core::Error::blob_not_found(base.cas_id.to_string()))?
            .to_vec();

        Ok((base.id, base_bytes, chain))
    }

    /// `GetWorkflow`: resolve the tag to an artifact and materialize it
    /// fully.
    ///
    /// # Errors
    ///
    /// Propagates catalog/blob-store/tag-registry/materializer errors.
    pub async fn get_workflow(
        &self,
        key: &TagKey,
        caller: &str,
    ) -> Result<MaterializedDocument, dagvault_core::Error> {
        check_access(Access::Read, caller, key)?;
        let tag = self
            .tags
            .get(key)
            .await?
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let head = self.catalog.get_by_id(tag.target_id).await?;

        match head.kind {
            ArtifactKind::DagVersion { .. } => {
                let blob = self.blobs.get(head.cas_id).await?;
                let bytes = blob
                    .content
                    .ok_or_else(|| dagvault_core::Error::blob_not_found(head.cas_id.to_string()))?;
                let value = materialize::parse_base(head.id, &bytes)?;
                Ok(MaterializedDocument {
                    canonical_bytes: dagvault_core::canonical_json_bytes(&value),
                    version_hash: dagvault_core::version_hash(&value),
                    value,
                })
            }
            ArtifactKind::PatchSet { .. } => {
                let (base_id, base_bytes, chain) = self.load_patch_chain_bytes(&head).await?;
                let cas_ids: Vec<_> = chain.iter().map(|a| a.cas_id).collect();
                let blobs = self.blobs.get_many(&cas_ids).await?;
                let mut owned: Vec<(Id, Vec<u8>)> = Vec::with_capacity(chain.len());
                for artifact in &chain {
                    let blob = blobs.get(&artifact.cas_id).ok_or_else(|| {
                        dagvault_core::Error::blob_not_found(artifact.cas_id.to_string())
                    })?;
                    let bytes = blob.content.clone().ok_or_else(|| {
                        dagvault_core::Error::blob_not_found(artifact.cas_id.to_string())
                    })?;
                    owned.push((artifact.id, bytes.to_vec()));
                }
                let members: Vec<PatchMember<'_>> =
                    owned.iter().map(|(id, bytes)| (*id, bytes.as_slice())).collect();
                materialize::materialize(base_id, &base_bytes, &members)
            }
            ArtifactKind::RunSnapshot { .. } => Err(dagvault_core::Error::Integrity {
                message: format!("tag {}/{} points at a run_snapshot", key.username, key.tag_name),
            }),
        }
    }

    /// `GetWorkflowAtVersion`: `seq = 0` returns the base version; `seq = k`
    /// returns the materialization after applying the first `k` patches.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Validation`] if `seq` is out of
    /// range, [`dagvault_core::Error::Integrity`] if the tag points at a
    /// `dag_version` but `seq != 0`, otherwise propagates the usual errors.
    pub async fn get_workflow_at_version(
        &self,
        key: &TagKey,
        caller: &str,
        seq: i64,
    ) -> Result<MaterializedDocument, dagvault_core::Error> {
        check_access(Access::Read, caller, key)?;
        let tag = self
            .tags
            .get(key)
            .await?
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let head = self.catalog.get_by_id(tag.target_id).await?;

        match head.kind {
            ArtifactKind::DagVersion { .. } if seq == 0 => {
                let blob = self.blobs.get(head.cas_id).await?;
                let bytes = blob
                    .content
                    .ok_or_else(|| dagvault_core::Error::blob_not_found(head.cas_id.to_string()))?;
                let value = materialize::parse_base(head.id, &bytes)?;
                Ok(MaterializedDocument {
                    canonical_bytes: dagvault_core::canonical_json_bytes(&value),
                    version_hash: dagvault_core::version_hash(&value),
                    value,
                })
            }
            ArtifactKind::DagVersion { .. } => Err(dagvault_core::Error::Validation {
                message: format!("tag points at a dag_version; seq must be 0, got {seq}"),
            }),
            ArtifactKind::PatchSet { .. } => {
                let (base_id, base_bytes, chain) = self.load_patch_chain_bytes(&head).await?;
                let cas_ids: Vec<_> = chain.iter().map(|a| a.cas_id).collect();
                let blobs = self.blobs.get_many(&cas_ids).await?;
                let mut owned: Vec<(Id, Vec<u8>)> = Vec::with_capacity(chain.len());
                for artifact in &chain {
                    let blob = blobs.get(&artifact.cas_id).ok_or_else(|| {
                        dagvault_core::Error::blob_not_found(artifact.cas_id.to_string())
                    })?;
                    let bytes = blob.content.clone().ok_or_else(|| {
                        dagvault_core::Error::blob_not_found(artifact.cas_id.to_string())
                    })?;
                    owned.push((artifact.id, bytes.to_vec()));
                }
                let members: Vec<PatchMember<'_>> =
                    owned.iter().map(|(id, bytes)| (*id, bytes.as_slice())).collect();
                materialize::materialize_at_seq(base_id, &base_bytes, &members, seq)
            }
            ArtifactKind::RunSnapshot { .. } => Err(dagvault_core::Error::Integrity {
                message: format!("tag {}/{} points at a run_snapshot", key.username, key.tag_name),
            }),
        }
    }

    /// `CreatePatch`: resolve the tag, compute the new patch's base and
    /// parent per its current shape, serialize `operations`, store it,
    /// extend the chain, and move the tag.
    ///
    /// # Errors
    ///
    /// Propagates catalog/blob-store/patch-chain/tag-registry errors, or
    /// [`dagvault_core::Error::Validation`] if `operations` is empty.
    pub async fn create_patch(
        &self,
        key: &TagKey,
        operations: &Value,
        author: &str,
        cancel: &CancellationToken,
    ) -> Result<CreatedPatch, dagvault_core::Error> {
        cancel.check()?;
        check_access(Access::Write, author, key)?;

        let op_count = operations
            .as_array()
            .map(Vec::len)
            .ok_or_else(|| dagvault_core::Error::Validation {
                message: "operations must be a non-empty JSON array".to_string(),
            })?;
        if op_count == 0 {
            return Err(dagvault_core::Error::Validation {
                message: "operations must be a non-empty JSON array".to_string(),
            });
        }
        let op_count = i32::try_from(op_count).map_err(|_| dagvault_core::Error::Validation {
            message: "too many operations in one patch".to_string(),
        })?;

        let tag = self
            .tags
            .get(key)
            .await?
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let current = self.catalog.get_by_id(tag.target_id).await?;

        let (base_version, parent, new_depth) = match current.kind {
            ArtifactKind::DagVersion { .. } => (current.id, ChainParent::DagVersion, 1),
            ArtifactKind::PatchSet {
                base_version,
                depth,
                ..
            } => (
                base_version,
                ChainParent::PatchSet {
                    id: current.id,
                    depth,
                },
                depth + 1,
            ),
            ArtifactKind::RunSnapshot { .. } => {
                return Err(dagvault_core::Error::Integrity {
                    message: format!("tag {}/{} points at a run_snapshot", key.username, key.tag_name),
                })
            }
        };

        let bytes = serde_json::to_vec(operations).map_err(|e| dagvault_core::Error::Validation {
            message: format!("operations did not serialize to JSON: {e}"),
        })?;
        let cas_id = self.blobs.put("application/json-patch+json", Bytes::from(bytes)).await?;

        let new_id = Id::new();
        self.catalog
            .create(Artifact {
                id: new_id,
                kind: ArtifactKind::PatchSet {
                    base_version,
                    depth: new_depth,
                    op_count,
                },
                cas_id,
                created_by: author.to_string(),
                created_at: chrono::Utc::now(),
                metadata: serde_json::json!({}),
            })
            .await?;

        cancel.check()?;
        self.chain.copy_and_append(parent, new_id).await?;

        self.tags
            .create_or_move(
                key,
                NewTarget {
                    kind: TargetKind::PatchSet,
                    id: new_id,
                    hash: None,
                },
                author,
            )
            .await?;

        tracing::info!(
            username = %key.username,
            tag_name = %key.tag_name,
            artifact_id = %new_id,
            depth = new_depth,
            "patch applied"
        );
        Ok(CreatedPatch {
            artifact_id: new_id,
            cas_id,
            depth: new_depth,
        })
    }
}

fn check_access(
    access: Access,
    caller: &str,
    key: &TagKey,
) -> Result<(), dagvault_core::Error> {
    let caller = dagvault_core::Username::new(caller).map_err(|e| dagvault_core::Error::Validation {
        message: e.to_string(),
    })?;
    dagvault_tags::check_access(access, &caller, key)
}
