// SPDX-License-Identifier: Apache-2.0
//! Scenario D from spec.md §8 — compaction preserves semantics: the new
//! base materializes byte-identically to the old chain head, the old
//! chain is untouched, and a subsequent undo (after `migrate_tag`)
//! restores the tag to the pre-compaction patch set.

use std::sync::Arc;

use bytes::Bytes;
use dagvault_cas::{BlobStore, MemoryBlobStore};
use dagvault_catalog::{Artifact, ArtifactCatalog, ArtifactKind, MemoryArtifactCatalog};
use dagvault_compact::CompactionEngine;
use dagvault_core::{Id, TagName, Username};
use dagvault_materialize::{materialize, PatchMember};
use dagvault_patchchain::{CatalogPatchChainIndex, ChainParent, PatchChainIndex};
use dagvault_tags::{MemoryTagRegistry, NewTarget, TagKey, TagRegistry, TargetKind};
use serde_json::json;

async fn seed_chain(
    catalog: &Arc<dyn ArtifactCatalog>,
    blobs: &Arc<dyn BlobStore>,
    depth: usize,
) -> Id {
    let base_json = json!({"nodes": [], "edges": []});
    let base_cas = blobs
        .put("application/json", Bytes::from(serde_json::to_vec(&base_json).expect("json")))
        .await
        .expect("put base");
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
            metadata: json!({}),
        })
        .await
        .expect("create base");

    let chain_index = CatalogPatchChainIndex::new(catalog.clone());
    let mut parent = ChainParent::DagVersion;
    let mut head_id = base_id;
    for i in 0..depth {
        let ops = json!([{"op": "add", "path": "/nodes/-", "value": i}]);
        let cas = blobs
            .put(
                "application/json-patch+json",
                Bytes::from(serde_json::to_vec(&ops).expect("json")),
            )
            .await
            .expect("put patch");
        let patch_id = Id::new();
        let d = i32::try_from(i + 1).expect("small depth");
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
                metadata: json!({}),
            })
            .await
            .expect("create patch");
        chain_index
            .copy_and_append(parent, patch_id)
            .await
            .expect("extend chain");
        parent = ChainParent::PatchSet { id: patch_id, depth: d };
        head_id = patch_id;
    }
    head_id
}

async fn materialize_head(
    catalog: &Arc<dyn ArtifactCatalog>,
    blobs: &Arc<dyn BlobStore>,
    head_id: Id,
) -> serde_json::Value {
    let head = catalog.get_by_id(head_id).await.expect("head exists");
    let ArtifactKind::PatchSet { base_version, .. } = head.kind else {
        panic!("head is not a patch_set");
    };
    let base = catalog.get_by_id(base_version).await.expect("base exists");
    let chain = catalog.get_patch_chain(head_id).await.expect("chain readable");

    let mut cas_ids = vec![base.cas_id];
    cas_ids.extend(chain.iter().map(|a| a.cas_id));
    let fetched = blobs.get_many(&cas_ids).await.expect("bulk fetch");

    let base_bytes = fetched
        .get(&base.cas_id)
        .and_then(|b| b.content.clone())
        .expect("base bytes present")
        .to_vec();
    let patch_bytes: Vec<_> = chain
        .iter()
        .map(|m| {
            fetched
                .get(&m.cas_id)
                .and_then(|b| b.content.clone())
                .expect("patch bytes present")
                .to_vec()
        })
        .collect();
    let members: Vec<PatchMember<'_>> = chain
        .iter()
        .zip(patch_bytes.iter())
        .map(|(m, bytes)| (m.id, bytes.as_slice()))
        .collect();

    materialize(base.id, &base_bytes, &members)
        .expect("materialize succeeds")
        .value
}

#[tokio::test]
async fn compaction_preserves_semantics_and_undo_restores_patch_set() {
    let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::default());
    let head_id = seed_chain(&catalog, &blobs, 2).await;

    let before = materialize_head(&catalog, &blobs, head_id).await;

    let engine = CompactionEngine::new(catalog.clone(), blobs.clone());
    let result = engine.compact(head_id).await.expect("compaction succeeds");

    let new_base = catalog
        .get_by_id(result.new_base_id)
        .await
        .expect("new base readable");
    let ArtifactKind::DagVersion {
        compacted_from_id, ..
    } = new_base.kind
    else {
        panic!("compacted result is not a dag_version");
    };
    assert_eq!(compacted_from_id, Some(head_id));

    let new_base_blob = blobs.get(new_base.cas_id).await.expect("new base blob readable");
    let after: serde_json::Value = serde_json::from_slice(
        &new_base_blob.content.expect("inline content"),
    )
    .expect("valid json");
    assert_eq!(before, after, "materialize(V) must equal materialize(P) byte-for-byte");

    // Old chain is untouched by compaction.
    let chain_after = catalog.get_patch_chain(head_id).await.expect("chain still readable");
    assert_eq!(chain_after.len(), 2);

    let tags = MemoryTagRegistry::new();
    let key = TagKey::new(
        Username::new("alice").expect("valid username"),
        TagName::new("main").expect("valid tag name"),
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
    .expect("tag created");

    let moved = engine
        .migrate_tag(&tags, &key, result.new_base_id, "alice")
        .await
        .expect("migrate succeeds");
    assert_eq!(moved.target_id, result.new_base_id);
    assert_eq!(moved.target_kind, TargetKind::DagVersion);

    let undone = tags.undo(&key, "alice").await.expect("undo succeeds");
    assert_eq!(undone.target_id, head_id);
    assert_eq!(undone.target_kind, TargetKind::PatchSet);
}
