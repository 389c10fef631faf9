// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios A, B, C from spec.md §8, driven against the full
//! in-memory service stack (catalog + blob store + tag registry + patch
//! chain index), not a single crate's unit tests.

use std::sync::Arc;

use dagvault_cas::MemoryBlobStore;
use dagvault_catalog::{ArtifactCatalog, MemoryArtifactCatalog};
use dagvault_core::{CancellationToken, TagName, Username};
use dagvault_patchchain::{CatalogPatchChainIndex, PatchChainIndex};
use dagvault_tags::{MemoryTagRegistry, TagKey, TagRegistry};
use dagvault_workflow::WorkflowService;
use serde_json::json;

fn service() -> WorkflowService {
    let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
    let blobs: Arc<dyn dagvault_cas::BlobStore> = Arc::new(MemoryBlobStore::default());
    let tags: Arc<dyn TagRegistry> = Arc::new(MemoryTagRegistry::new());
    let chain: Arc<dyn PatchChainIndex> = Arc::new(CatalogPatchChainIndex::new(catalog.clone()));
    WorkflowService::new(catalog, blobs, tags, chain)
}

fn alice_main() -> TagKey {
    TagKey::new(
        Username::new("alice").expect("valid username"),
        TagName::new("main").expect("valid tag name"),
    )
}

/// Scenario A — dedup + tag creation.
#[tokio::test]
async fn scenario_a_dedup_and_tag_creation() {
    let svc = service();
    let key = alice_main();
    let cancel = CancellationToken::new();
    let workflow = json!({"nodes": [{"id": "n1"}], "edges": []});

    let created = svc
        .create_workflow(&key, &workflow, "alice", &cancel)
        .await
        .expect("create succeeds");
    assert_eq!(
        created.cas_id.to_string(),
        dagvault_cas::hash(&dagvault_core::canonical_json_bytes(&workflow)).to_string()
    );

    // Repeating with identical bytes reuses the artifact, moves the tag again.
    let repeated = svc
        .create_workflow(&key, &workflow, "alice", &cancel)
        .await
        .expect("second create succeeds");
    assert_eq!(created.artifact_id, repeated.artifact_id);
}

/// Scenario B — linear patch chain, two patches deep.
#[tokio::test]
async fn scenario_b_linear_patch_chain() {
    let svc = service();
    let key = alice_main();
    let cancel = CancellationToken::new();
    let base = json!({"nodes": [{"id": "n1"}], "edges": []});
    svc.create_workflow(&key, &base, "alice", &cancel)
        .await
        .expect("base create");

    let add_n2 = json!([{"op": "add", "path": "/nodes/-", "value": {"id": "n2"}}]);
    let p1 = svc
        .create_patch(&key, &add_n2, "alice", &cancel)
        .await
        .expect("first patch");
    assert_eq!(p1.depth, 1);

    let add_n3 = json!([{"op": "add", "path": "/nodes/-", "value": {"id": "n3"}}]);
    let p2 = svc
        .create_patch(&key, &add_n3, "alice", &cancel)
        .await
        .expect("second patch");
    assert_eq!(p2.depth, 2);

    let materialized = svc
        .get_workflow(&key, "alice")
        .await
        .expect("materialize head");
    let ids: Vec<&str> = materialized.value["nodes"]
        .as_array()
        .expect("nodes array")
        .iter()
        .map(|n| n["id"].as_str().expect("id string"))
        .collect();
    assert_eq!(ids, vec!["n1", "n2", "n3"]);
}

/// Scenario C — version-at-seq over the chain built in scenario B.
#[tokio::test]
async fn scenario_c_version_at_seq() {
    let svc = service();
    let key = alice_main();
    let cancel = CancellationToken::new();
    svc.create_workflow(&key, &json!({"nodes": [{"id": "n1"}], "edges": []}), "alice", &cancel)
        .await
        .expect("base create");
    svc.create_patch(
        &key,
        &json!([{"op": "add", "path": "/nodes/-", "value": {"id": "n2"}}]),
        "alice",
        &cancel,
    )
    .await
    .expect("patch 1");
    svc.create_patch(
        &key,
        &json!([{"op": "add", "path": "/nodes/-", "value": {"id": "n3"}}]),
        "alice",
        &cancel,
    )
    .await
    .expect("patch 2");

    let node_ids = |value: &serde_json::Value| -> Vec<String> {
        value["nodes"]
            .as_array()
            .expect("nodes array")
            .iter()
            .map(|n| n["id"].as_str().expect("id string").to_string())
            .collect()
    };

    let seq0 = svc
        .get_workflow_at_version(&key, "alice", 0)
        .await
        .expect("seq 0");
    assert_eq!(node_ids(&seq0.value), vec!["n1"]);

    let seq1 = svc
        .get_workflow_at_version(&key, "alice", 1)
        .await
        .expect("seq 1");
    assert_eq!(node_ids(&seq1.value), vec!["n1", "n2"]);

    let seq2 = svc
        .get_workflow_at_version(&key, "alice", 2)
        .await
        .expect("seq 2");
    assert_eq!(node_ids(&seq2.value), vec!["n1", "n2", "n3"]);

    let out_of_range = svc.get_workflow_at_version(&key, "alice", 3).await;
    assert!(matches!(
        out_of_range,
        Err(dagvault_core::Error::Validation { .. })
    ));
}
