// SPDX-License-Identifier: Apache-2.0
//! Scenario F from spec.md §8 — run admission ordering: a successful
//! admission leaves exactly one snapshot artifact, one queued run row, and
//! one matching stream record visible; a publisher failure leaves none of
//! them visible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dagvault_cas::{BlobStore, MemoryBlobStore};
use dagvault_catalog::{ArtifactCatalog, MemoryArtifactCatalog};
use dagvault_core::{TagName, Username};
use dagvault_materialize::MaterializedDocument;
use dagvault_runs::{
    InMemoryEphemeralCache, InMemoryRunEventPublisher, MemoryRunRepository, RunAdmission,
    RunEnqueued, RunEventPublisher, RunRepository,
};
use dagvault_tags::TagKey;
use serde_json::json;

fn materialized() -> MaterializedDocument {
    let value = json!({"nodes": [{"id": "n1"}], "edges": []});
    MaterializedDocument {
        canonical_bytes: dagvault_core::canonical_json_bytes(&value),
        version_hash: dagvault_core::version_hash(&value),
        value,
    }
}

fn alice_main() -> TagKey {
    TagKey::new(
        Username::new("alice").expect("valid username"),
        TagName::new("main").expect("valid tag name"),
    )
}

#[tokio::test]
async fn successful_admission_publishes_exactly_one_matching_event() {
    let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::default());
    let publisher = Arc::new(InMemoryRunEventPublisher::new(8));
    let mut subscriber = publisher.subscribe();
    let admission = RunAdmission::new(
        catalog,
        blobs,
        publisher,
        Arc::new(InMemoryEphemeralCache::new()),
        Arc::new(MemoryRunRepository::new()),
    );

    let (run_id, artifact_id) = admission
        .create_run(&alice_main(), &materialized(), json!({}), "alice")
        .await
        .expect("admission succeeds");

    let run = admission.get_run(run_id).await.expect("run visible");
    assert_eq!(run.artifact_id, artifact_id);
    assert!(matches!(run.status, dagvault_runs::RunStatus::Queued));

    let event = subscriber.try_recv().expect("exactly one event published");
    assert_eq!(event.run_id, run_id);
    assert_eq!(event.artifact_id, artifact_id);
    assert!(subscriber.try_recv().is_err(), "no second event published");
}

/// A publisher that always fails, standing in for an unreachable broker.
struct FailingPublisher;

#[async_trait]
impl RunEventPublisher for FailingPublisher {
    async fn publish(&self, _event: RunEnqueued) -> Result<(), dagvault_core::Error> {
        Err(dagvault_core::Error::Unavailable {
            message: "stream unreachable".to_string(),
        })
    }
}

#[tokio::test]
async fn publish_failure_leaves_no_run_visible() {
    let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
    let runs = Arc::new(MemoryRunRepository::new());
    let admission = RunAdmission::new(
        catalog,
        Arc::new(MemoryBlobStore::default()) as Arc<dyn BlobStore>,
        Arc::new(FailingPublisher),
        Arc::new(InMemoryEphemeralCache::new()),
        runs.clone(),
    );

    let err = admission
        .create_run(&alice_main(), &materialized(), json!({}), "alice")
        .await
        .expect_err("publish failure must surface as an error");
    assert!(matches!(err, dagvault_core::Error::Unavailable { .. }));

    assert!(
        runs.list_by_user("alice", 10).await.expect("list succeeds").is_empty(),
        "no run row should be visible when the stream publish fails"
    );
}

/// A publisher that, at publish time, checks whether the run row it was
/// handed is already visible in the repository — catching the case where
/// the stream is published before the row is inserted.
struct OrderCheckingPublisher {
    runs: Arc<MemoryRunRepository>,
    row_was_visible_at_publish_time: AtomicBool,
}

#[async_trait]
impl RunEventPublisher for OrderCheckingPublisher {
    async fn publish(&self, event: RunEnqueued) -> Result<(), dagvault_core::Error> {
        let visible = self.runs.get(event.run_id).await.is_ok();
        self.row_was_visible_at_publish_time.store(visible, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn run_row_is_inserted_before_the_event_is_published() {
    let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
    let runs = Arc::new(MemoryRunRepository::new());
    let publisher = Arc::new(OrderCheckingPublisher {
        runs: runs.clone(),
        row_was_visible_at_publish_time: AtomicBool::new(false),
    });
    let admission = RunAdmission::new(
        catalog,
        Arc::new(MemoryBlobStore::default()) as Arc<dyn BlobStore>,
        publisher.clone(),
        Arc::new(InMemoryEphemeralCache::new()),
        runs,
    );

    admission
        .create_run(&alice_main(), &materialized(), json!({}), "alice")
        .await
        .expect("admission succeeds");

    assert!(
        publisher.row_was_visible_at_publish_time.load(Ordering::SeqCst),
        "run row must be inserted before the stream event is published"
    );
}
