// SPDX-License-Identifier: Apache-2.0
//! Run admission and the run repository for DagVault (spec §4.8).
//!
//! `RunAdmission::create_run` freezes a tag's current materialization into
//! a `run_snapshot` artifact and enqueues it, in the mandated order: `Put`
//! the snapshot bytes, insert the artifact, insert the run row, publish
//! the enqueue event last. If the publish fails the whole thing rolls
//! back — there is no code path that leaves a run row visible without a
//! corresponding stream append.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dagvault_cas::BlobStore;
use dagvault_catalog::{Artifact, ArtifactCatalog, ArtifactKind};
use dagvault_core::Id;
use dagvault_materialize::MaterializedDocument;
use dagvault_tags::TagKey;
use serde_json::Value;

mod memory;
mod postgres;
#[cfg(feature = "redis-stream")]
mod redis_stream;

pub use memory::MemoryRunRepository;
pub use postgres::PgRunRepository;
#[cfg(feature = "redis-stream")]
pub use redis_stream::RedisRunEventPublisher;

/// Lifecycle state of a run (spec §3: "status in {queued, running,
/// completed, failed, cancelled}").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Admitted and enqueued, not yet picked up by an executor.
    Queued,
    /// An executor has claimed the run.
    Running,
    /// The run finished successfully.
    Completed,
    /// The run finished with an error.
    Failed,
    /// The run was cancelled before or during execution.
    Cancelled,
}

impl RunStatus {
    /// The string discriminant stored in the `run.status` column.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the string discriminant back into a [`RunStatus`].
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Integrity`] if `label` is not one
    /// of the five recognized status strings.
    pub fn parse(label: &str) -> Result<Self, dagvault_core::Error> {
        match label {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(dagvault_core::Error::Integrity {
                message: format!("unknown run status {other:?}"),
            }),
        }
    }
}

/// A single run row (spec §3: "Unique run id, base-kind (`dag_version`
/// here), base-ref ..., tags-snapshot mapping, status ..., submitter,
/// submitted-at"). Caller-supplied `inputs` are part of the enqueue event
/// (spec §6) but not one of the persisted `Run` fields, so they are not
/// carried here — `RunAdmission::create_run` takes them only to forward to
/// the publisher.
#[derive(Clone, Debug)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: Id,
    /// The frozen `run_snapshot` artifact this run executes against.
    pub artifact_id: Id,
    /// The tag the run was submitted against; stored as the run's
    /// tags-snapshot mapping (one entry: this tag to `artifact_id`).
    pub tag: TagKey,
    /// Identity that submitted the run.
    pub submitter: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
}

/// Run plus whatever materialized/execution detail the ephemeral caches
/// still hold. Each field is independently optional: a cache miss on one
/// never suppresses the others (spec §6: "the core tolerates their
/// absence on read").
#[derive(Clone, Debug)]
pub struct RunDetails {
    /// The run row itself.
    pub run: Run,
    /// Materialized IR, if `ir:{run_id}` was still resident.
    pub ir: Option<Value>,
    /// Per-node execution context, if `context:{run_id}` was still
    /// resident.
    pub context: Option<Value>,
}

/// An enqueue notification published after a run is admitted (spec §6's
/// `wf.run.requests` stream).
#[derive(Clone, Debug)]
pub struct RunEnqueued {
    /// The run that was admitted.
    pub run_id: Id,
    /// Its frozen snapshot artifact.
    pub artifact_id: Id,
    /// The tag it was submitted against.
    pub tag: TagKey,
    /// Identity that submitted the run.
    pub username: String,
    /// Caller-supplied run inputs.
    pub inputs: Value,
    /// Submission timestamp, epoch seconds.
    pub created_at: i64,
}

/// Publishes run-enqueue notifications to the external `wf.run.requests`
/// stream. Abstracted so `RunAdmission` never depends on a concrete
/// broker client.
#[async_trait]
pub trait RunEventPublisher: Send + Sync {
    /// Publish one enqueue event. Must be durable and ordered-within-
    /// stream per spec §6; implementations that cannot guarantee that
    /// (e.g. [`LogRunEventPublisher`]) must say so loudly rather than
    /// silently pretending to have published.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] if the stream could
    /// not be reached. `RunAdmission` treats this as fatal to the whole
    /// admission and rolls the run back.
    async fn publish(&self, event: RunEnqueued) -> Result<(), dagvault_core::Error>;
}

/// Test double backed by a `tokio::sync::broadcast` channel so multiple
/// subscribers (assertions) can observe published events.
pub struct InMemoryRunEventPublisher {
    sender: tokio::sync::broadcast::Sender<RunEnqueued>,
}

impl InMemoryRunEventPublisher {
    /// Create a publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to published events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEnqueued> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl RunEventPublisher for InMemoryRunEventPublisher {
    async fn publish(&self, event: RunEnqueued) -> Result<(), dagvault_core::Error> {
        // A send with no subscribers is not a failure — the channel still
        // recorded the event for any subscriber that joins later within
        // its buffer window.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Fallback publisher that logs the enqueue event via `tracing` instead
/// of delivering it anywhere. Used when no real stream backend is
/// configured — an honest admission that nothing consumes this event, not
/// a silent no-op.
#[derive(Default)]
pub struct LogRunEventPublisher;

#[async_trait]
impl RunEventPublisher for LogRunEventPublisher {
    async fn publish(&self, event: RunEnqueued) -> Result<(), dagvault_core::Error> {
        tracing::warn!(
            run_id = %event.run_id,
            artifact_id = %event.artifact_id,
            username = %event.username,
            "no run-event stream configured; logging enqueue instead of publishing"
        );
        Ok(())
    }
}

/// Short-lived key-value cache for materialized IR and per-node execution
/// context (spec §6: `ir:{run_id}`, `context:{run_id}`). The core must
/// tolerate this being entirely absent — every method returns `Ok(None)`
/// on a miss, never an error.
#[async_trait]
pub trait EphemeralCache: Send + Sync {
    /// Fetch a cached value by key, if still resident.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] only if the cache
    /// backend itself could not be reached at all — a miss is `Ok(None)`,
    /// not an error.
    async fn get(&self, key: &str) -> Result<Option<Value>, dagvault_core::Error>;

    /// Store a value under `key` with a time-to-live.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Unavailable`] if the cache backend
    /// could not be reached.
    async fn set(&self, key: &str, value: Value, ttl: std::time::Duration) -> Result<(), dagvault_core::Error>;
}

struct CacheEntry {
    value: Value,
    expires_at: std::time::Instant,
}

/// In-memory [`EphemeralCache`] with per-entry TTL, for tests and for
/// embedding when no external cache is configured.
#[derive(Default)]
pub struct InMemoryEphemeralCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryEphemeralCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// A poisoned lock means a prior writer panicked mid-mutation; there is no
// sane recovery short of process restart, so these propagate via panic.
#[async_trait]
#[allow(clippy::expect_used)]
impl EphemeralCache for InMemoryEphemeralCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, dagvault_core::Error> {
        let entries = self.entries.read().expect("lock poisoned");
        Ok(entries.get(key).and_then(|entry| {
            if entry.expires_at > std::time::Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        }))
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: std::time::Duration,
    ) -> Result<(), dagvault_core::Error> {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: std::time::Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

fn ir_cache_key(run_id: Id) -> String {
    format!("ir:{run_id}")
}

fn context_cache_key(run_id: Id) -> String {
    format!("context:{run_id}")
}

/// The run repository named in spec §6's persistent store (the `run`
/// table, conceptually range-partitioned by `submitted_at`): insert-once
/// rows, filtered listing by submitter or by tag, in-place status
/// updates. `RunAdmission` is generic over this trait so the same
/// admission logic runs against either [`MemoryRunRepository`] (tests, the
/// CLI's `--store memory`) or [`PgRunRepository`] (`--store postgres`).
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert a newly admitted run row. The row must not already exist.
    ///
    /// # Errors
    ///
    /// Propagates backing-store errors.
    async fn insert(&self, run: Run) -> Result<(), dagvault_core::Error>;

    /// Fetch a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no run has `run_id`.
    async fn get(&self, run_id: Id) -> Result<Run, dagvault_core::Error>;

    /// Update a run's status in place and return the updated row.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no run has `run_id`.
    async fn update_status(
        &self,
        run_id: Id,
        status: RunStatus,
    ) -> Result<Run, dagvault_core::Error>;

    /// List the most recent runs submitted by `username`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates backing-store errors.
    async fn list_by_user(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error>;

    /// List the most recent runs submitted against `tag`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates backing-store errors.
    async fn list_by_tag(
        &self,
        tag: &TagKey,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error>;

    /// Remove a run row, used to roll back an admission whose stream
    /// publish failed after the row was inserted. Idempotent: deleting an
    /// already-absent `run_id` is not an error.
    ///
    /// # Errors
    ///
    /// Propagates backing-store errors.
    async fn delete(&self, run_id: Id) -> Result<(), dagvault_core::Error>;
}

/// Admits new runs and serves the run-repository read/update operations
/// named in spec §4.8.
pub struct RunAdmission {
    catalog: Arc<dyn ArtifactCatalog>,
    blobs: Arc<dyn BlobStore>,
    publisher: Arc<dyn RunEventPublisher>,
    cache: Arc<dyn EphemeralCache>,
    runs: Arc<dyn RunRepository>,
}

impl RunAdmission {
    /// Construct a run admission service over an injected run repository.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn ArtifactCatalog>,
        blobs: Arc<dyn BlobStore>,
        publisher: Arc<dyn RunEventPublisher>,
        cache: Arc<dyn EphemeralCache>,
        runs: Arc<dyn RunRepository>,
    ) -> Self {
        Self {
            catalog,
            blobs,
            publisher,
            cache,
            runs,
        }
    }

    /// `CreateRun`: materialize `tag`'s current state, freeze it as a
    /// `run_snapshot` artifact, insert a queued run row, then publish the
    /// enqueue event last. If the publish fails, the inserted row is
    /// deleted so the run is never left visible without a matching event.
    ///
    /// # Errors
    ///
    /// Propagates catalog/blob-store/publisher errors. Returns
    /// [`dagvault_core::Error::Unavailable`] if the publisher fails — the
    /// caller should treat this as "the run was never admitted."
    pub async fn create_run(
        &self,
        tag: &TagKey,
        materialized: &MaterializedDocument,
        inputs: Value,
        submitter: &str,
    ) -> Result<(Id, Id), dagvault_core::Error> {
        let cas_id = self
            .blobs
            .put("application/json;type=workflow", Bytes::from(materialized.canonical_bytes.clone()))
            .await?;

        let (node_count, edge_count) = count_nodes_and_edges(&materialized.value);
        let plan_hash = materialized.version_hash.clone();
        let artifact_id = Id::new();
        self.catalog
            .create(Artifact {
                id: artifact_id,
                kind: ArtifactKind::RunSnapshot {
                    plan_hash: plan_hash.clone(),
                    version_hash: Some(materialized.version_hash.clone()),
                    node_count: Some(node_count),
                    edge_count: Some(edge_count),
                },
                cas_id,
                created_by: submitter.to_string(),
                created_at: Utc::now(),
                metadata: serde_json::json!({"tag": tag.tag_name.as_str()}),
            })
            .await?;

        let run_id = Id::new();
        let submitted_at = Utc::now();

        let run = Run {
            run_id,
            artifact_id,
            tag: tag.clone(),
            submitter: submitter.to_string(),
            status: RunStatus::Queued,
            submitted_at,
        };
        self.runs.insert(run).await?;

        // Stream append last (spec §4.8/§5): if it fails the row inserted
        // above must not remain visible, so roll it back.
        let publish_result = self
            .publisher
            .publish(RunEnqueued {
                run_id,
                artifact_id,
                tag: tag.clone(),
                username: submitter.to_string(),
                inputs: inputs.clone(),
                created_at: submitted_at.timestamp(),
            })
            .await;
        if let Err(err) = publish_result {
            self.runs.delete(run_id).await?;
            return Err(err);
        }

        tracing::info!(run_id = %run_id, artifact_id = %artifact_id, "run admitted");
        Ok((run_id, artifact_id))
    }

    /// Fetch a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no run has `run_id`.
    pub async fn get_run(&self, run_id: Id) -> Result<Run, dagvault_core::Error> {
        self.runs.get(run_id).await
    }

    /// Update a run's status in place.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no run has `run_id`.
    pub async fn update_run_status(
        &self,
        run_id: Id,
        status: RunStatus,
    ) -> Result<Run, dagvault_core::Error> {
        self.runs.update_status(run_id, status).await
    }

    /// List the most recent runs submitted by `username`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates backing-store errors.
    pub async fn list_by_user(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error> {
        self.runs.list_by_user(username, limit).await
    }

    /// List the most recent runs submitted against `tag`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates backing-store errors.
    pub async fn list_by_workflow_tag(
        &self,
        tag: &TagKey,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error> {
        self.runs.list_by_tag(tag, limit).await
    }

    /// `GetRunDetails`: the run row plus whatever of `ir:{run_id}` and
    /// `context:{run_id}` the ephemeral cache still holds. Cache misses on
    /// either never fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if no run has `run_id`.
    pub async fn get_run_details(&self, run_id: Id) -> Result<RunDetails, dagvault_core::Error> {
        let run = self.get_run(run_id).await?;
        let ir = self.cache.get(&ir_cache_key(run_id)).await.unwrap_or(None);
        let context = self
            .cache
            .get(&context_cache_key(run_id))
            .await
            .unwrap_or(None);
        Ok(RunDetails { run, ir, context })
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dagvault_cas::MemoryBlobStore;
    use dagvault_catalog::MemoryArtifactCatalog;

    fn admission() -> (RunAdmission, Arc<InMemoryRunEventPublisher>) {
        let catalog: Arc<dyn ArtifactCatalog> = Arc::new(MemoryArtifactCatalog::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::default());
        let publisher = Arc::new(InMemoryRunEventPublisher::new(16));
        let cache: Arc<dyn EphemeralCache> = Arc::new(InMemoryEphemeralCache::new());
        let runs: Arc<dyn RunRepository> = Arc::new(MemoryRunRepository::new());
        (
            RunAdmission::new(catalog, blobs, publisher.clone(), cache, runs),
            publisher,
        )
    }

    fn tag() -> TagKey {
        TagKey::new(
            dagvault_core::Username::new("alice").unwrap(),
            dagvault_core::TagName::new("main").unwrap(),
        )
    }

    fn materialized() -> MaterializedDocument {
        let value = serde_json::json!({"nodes": ["a"], "edges": []});
        MaterializedDocument {
            canonical_bytes: dagvault_core::canonical_json_bytes(&value),
            version_hash: dagvault_core::version_hash(&value),
            value,
        }
    }

    #[tokio::test]
    async fn create_run_admits_and_publishes_in_order() {
        let (admission, publisher) = admission();
        let mut subscriber = publisher.subscribe();
        let key = tag();

        let (run_id, artifact_id) = admission
            .create_run(&key, &materialized(), serde_json::json!({}), "alice")
            .await
            .unwrap();

        let run = admission.get_run(run_id).await.unwrap();
        assert_eq!(run.artifact_id, artifact_id);
        assert!(matches!(run.status, RunStatus::Queued));

        let event = subscriber.try_recv().unwrap();
        assert_eq!(event.run_id, run_id);
    }

    #[tokio::test]
    async fn update_status_and_list_by_user() {
        let (admission, _publisher) = admission();
        let key = tag();
        let (run_id, _) = admission
            .create_run(&key, &materialized(), serde_json::json!({}), "alice")
            .await
            .unwrap();

        let updated = admission
            .update_run_status(run_id, RunStatus::Running)
            .await
            .unwrap();
        assert!(matches!(updated.status, RunStatus::Running));

        let runs = admission.list_by_user("alice", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, run_id);

        let runs = admission.list_by_workflow_tag(&key, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn get_run_details_tolerates_cache_miss() {
        let (admission, _publisher) = admission();
        let key = tag();
        let (run_id, _) = admission
            .create_run(&key, &materialized(), serde_json::json!({}), "alice")
            .await
            .unwrap();

        let details = admission.get_run_details(run_id).await.unwrap();
        assert!(details.ir.is_none());
        assert!(details.context.is_none());
    }

    #[tokio::test]
    async fn get_run_details_returns_cached_ir_and_context() {
        let cache: Arc<dyn EphemeralCache> = Arc::new(InMemoryEphemeralCache::new());
        let admission_with_cache = RunAdmission::new(
            Arc::new(MemoryArtifactCatalog::new()),
            Arc::new(MemoryBlobStore::default()),
            Arc::new(LogRunEventPublisher),
            cache.clone(),
            Arc::new(MemoryRunRepository::new()),
        );
        let key = tag();
        let (run_id, _) = admission_with_cache
            .create_run(&key, &materialized(), serde_json::json!({}), "alice")
            .await
            .unwrap();

        cache
            .set(
                &ir_cache_key(run_id),
                serde_json::json!({"ir": true}),
                std::time::Duration::from_secs(60),
            )
            .await
            .unwrap();

        let details = admission_with_cache.get_run_details(run_id).await.unwrap();
        assert_eq!(details.ir, Some(serde_json::json!({"ir": true})));
        assert!(details.context.is_none());
    }

    #[test]
    fn run_status_round_trips_through_label() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.label()).unwrap(), status);
        }
    }
}
