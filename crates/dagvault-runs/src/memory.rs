// SPDX-License-Identifier: Apache-2.0
//! In-memory [`RunRepository`], mirroring the shape a real partitioned
//! `run` table gives `RunAdmission`: insert-once rows, filtered listing by
//! submitter or by tag, in-place status updates.
// A poisoned lock means a prior writer panicked mid-mutation; there is no
// sane recovery short of process restart, so these propagate via panic.
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use dagvault_core::Id;
use dagvault_tags::TagKey;

use crate::{Run, RunRepository, RunStatus};

/// [`RunRepository`] backed by a `HashMap` behind one `RwLock`. Used by
/// tests and by the CLI's `--store memory` mode; does not survive process
/// exit.
#[derive(Default)]
pub struct MemoryRunRepository {
    runs: RwLock<HashMap<Id, Run>>,
}

impl MemoryRunRepository {
    /// Create an empty run repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn insert(&self, run: Run) -> Result<(), dagvault_core::Error> {
        self.runs.write().expect("lock poisoned").insert(run.run_id, run);
        Ok(())
    }

    async fn get(&self, run_id: Id) -> Result<Run, dagvault_core::Error> {
        self.runs
            .read()
            .expect("lock poisoned")
            .get(&run_id)
            .cloned()
            .ok_or_else(|| dagvault_core::Error::NotFound {
                resource: "run",
                reference: run_id.to_string(),
            })
    }

    async fn update_status(
        &self,
        run_id: Id,
        status: RunStatus,
    ) -> Result<Run, dagvault_core::Error> {
        let mut runs = self.runs.write().expect("lock poisoned");
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| dagvault_core::Error::NotFound {
                resource: "run",
                reference: run_id.to_string(),
            })?;
        run.status = status;
        Ok(run.clone())
    }

    async fn list_by_user(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error> {
        let runs = self.runs.read().expect("lock poisoned");
        let mut out: Vec<Run> = runs
            .values()
            .filter(|r| r.submitter == username)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn list_by_tag(
        &self,
        tag: &TagKey,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error> {
        let runs = self.runs.read().expect("lock poisoned");
        let mut out: Vec<Run> = runs.values().filter(|r| &r.tag == tag).cloned().collect();
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn delete(&self, run_id: Id) -> Result<(), dagvault_core::Error> {
        self.runs.write().expect("lock poisoned").remove(&run_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tag() -> TagKey {
        TagKey::new(
            dagvault_core::Username::new("alice").unwrap(),
            dagvault_core::TagName::new("main").unwrap(),
        )
    }

    fn run(run_id: Id, submitter: &str) -> Run {
        Run {
            run_id,
            artifact_id: Id::new(),
            tag: tag(),
            submitter: submitter.to_string(),
            status: RunStatus::Queued,
            submitted_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_missing_run_is_not_found() {
        let repo = MemoryRunRepository::new();
        let err = repo.get(Id::new()).await.unwrap_err();
        assert!(matches!(err, dagvault_core::Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn insert_then_update_status_round_trips() {
        let repo = MemoryRunRepository::new();
        let id = Id::new();
        repo.insert(run(id, "alice")).await.unwrap();

        let updated = repo.update_status(id, RunStatus::Running).await.unwrap();
        assert!(matches!(updated.status, RunStatus::Running));
        assert!(matches!(repo.get(id).await.unwrap().status, RunStatus::Running));
    }

    #[tokio::test]
    async fn list_by_user_filters_and_truncates() {
        let repo = MemoryRunRepository::new();
        for _ in 0..3 {
            repo.insert(run(Id::new(), "alice")).await.unwrap();
        }
        repo.insert(run(Id::new(), "bob")).await.unwrap();

        let alice_runs = repo.list_by_user("alice", 2).await.unwrap();
        assert_eq!(alice_runs.len(), 2);
        assert!(alice_runs.iter().all(|r| r.submitter == "alice"));
    }

    #[tokio::test]
    async fn list_by_tag_matches_only_that_tag() {
        let repo = MemoryRunRepository::new();
        let id = Id::new();
        repo.insert(run(id, "alice")).await.unwrap();

        let other_tag = TagKey::new(
            dagvault_core::Username::new("alice").unwrap(),
            dagvault_core::TagName::new("other").unwrap(),
        );
        let found = repo.list_by_tag(&tag(), 10).await.unwrap();
        assert_eq!(found.len(), 1);
        let not_found = repo.list_by_tag(&other_tag, 10).await.unwrap();
        assert!(not_found.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let repo = MemoryRunRepository::new();
        let id = Id::new();
        repo.insert(run(id, "alice")).await.unwrap();

        repo.delete(id).await.unwrap();
        let err = repo.get(id).await.unwrap_err();
        assert!(matches!(err, dagvault_core::Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_of_missing_run_is_not_an_error() {
        let repo = MemoryRunRepository::new();
        repo.delete(Id::new()).await.unwrap();
    }
}
