// SPDX-License-Identifier: Apache-2.0
//! Postgres-backed [`RunRepository`], storing rows in the `run` table.
//!
//! `tags_snapshot` carries the run's one-tag mapping as a JSON object
//! (`{"username", "tag_name", "artifact_id"}`) rather than a second copy of
//! `base_ref` in a differently-shaped column — spec §3 names "tags-snapshot
//! mapping" as a distinct field from `base-ref`, and a JSON object is the
//! natural way to let a future multi-tag admission flow extend this to more
//! than one entry without a migration. No index over `tags_snapshot` is
//! defined (spec §6 requires only `run(submitted_by, submitted_at desc)`),
//! so `list_by_tag` queries it with a plain predicate on the JSON fields.

use async_trait::async_trait;
use dagvault_core::{Id, TagName, Username};
use dagvault_store::Db;
use dagvault_tags::TagKey;
use sqlx::Row;

use crate::{Run, RunRepository, RunStatus};

/// [`RunRepository`] backed by the `run` table via a shared [`Db`] pool.
pub struct PgRunRepository {
    db: Db,
}

impl PgRunRepository {
    /// Wrap a connection pool as a run repository.
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<Run, dagvault_core::Error> {
    let run_id = Id::from_uuid(row.get::<uuid::Uuid, _>("id"));
    let artifact_id = Id::from_uuid(row.get::<uuid::Uuid, _>("base_ref"));
    let tags_snapshot: serde_json::Value = row.get("tags_snapshot");
    let username_raw = tags_snapshot
        .get("username")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| dagvault_core::Error::Integrity {
            message: format!("run {run_id} has malformed tags_snapshot (missing username)"),
        })?;
    let tag_name_raw = tags_snapshot
        .get("tag_name")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| dagvault_core::Error::Integrity {
            message: format!("run {run_id} has malformed tags_snapshot (missing tag_name)"),
        })?;
    let username = Username::new(username_raw).map_err(|e| dagvault_core::Error::Integrity {
        message: format!("run {run_id} has invalid username in tags_snapshot: {e}"),
    })?;
    let tag_name = TagName::new(tag_name_raw).map_err(|e| dagvault_core::Error::Integrity {
        message: format!("run {run_id} has invalid tag_name in tags_snapshot: {e}"),
    })?;

    let status: String = row.get("status");
    Ok(Run {
        run_id,
        artifact_id,
        tag: TagKey::new(username, tag_name),
        submitter: row.get("submitted_by"),
        status: RunStatus::parse(&status)?,
        submitted_at: row.get("submitted_at"),
    })
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn insert(&self, run: Run) -> Result<(), dagvault_core::Error> {
        let tags_snapshot = serde_json::json!({
            "username": run.tag.username.as_str(),
            "tag_name": run.tag.tag_name.as_str(),
            "artifact_id": run.artifact_id.to_string(),
        });

        sqlx::query(
            r"insert into run
                (id, base_kind, base_ref, tags_snapshot, status, submitted_by, submitted_at)
              values ($1, 'dag_version', $2, $3, $4, $5, $6)",
        )
        .bind(run.run_id.as_uuid())
        .bind(run.artifact_id.as_uuid())
        .bind(tags_snapshot)
        .bind(run.status.label())
        .bind(&run.submitter)
        .bind(run.submitted_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("run insert failed: {e}"),
        })?;
        Ok(())
    }

    async fn get(&self, run_id: Id) -> Result<Run, dagvault_core::Error> {
        let row = sqlx::query("select * from run where id = $1")
            .bind(run_id.as_uuid())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("run lookup failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::run_not_found(run_id))?;
        row_to_run(&row)
    }

    async fn update_status(
        &self,
        run_id: Id,
        status: RunStatus,
    ) -> Result<Run, dagvault_core::Error> {
        let row = sqlx::query("update run set status = $1 where id = $2 returning *")
            .bind(status.label())
            .bind(run_id.as_uuid())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("run status update failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::run_not_found(run_id))?;
        row_to_run(&row)
    }

    async fn list_by_user(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "select * from run where submitted_by = $1 order by submitted_at desc limit $2",
        )
        .bind(username)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("run list failed: {e}"),
        })?;
        rows.iter().map(row_to_run).collect()
    }

    async fn list_by_tag(
        &self,
        tag: &TagKey,
        limit: usize,
    ) -> Result<Vec<Run>, dagvault_core::Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"select * from run
              where tags_snapshot ->> 'username' = $1
                and tags_snapshot ->> 'tag_name' = $2
              order by submitted_at desc
              limit $3",
        )
        .bind(tag.username.as_str())
        .bind(tag.tag_name.as_str())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("run list failed: {e}"),
        })?;
        rows.iter().map(row_to_run).collect()
    }

    async fn delete(&self, run_id: Id) -> Result<(), dagvault_core::Error> {
        sqlx::query("delete from run where id = $1")
            .bind(run_id.as_uuid())
            .execute(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("run delete failed: {e}"),
            })?;
        Ok(())
    }
}
