// SPDX-License-Identifier: Apache-2.0
//! Postgres-backed [`TagRegistry`], storing rows in `tag` and `tag_move`.
//!
//! Every write path but `compare_and_swap` opens its own transaction and
//! takes the row lock via [`dagvault_store::with_tag_lock`] before reading
//! current state, so concurrent writers targeting the same `(username,
//! tag_name)` serialize rather than race. `compare_and_swap` is the
//! documented exception: a single conditional `UPDATE` whose `WHERE` clause
//! re-checks `version`, relying on Postgres row-version semantics rather
//! than an explicit lock.

use async_trait::async_trait;
use chrono::Utc;
use dagvault_core::{Id, Username};
use dagvault_store::{with_tag_lock, Db, LockedTagRow};
use sqlx::Row;

use crate::{NewTarget, Tag, TagKey, TagMove, TagRegistry, TargetKind};

/// [`TagRegistry`] backed by the `tag` and `tag_move` tables via a shared
/// [`Db`] pool.
pub struct PgTagRegistry {
    db: Db,
}

impl PgTagRegistry {
    /// Wrap a connection pool as a tag registry.
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn locked_row_to_tag(key: &TagKey, row: &LockedTagRow) -> Result<Tag, dagvault_core::Error> {
    Ok(Tag {
        key: key.clone(),
        target_kind: TargetKind::parse(&row.target_kind)?,
        target_id: Id::from_uuid(row.target_id),
        target_hash: row.target_hash.clone(),
        version: row.version,
        last_mover: String::new(),
        last_moved_at: Utc::now(),
    })
}

async fn insert_move(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &TagKey,
    from: Option<(TargetKind, Id)>,
    to: (TargetKind, Id),
    mover: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"insert into tag_move
            (username, tag_name, from_kind, from_id, to_kind, to_id, mover, moved_at)
          values ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(key.username.as_str())
    .bind(key.tag_name.as_str())
    .bind(from.map(|(k, _)| k.label()))
    .bind(from.map(|(_, id)| id.as_uuid()))
    .bind(to.0.label())
    .bind(to.1.as_uuid())
    .bind(mover)
    .bind(Utc::now())
    .execute(&mut **txn)
    .await?;
    Ok(())
}

#[async_trait]
impl TagRegistry for PgTagRegistry {
    async fn create(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error> {
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("begin transaction failed: {e}"),
            })?;

        let existing = with_tag_lock(&mut txn, key.username.as_str(), key.tag_name.as_str())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("tag lock failed: {e}"),
            })?;
        if existing.is_some() {
            return Err(dagvault_core::Error::AlreadyExists {
                username: key.username.to_string(),
                tag_name: key.tag_name.to_string(),
            });
        }

        let now = Utc::now();
        sqlx::query(
            r"insert into tag
                (username, tag_name, target_kind, target_id, target_hash, version,
                 last_mover, last_moved_at)
              values ($1, $2, $3, $4, $5, 1, $6, $7)",
        )
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .bind(target.kind.label())
        .bind(target.id.as_uuid())
        .bind(&target.hash)
        .bind(mover)
        .bind(now)
        .execute(&mut *txn)
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag insert failed: {e}"),
        })?;

        insert_move(&mut txn, key, None, (target.kind, target.id), mover)
            .await
            .map_err(|e| dagvault_core::Error::Integrity {
                message: format!("tag_move insert failed: {e}"),
            })?;

        txn.commit()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("commit failed: {e}"),
            })?;

        Ok(Tag {
            key: key.clone(),
            target_kind: target.kind,
            target_id: target.id,
            target_hash: target.hash,
            version: 1,
            last_mover: mover.to_string(),
            last_moved_at: now,
        })
    }

    async fn r#move(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error> {
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("begin transaction failed: {e}"),
            })?;

        let locked = with_tag_lock(&mut txn, key.username.as_str(), key.tag_name.as_str())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("tag lock failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let current = locked_row_to_tag(key, &locked)?;

        let now = Utc::now();
        let new_version = current.version + 1;
        sqlx::query(
            r"update tag
              set target_kind = $1, target_id = $2, target_hash = $3,
                  version = $4, last_mover = $5, last_moved_at = $6
              where username = $7 and tag_name = $8",
        )
        .bind(target.kind.label())
        .bind(target.id.as_uuid())
        .bind(&target.hash)
        .bind(new_version)
        .bind(mover)
        .bind(now)
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .execute(&mut *txn)
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag update failed: {e}"),
        })?;

        insert_move(
            &mut txn,
            key,
            Some((current.target_kind, current.target_id)),
            (target.kind, target.id),
            mover,
        )
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag_move insert failed: {e}"),
        })?;

        txn.commit()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("commit failed: {e}"),
            })?;

        Ok(Tag {
            key: key.clone(),
            target_kind: target.kind,
            target_id: target.id,
            target_hash: target.hash,
            version: new_version,
            last_mover: mover.to_string(),
            last_moved_at: now,
        })
    }

    async fn create_or_move(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error> {
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("begin transaction failed: {e}"),
            })?;

        let locked = with_tag_lock(&mut txn, key.username.as_str(), key.tag_name.as_str())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("tag lock failed: {e}"),
            })?;

        let now = Utc::now();
        let (from, new_version) = match &locked {
            Some(row) => {
                let current = locked_row_to_tag(key, row)?;
                (
                    Some((current.target_kind, current.target_id)),
                    current.version + 1,
                )
            }
            None => (None, 1),
        };

        if locked.is_some() {
            sqlx::query(
                r"update tag
                  set target_kind = $1, target_id = $2, target_hash = $3,
                      version = $4, last_mover = $5, last_moved_at = $6
                  where username = $7 and tag_name = $8",
            )
            .bind(target.kind.label())
            .bind(target.id.as_uuid())
            .bind(&target.hash)
            .bind(new_version)
            .bind(mover)
            .bind(now)
            .bind(key.username.as_str())
            .bind(key.tag_name.as_str())
            .execute(&mut *txn)
            .await
        } else {
            sqlx::query(
                r"insert into tag
                    (username, tag_name, target_kind, target_id, target_hash, version,
                     last_mover, last_moved_at)
                  values ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(key.username.as_str())
            .bind(key.tag_name.as_str())
            .bind(target.kind.label())
            .bind(target.id.as_uuid())
            .bind(&target.hash)
            .bind(new_version)
            .bind(mover)
            .bind(now)
            .execute(&mut *txn)
            .await
        }
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag upsert failed: {e}"),
        })?;

        insert_move(&mut txn, key, from, (target.kind, target.id), mover)
            .await
            .map_err(|e| dagvault_core::Error::Integrity {
                message: format!("tag_move insert failed: {e}"),
            })?;

        txn.commit()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("commit failed: {e}"),
            })?;

        Ok(Tag {
            key: key.clone(),
            target_kind: target.kind,
            target_id: target.id,
            target_hash: target.hash,
            version: new_version,
            last_mover: mover.to_string(),
            last_moved_at: now,
        })
    }

    async fn compare_and_swap(
        &self,
        key: &TagKey,
        expected_version: i64,
        expected_target_id: Id,
        new_target: NewTarget,
        mover: &str,
    ) -> Result<bool, dagvault_core::Error> {
        // No row lock (spec §4.4: this call must never block). A plain read
        // first, re-validated inside the `UPDATE ... WHERE` clause below, so
        // a racing writer sees zero rows affected rather than a stale write.
        let Some(before) = sqlx::query(
            r"select target_kind from tag
              where username = $1 and tag_name = $2 and version = $3 and target_id = $4",
        )
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .bind(expected_version)
        .bind(expected_target_id.as_uuid())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("compare-and-swap read failed: {e}"),
        })?
        else {
            return Ok(false);
        };
        let prior_kind: String = before.get("target_kind");

        let now = Utc::now();
        let result = sqlx::query(
            r"update tag
              set target_kind = $1, target_id = $2, target_hash = $3,
                  version = $4, last_mover = $5, last_moved_at = $6
              where username = $7 and tag_name = $8
                and version = $9 and target_id = $10",
        )
        .bind(new_target.kind.label())
        .bind(new_target.id.as_uuid())
        .bind(&new_target.hash)
        .bind(expected_version + 1)
        .bind(mover)
        .bind(now)
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .bind(expected_version)
        .bind(expected_target_id.as_uuid())
        .execute(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("compare-and-swap update failed: {e}"),
        })?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r"insert into tag_move
                (username, tag_name, from_kind, from_id, to_kind, to_id, mover, moved_at)
              values ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .bind(&prior_kind)
        .bind(expected_target_id.as_uuid())
        .bind(new_target.kind.label())
        .bind(new_target.id.as_uuid())
        .bind(mover)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag_move insert failed: {e}"),
        })?;

        Ok(true)
    }

    async fn delete(&self, key: &TagKey, mover: &str) -> Result<(), dagvault_core::Error> {
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("begin transaction failed: {e}"),
            })?;

        let locked = with_tag_lock(&mut txn, key.username.as_str(), key.tag_name.as_str())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("tag lock failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let current = locked_row_to_tag(key, &locked)?;

        sqlx::query("delete from tag where username = $1 and tag_name = $2")
            .bind(key.username.as_str())
            .bind(key.tag_name.as_str())
            .execute(&mut *txn)
            .await
            .map_err(|e| dagvault_core::Error::Integrity {
                message: format!("tag delete failed: {e}"),
            })?;

        insert_move(
            &mut txn,
            key,
            Some((current.target_kind, current.target_id)),
            (current.target_kind, current.target_id),
            &format!("{mover} (delete)"),
        )
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag_move insert failed: {e}"),
        })?;

        txn.commit()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("commit failed: {e}"),
            })
    }

    async fn get(&self, key: &TagKey) -> Result<Option<Tag>, dagvault_core::Error> {
        let row = sqlx::query(
            r"select target_kind, target_id, target_hash, version, last_mover, last_moved_at
              from tag where username = $1 and tag_name = $2",
        )
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("tag lookup failed: {e}"),
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let target_kind: String = row.get("target_kind");
        Ok(Some(Tag {
            key: key.clone(),
            target_kind: TargetKind::parse(&target_kind)?,
            target_id: Id::from_uuid(row.get("target_id")),
            target_hash: row.get("target_hash"),
            version: row.get("version"),
            last_mover: row.get("last_mover"),
            last_moved_at: row.get("last_moved_at"),
        }))
    }

    async fn list_by_username(
        &self,
        username: &Username,
    ) -> Result<Vec<Tag>, dagvault_core::Error> {
        let rows = sqlx::query(
            r"select tag_name, target_kind, target_id, target_hash, version,
                     last_mover, last_moved_at
              from tag where username = $1",
        )
        .bind(username.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("tag list failed: {e}"),
        })?;

        rows.into_iter()
            .map(|row| {
                let tag_name: String = row.get("tag_name");
                let target_kind: String = row.get("target_kind");
                Ok(Tag {
                    key: TagKey::new(
                        username.clone(),
                        dagvault_core::TagName::new_unchecked(tag_name),
                    ),
                    target_kind: TargetKind::parse(&target_kind)?,
                    target_id: Id::from_uuid(row.get("target_id")),
                    target_hash: row.get("target_hash"),
                    version: row.get("version"),
                    last_mover: row.get("last_mover"),
                    last_moved_at: row.get("last_moved_at"),
                })
            })
            .collect()
    }

    async fn list_global(&self) -> Result<Vec<Tag>, dagvault_core::Error> {
        self.list_by_username(&Username::global()).await
    }

    async fn undo(&self, key: &TagKey, mover: &str) -> Result<Tag, dagvault_core::Error> {
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("begin transaction failed: {e}"),
            })?;

        let locked = with_tag_lock(&mut txn, key.username.as_str(), key.tag_name.as_str())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("tag lock failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let current = locked_row_to_tag(key, &locked)?;

        let entry = sqlx::query(
            r"select from_kind, from_id
              from tag_move
              where username = $1 and tag_name = $2 and to_kind = $3 and to_id = $4
              order by id desc limit 1",
        )
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .bind(current.target_kind.label())
        .bind(current.target_id.as_uuid())
        .fetch_optional(&mut *txn)
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("tag_move lookup failed: {e}"),
        })?
        .ok_or_else(|| dagvault_core::Error::Validation {
            message: format!(
                "no move history to undo for {}/{}",
                key.username, key.tag_name
            ),
        })?;

        let from_kind: Option<String> = entry.get("from_kind");
        let from_id: Option<uuid::Uuid> = entry.get("from_id");
        let (Some(from_kind), Some(from_id)) = (from_kind, from_id) else {
            return Err(dagvault_core::Error::Validation {
                message: format!(
                    "{}/{} has no prior target to undo to",
                    key.username, key.tag_name
                ),
            });
        };
        let prior_kind = TargetKind::parse(&from_kind)?;
        let prior_id = Id::from_uuid(from_id);

        let now = Utc::now();
        let new_version = current.version + 1;
        let undo_mover = format!("{mover} (undo)");
        sqlx::query(
            r"update tag
              set target_kind = $1, target_id = $2, target_hash = NULL,
                  version = $3, last_mover = $4, last_moved_at = $5
              where username = $6 and tag_name = $7",
        )
        .bind(prior_kind.label())
        .bind(prior_id.as_uuid())
        .bind(new_version)
        .bind(&undo_mover)
        .bind(now)
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .execute(&mut *txn)
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag update failed: {e}"),
        })?;

        insert_move(
            &mut txn,
            key,
            Some((current.target_kind, current.target_id)),
            (prior_kind, prior_id),
            &undo_mover,
        )
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag_move insert failed: {e}"),
        })?;

        txn.commit()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("commit failed: {e}"),
            })?;

        Ok(Tag {
            key: key.clone(),
            target_kind: prior_kind,
            target_id: prior_id,
            target_hash: None,
            version: new_version,
            last_mover: undo_mover,
            last_moved_at: now,
        })
    }

    async fn redo(&self, key: &TagKey, mover: &str) -> Result<Tag, dagvault_core::Error> {
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("begin transaction failed: {e}"),
            })?;

        let locked = with_tag_lock(&mut txn, key.username.as_str(), key.tag_name.as_str())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("tag lock failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let current = locked_row_to_tag(key, &locked)?;

        let entry = sqlx::query(
            r"select to_kind, to_id
              from tag_move
              where username = $1 and tag_name = $2 and from_kind = $3 and from_id = $4
              order by id asc limit 1",
        )
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .bind(current.target_kind.label())
        .bind(current.target_id.as_uuid())
        .fetch_optional(&mut *txn)
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("tag_move lookup failed: {e}"),
        })?
        .ok_or_else(|| dagvault_core::Error::Validation {
            message: format!("nothing to redo for {}/{}", key.username, key.tag_name),
        })?;

        let to_kind: String = entry.get("to_kind");
        let to_id: uuid::Uuid = entry.get("to_id");
        let next_kind = TargetKind::parse(&to_kind)?;
        let next_id = Id::from_uuid(to_id);

        let now = Utc::now();
        let new_version = current.version + 1;
        let redo_mover = format!("{mover} (redo)");
        sqlx::query(
            r"update tag
              set target_kind = $1, target_id = $2, target_hash = NULL,
                  version = $3, last_mover = $4, last_moved_at = $5
              where username = $6 and tag_name = $7",
        )
        .bind(next_kind.label())
        .bind(next_id.as_uuid())
        .bind(new_version)
        .bind(&redo_mover)
        .bind(now)
        .bind(key.username.as_str())
        .bind(key.tag_name.as_str())
        .execute(&mut *txn)
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag update failed: {e}"),
        })?;

        insert_move(
            &mut txn,
            key,
            Some((current.target_kind, current.target_id)),
            (next_kind, next_id),
            &redo_mover,
        )
        .await
        .map_err(|e| dagvault_core::Error::Integrity {
            message: format!("tag_move insert failed: {e}"),
        })?;

        txn.commit()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("commit failed: {e}"),
            })?;

        Ok(Tag {
            key: key.clone(),
            target_kind: next_kind,
            target_id: next_id,
            target_hash: None,
            version: new_version,
            last_mover: redo_mover,
            last_moved_at: now,
        })
    }
}
