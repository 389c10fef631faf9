// SPDX-License-Identifier: Apache-2.0
//! The single chokepoint every tag-row writer goes through to linearize on
//! a tag, per spec §5 ("Tag updates are linearized by a per-row lock").

use sqlx::Row;
use uuid::Uuid;

/// A tag row as observed under `SELECT … FOR UPDATE`, before the caller
/// decides what to do with it. `None` means the row does not exist yet
/// (legal — `Create` and `CreateOrMove` both call through this path).
#[derive(Debug, Clone)]
pub struct LockedTagRow {
    /// Current target artifact kind.
    pub target_kind: String,
    /// Current target artifact id.
    pub target_id: Uuid,
    /// Current target version hash, if recorded.
    pub target_hash: Option<String>,
    /// Current monotone version counter.
    pub version: i64,
}

/// Lock the `(username, tag_name)` row for the remainder of `txn`.
///
/// Every write-path method on the tag registry (`Move`, `CreateOrMove`,
/// `Delete`, `Undo`, `Redo`) should call this before reading the tag's
/// current state, so that two concurrent writers targeting the same tag
/// serialize on the row lock rather than racing. `CompareAndSwap` is the
/// deliberate exception (spec §4.4: it must never block) and instead issues
/// a single conditional `UPDATE` with no prior lock.
///
/// # Errors
///
/// Returns the underlying `sqlx::Error` if the lock query fails.
pub async fn with_tag_lock(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    username: &str,
    tag_name: &str,
) -> Result<Option<LockedTagRow>, sqlx::Error> {
    let row = sqlx::query(
        r"select target_kind, target_id, target_hash, version
          from tag
          where username = $1 and tag_name = $2
          for update",
    )
    .bind(username)
    .bind(tag_name)
    .fetch_optional(&mut **txn)
    .await?;

    Ok(row.map(|r| LockedTagRow {
        target_kind: r.get("target_kind"),
        target_id: r.get("target_id"),
        target_hash: r.get("target_hash"),
        version: r.get("version"),
    }))
}
