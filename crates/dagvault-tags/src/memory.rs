// SPDX-License-Identifier: Apache-2.0
//! In-memory [`TagRegistry`], for tests and for embedding.
//!
//! Writers serialize on a single `RwLock` rather than a per-row lock — a
//! reasonable in-process stand-in for the `SELECT … FOR UPDATE` chokepoint
//! [`dagvault_store::with_tag_lock`] provides for [`PgTagRegistry`]
//! (crate::postgres::PgTagRegistry).
// A poisoned lock means a prior writer panicked mid-mutation; there is no
// sane recovery short of process restart, so these propagate via panic.
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use dagvault_core::{Id, Username};

use crate::{check_access, Access, NewTarget, Tag, TagKey, TagMove, TagRegistry, TargetKind};

#[derive(Default)]
struct State {
    tags: HashMap<(String, String), Tag>,
    moves: Vec<TagMove>,
    next_move_id: i64,
}

impl State {
    fn record_move(
        &mut self,
        key: &TagKey,
        from: Option<(TargetKind, Id)>,
        to: (TargetKind, Id),
        mover: &str,
    ) {
        self.next_move_id += 1;
        self.moves.push(TagMove {
            id: self.next_move_id,
            key: key.clone(),
            from_kind: from.map(|(k, _)| k),
            from_id: from.map(|(_, id)| id),
            to_kind: to.0,
            to_id: to.1,
            mover: mover.to_string(),
            moved_at: Utc::now(),
        });
    }
}

/// In-memory [`TagRegistry`] backed by a `HashMap<(String, String), Tag>`
/// plus a `Vec<TagMove>` audit log, both behind one `RwLock`.
#[derive(Default)]
pub struct MemoryTagRegistry {
    state: RwLock<State>,
}

impl MemoryTagRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map_key(key: &TagKey) -> (String, String) {
        (key.username.to_string(), key.tag_name.to_string())
    }
}

#[async_trait]
impl TagRegistry for MemoryTagRegistry {
    async fn create(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error> {
        let mut state = self.state.write().expect("lock poisoned");
        let map_key = Self::map_key(key);
        if state.tags.contains_key(&map_key) {
            return Err(dagvault_core::Error::AlreadyExists {
                username: key.username.to_string(),
                tag_name: key.tag_name.to_string(),
            });
        }
        let tag = Tag {
            key: key.clone(),
            target_kind: target.kind,
            target_id: target.id,
            target_hash: target.hash,
            version: 1,
            last_mover: mover.to_string(),
            last_moved_at: Utc::now(),
        };
        state.record_move(key, None, (target.kind, target.id), mover);
        state.tags.insert(map_key, tag.clone());
        Ok(tag)
    }

    async fn r#move(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error> {
        let mut state = self.state.write().expect("lock poisoned");
        let map_key = Self::map_key(key);
        let current = state
            .tags
            .get(&map_key)
            .cloned()
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        let updated = Tag {
            target_kind: target.kind,
            target_id: target.id,
            target_hash: target.hash.clone(),
            version: current.version + 1,
            last_mover: mover.to_string(),
            last_moved_at: Utc::now(),
            ..current.clone()
        };
        state.record_move(
            key,
            Some((current.target_kind, current.target_id)),
            (target.kind, target.id),
            mover,
        );
        state.tags.insert(map_key, updated.clone());
        Ok(updated)
    }

    async fn create_or_move(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error> {
        let exists = {
            let state = self.state.read().expect("lock poisoned");
            state.tags.contains_key(&Self::map_key(key))
        };
        if exists {
            self.r#move(key, target, mover).await
        } else {
            self.create(key, target, mover).await
        }
    }

    async fn compare_and_swap(
        &self,
        key: &TagKey,
        expected_version: i64,
        expected_target_id: Id,
        new_target: NewTarget,
        mover: &str,
    ) -> Result<bool, dagvault_core::Error> {
        let mut state = self.state.write().expect("lock poisoned");
        let map_key = Self::map_key(key);
        let Some(current) = state.tags.get(&map_key).cloned() else {
            return Ok(false);
        };
        if current.version != expected_version || current.target_id != expected_target_id {
            return Ok(false);
        }
        let updated = Tag {
            target_kind: new_target.kind,
            target_id: new_target.id,
            target_hash: new_target.hash.clone(),
            version: current.version + 1,
            last_mover: mover.to_string(),
            last_moved_at: Utc::now(),
            ..current.clone()
        };
        state.record_move(
            key,
            Some((current.target_kind, current.target_id)),
            (new_target.kind, new_target.id),
            mover,
        );
        state.tags.insert(map_key, updated);
        Ok(true)
    }

    async fn delete(&self, key: &TagKey, mover: &str) -> Result<(), dagvault_core::Error> {
        let mut state = self.state.write().expect("lock poisoned");
        let map_key = Self::map_key(key);
        let current = state
            .tags
            .remove(&map_key)
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;
        // No "absent" target kind exists; the move log's `to` side keeps the
        // last live target so `tag_move` stays append-only even on delete.
        state.record_move(
            key,
            Some((current.target_kind, current.target_id)),
            (current.target_kind, current.target_id),
            &format!("{mover} (delete)"),
        );
        Ok(())
    }

    async fn get(&self, key: &TagKey) -> Result<Option<Tag>, dagvault_core::Error> {
        Ok(self
            .state
            .read()
            .expect("lock poisoned")
            .tags
            .get(&Self::map_key(key))
            .cloned())
    }

    async fn list_by_username(&self, username: &Username) -> Result<Vec<Tag>, dagvault_core::Error> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .tags
            .values()
            .filter(|t| t.key.username == *username)
            .cloned()
            .collect())
    }

    async fn list_global(&self) -> Result<Vec<Tag>, dagvault_core::Error> {
        self.list_by_username(&Username::global()).await
    }

    async fn undo(&self, key: &TagKey, mover: &str) -> Result<Tag, dagvault_core::Error> {
        let mut state = self.state.write().expect("lock poisoned");
        let map_key = Self::map_key(key);
        let current = state
            .tags
            .get(&map_key)
            .cloned()
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;

        let last_matching = state
            .moves
            .iter()
            .filter(|m| m.key == *key && m.to_id == current.target_id && m.to_kind == current.target_kind)
            .max_by_key(|m| m.id)
            .cloned();

        let Some(entry) = last_matching else {
            return Err(dagvault_core::Error::Validation {
                message: format!("no move history to undo for {}/{}", key.username, key.tag_name),
            });
        };
        let (Some(prior_kind), Some(prior_id)) = (entry.from_kind, entry.from_id) else {
            return Err(dagvault_core::Error::Validation {
                message: format!(
                    "{}/{} has no prior target to undo to",
                    key.username, key.tag_name
                ),
            });
        };

        let updated = Tag {
            target_kind: prior_kind,
            target_id: prior_id,
            target_hash: None,
            version: current.version + 1,
            last_mover: format!("{mover} (undo)"),
            last_moved_at: Utc::now(),
            ..current.clone()
        };
        state.record_move(
            key,
            Some((current.target_kind, current.target_id)),
            (prior_kind, prior_id),
            &format!("{mover} (undo)"),
        );
        state.tags.insert(map_key, updated.clone());
        Ok(updated)
    }

    async fn redo(&self, key: &TagKey, mover: &str) -> Result<Tag, dagvault_core::Error> {
        let mut state = self.state.write().expect("lock poisoned");
        let map_key = Self::map_key(key);
        let current = state
            .tags
            .get(&map_key)
            .cloned()
            .ok_or_else(|| dagvault_core::Error::tag_not_found(&key.username, &key.tag_name))?;

        let earliest_matching = state
            .moves
            .iter()
            .filter(|m| {
                m.key == *key
                    && m.from_id == Some(current.target_id)
                    && m.from_kind == Some(current.target_kind)
            })
            .min_by_key(|m| m.id)
            .cloned();

        let Some(entry) = earliest_matching else {
            return Err(dagvault_core::Error::Validation {
                message: format!("nothing to redo for {}/{}", key.username, key.tag_name),
            });
        };

        let updated = Tag {
            target_kind: entry.to_kind,
            target_id: entry.to_id,
            target_hash: None,
            version: current.version + 1,
            last_mover: format!("{mover} (redo)"),
            last_moved_at: Utc::now(),
            ..current.clone()
        };
        state.record_move(
            key,
            Some((current.target_kind, current.target_id)),
            (entry.to_kind, entry.to_id),
            &format!("{mover} (redo)"),
        );
        state.tags.insert(map_key, updated.clone());
        Ok(updated)
    }
}

/// Assert `caller` may perform `access` on `key`, via [`check_access`].
///
/// Convenience used by `dagvault-workflow` call sites that would otherwise
/// repeat the `check_access(...).map(|_| ...)` shape at every method.
///
/// # Errors
///
/// Propagates [`check_access`]'s error.
pub fn require_access(
    access: Access,
    caller: &Username,
    key: &TagKey,
) -> Result<(), dagvault_core::Error> {
    check_access(access, caller, key)
}
