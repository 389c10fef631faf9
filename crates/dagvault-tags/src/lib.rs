// SPDX-License-Identifier: Apache-2.0
//! Namespaced tag registry for DagVault.
//!
//! A tag is the only mutable entity in the data model: a `(username,
//! tag_name)` pointer to an artifact, moved under a per-row lock with an
//! append-only audit log (spec §4.4). `Move`/`CreateOrMove`/`Delete`/`Undo`/
//! `Redo` all serialize on that row lock; [`TagRegistry::compare_and_swap`]
//! is the deliberate exception that never blocks, trading the lock for a
//! single conditional `UPDATE`.
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod memory;
mod postgres;

pub use memory::MemoryTagRegistry;
pub use postgres::PgTagRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dagvault_core::{Id, TagName, Username};

/// Which of the three artifact kinds a tag currently points at.
///
/// Duplicated from `dagvault-catalog::ArtifactKind`'s discriminant rather
/// than depending on that crate: the tag registry only ever needs the
/// three-way label, never the kind-specific payload, and the donor
/// workspace's `ident.rs`/`attachment.rs` modules show the same preference
/// for a crate owning its own minimal copy of a shared vocabulary over a
/// dependency edge that exists only for one enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// A fully materialized workflow graph.
    DagVersion,
    /// An ordered JSON-Patch operation list.
    PatchSet,
    /// A frozen workflow tied to a submitted run.
    RunSnapshot,
}

impl TargetKind {
    /// The string discriminant stored in the `target_kind`/`to_kind`/
    /// `from_kind` columns.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::DagVersion => "dag_version",
            Self::PatchSet => "patch_set",
            Self::RunSnapshot => "run_snapshot",
        }
    }

    /// Parse the string discriminant back into a [`TargetKind`].
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::Integrity`] if `label` is not one of
    /// the three recognized kind strings.
    pub fn parse(label: &str) -> Result<Self, dagvault_core::Error> {
        match label {
            "dag_version" => Ok(Self::DagVersion),
            "patch_set" => Ok(Self::PatchSet),
            "run_snapshot" => Ok(Self::RunSnapshot),
            other => Err(dagvault_core::Error::Integrity {
                message: format!("unknown target kind {other:?}"),
            }),
        }
    }
}

/// `(username, tag_name)` — the tag's primary key. `username = "_global_"`
/// reserves system-wide tags (spec §4.4); ordinary callers construct
/// [`Username`]s that reject that literal value, so a [`TagKey`] can only
/// carry the reserved username via [`Username::global`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TagKey {
    /// Owning username, or the reserved global namespace.
    pub username: Username,
    /// Tag name within that namespace.
    pub tag_name: TagName,
}

impl TagKey {
    /// Construct a tag key.
    #[must_use]
    pub fn new(username: Username, tag_name: TagName) -> Self {
        Self { username, tag_name }
    }
}

/// A tag row: the current state of a `(username, tag_name)` pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// The tag's primary key.
    pub key: TagKey,
    /// Current target.
    pub target_kind: TargetKind,
    /// Current target id.
    pub target_id: Id,
    /// Current target version hash, if recorded.
    pub target_hash: Option<String>,
    /// Monotone version counter, incremented on every move.
    pub version: i64,
    /// Identity that performed the most recent move.
    pub last_mover: String,
    /// Timestamp of the most recent move.
    pub last_moved_at: DateTime<Utc>,
}

/// A single append-only row in the tag-move audit log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagMove {
    /// Monotone log id.
    pub id: i64,
    /// The tag this move applied to.
    pub key: TagKey,
    /// Previous target kind, `None` on the tag's creating move.
    pub from_kind: Option<TargetKind>,
    /// Previous target id, `None` on the tag's creating move.
    pub from_id: Option<Id>,
    /// New target kind.
    pub to_kind: TargetKind,
    /// New target id.
    pub to_id: Id,
    /// Identity that performed the move. Undo/redo tag this with a
    /// `" (undo)"`/`" (redo)"` suffix (spec §4.4) rather than overwriting
    /// the mover's own identity.
    pub mover: String,
    /// When the move was recorded.
    pub moved_at: DateTime<Utc>,
}

/// A requested new target for a tag move, before a log entry or version
/// number has been assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTarget {
    /// Kind of artifact to point at.
    pub kind: TargetKind,
    /// Id of the artifact to point at.
    pub id: Id,
    /// Version hash of the artifact, if known.
    pub hash: Option<String>,
}

/// Which direction a [`check_access`] call is checking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Reading a tag's current state or history.
    Read,
    /// Creating, moving, or deleting a tag.
    Write,
}

/// Namespacing access-control helper (spec §4.4): a caller may read their
/// own tags and all global tags; they may create/move/delete only their
/// own tags. Global-tag writes require an external admin gate this crate
/// does not itself enforce — admin tooling bypasses this helper entirely
/// rather than being granted `Access::Write` through it.
///
/// # Errors
///
/// Returns [`dagvault_core::Error::Unauthorized`] if `caller` may not
/// perform `access` against `key`.
pub fn check_access(
    access: Access,
    caller: &Username,
    key: &TagKey,
) -> Result<(), dagvault_core::Error> {
    let owns = *caller == key.username;
    let is_global = key.username.is_global();
    let allowed = match access {
        Access::Read => owns || is_global,
        Access::Write => owns,
    };
    if allowed {
        Ok(())
    } else {
        Err(dagvault_core::Error::Unauthorized {
            username: caller.to_string(),
            owner: key.username.to_string(),
            tag_name: key.tag_name.to_string(),
        })
    }
}

/// The tag registry.
#[async_trait]
pub trait TagRegistry: Send + Sync {
    /// Create a new tag at version 1. Rejects if the tag already exists.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::AlreadyExists`] if `key` already has
    /// a row.
    async fn create(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error>;

    /// Move an existing tag to a new target, incrementing its version.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if `key` has no row.
    async fn r#move(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error>;

    /// Create the tag if absent (version 1), or move it if present
    /// (version + 1).
    async fn create_or_move(
        &self,
        key: &TagKey,
        target: NewTarget,
        mover: &str,
    ) -> Result<Tag, dagvault_core::Error>;

    /// Optimistically move a tag only if its current version and target id
    /// match the caller's expectation. Never blocks on the tag row lock and
    /// never retries internally.
    ///
    /// Returns `Ok(false)` without mutating anything if the tag is absent or
    /// either guard fails; `Ok(true)` if the move committed.
    async fn compare_and_swap(
        &self,
        key: &TagKey,
        expected_version: i64,
        expected_target_id: Id,
        new_target: NewTarget,
        mover: &str,
    ) -> Result<bool, dagvault_core::Error>;

    /// Delete a tag.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if `key` has no row.
    async fn delete(&self, key: &TagKey, mover: &str) -> Result<(), dagvault_core::Error>;

    /// Fetch a tag's current state. `Ok(None)` if it does not exist — this
    /// is a lookup, not an error (spec §9 "error-for-control-flow").
    async fn get(&self, key: &TagKey) -> Result<Option<Tag>, dagvault_core::Error>;

    /// List all tags owned by `username` (exact match — no prefix scan).
    async fn list_by_username(&self, username: &Username) -> Result<Vec<Tag>, dagvault_core::Error>;

    /// List all tags in the reserved `_global_` namespace.
    async fn list_global(&self) -> Result<Vec<Tag>, dagvault_core::Error>;

    /// `list_by_username(username) ∪ list_global()`.
    async fn list_accessible(&self, username: &Username) -> Result<Vec<Tag>, dagvault_core::Error> {
        let mut tags = self.list_by_username(username).await?;
        tags.extend(self.list_global().await?);
        Ok(tags)
    }

    /// Undo the most recent move of `key`: find the latest move-log row
    /// whose `to` matches the tag's current target, and move back to that
    /// row's `from`.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if `key` has no row, or
    /// [`dagvault_core::Error::Validation`] if the current state has no
    /// prior target to undo to (the tag's creating move).
    async fn undo(&self, key: &TagKey, mover: &str) -> Result<Tag, dagvault_core::Error>;

    /// Redo: find the earliest move-log row whose `from` matches the tag's
    /// current target, and move forward to that row's `to`.
    ///
    /// # Errors
    ///
    /// Returns [`dagvault_core::Error::NotFound`] if `key` has no row, or
    /// [`dagvault_core::Error::Validation`] if there is nothing to redo to.
    async fn redo(&self, key: &TagKey, mover: &str) -> Result<Tag, dagvault_core::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Username {
        Username::new("alice").unwrap()
    }

    fn bob() -> Username {
        Username::new("bob").unwrap()
    }

    fn key(user: &Username, name: &str) -> TagKey {
        TagKey::new(user.clone(), TagName::new(name).unwrap())
    }

    #[test]
    fn owner_may_read_and_write_own_tag() {
        let a = alice();
        let k = key(&a, "main");
        assert!(check_access(Access::Read, &a, &k).is_ok());
        assert!(check_access(Access::Write, &a, &k).is_ok());
    }

    #[test]
    fn other_user_may_not_read_or_write() {
        let a = alice();
        let b = bob();
        let k = key(&a, "main");
        assert!(check_access(Access::Read, &b, &k).is_err());
        assert!(check_access(Access::Write, &b, &k).is_err());
    }

    #[test]
    fn anyone_may_read_global_but_not_write_through_this_helper() {
        let global_key = TagKey::new(Username::global(), TagName::new("release").unwrap());
        let a = alice();
        assert!(check_access(Access::Read, &a, &global_key).is_ok());
        assert!(check_access(Access::Write, &a, &global_key).is_err());
    }

    #[test]
    fn target_kind_round_trips_through_label() {
        for kind in [TargetKind::DagVersion, TargetKind::PatchSet, TargetKind::RunSnapshot] {
            assert_eq!(TargetKind::parse(kind.label()).unwrap(), kind);
        }
    }
}
