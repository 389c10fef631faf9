// SPDX-License-Identifier: Apache-2.0
//! Postgres connection pooling, transaction helpers, and the schema
//! migration for DagVault's relational store.
//!
//! This crate is the one place that knows how to open a pool and run a
//! transaction; every repository crate (`dagvault-cas`, `dagvault-catalog`,
//! `dagvault-patchchain`, `dagvault-tags`, `dagvault-runs`) depends on it for
//! that plumbing instead of constructing its own `PgPool`.
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod lock;
mod pool;

pub use lock::{with_tag_lock, LockedTagRow};
pub use pool::{connect, Db, DbError};

/// SQL migrations embedded at build time so `dagvault-store::migrate` can
/// run them against a fresh database without a separate migration binary.
pub static MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("migrations");
