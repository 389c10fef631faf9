// SPDX-License-Identifier: Apache-2.0
//! Pool construction and the `Db` handle repositories are built against.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while establishing the database pool.
#[derive(Debug, Error)]
pub enum DbError {
    /// Pool construction or an initial connection attempt failed.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),
}

/// A handle to the Postgres connection pool, shared (cheaply cloneable) by
/// every repository that needs one.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Returns the underlying pool, for repository crates that need to open
    /// their own transaction via `sqlx::Transaction`.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns the underlying `sqlx::Error` if the pool cannot hand out a
    /// connection or `BEGIN` fails.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}

/// Open a connection pool against `database_url`.
///
/// # Errors
///
/// Returns [`DbError::Connect`] if the pool cannot be constructed or an
/// initial connection cannot be established.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<Db, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(DbError::Connect)?;
    Ok(Db { pool })
}
