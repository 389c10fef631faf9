// SPDX-License-Identifier: Apache-2.0
//! Postgres-backed [`BlobStore`], storing blobs in the `cas_blob` table.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use dagvault_store::Db;
use sqlx::Row;

use crate::{hash, verify_integrity, Blob, BlobStore, CasId};

/// [`BlobStore`] backed by the `cas_blob` table via a shared [`Db`] pool.
pub struct PgBlobStore {
    db: Db,
}

impl PgBlobStore {
    /// Wrap a connection pool as a blob store.
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[allow(clippy::cast_sign_loss)]
fn row_to_blob(cas_id: CasId, row: &sqlx::postgres::PgRow) -> Blob {
    let content: Option<Vec<u8>> = row.get("content");
    Blob {
        cas_id,
        media_type: row.get("media_type"),
        size: row.get::<i64, _>("size_bytes") as u64,
        content: content.map(Bytes::from),
        external_url: row.get("external_url"),
    }
}

#[async_trait]
impl BlobStore for PgBlobStore {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    async fn put(&self, media_type: &str, bytes: Bytes) -> Result<CasId, dagvault_core::Error> {
        let cas_id = hash(&bytes);
        let size = bytes.len() as i64;
        sqlx::query(
            r"insert into cas_blob (cas_id, media_type, size_bytes, content)
              values ($1, $2, $3, $4)
              on conflict (cas_id) do nothing",
        )
        .bind(cas_id.to_string())
        .bind(media_type)
        .bind(size)
        .bind(bytes.as_ref())
        .execute(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("cas put failed: {e}"),
        })?;
        Ok(cas_id)
    }

    async fn get(&self, cas_id: CasId) -> Result<Blob, dagvault_core::Error> {
        let row = sqlx::query(
            r"select media_type, size_bytes, content, external_url
              from cas_blob where cas_id = $1",
        )
        .bind(cas_id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("cas get failed: {e}"),
        })?;

        let row = row.ok_or_else(|| dagvault_core::Error::blob_not_found(cas_id.to_string()))?;
        let blob = row_to_blob(cas_id, &row);
        verify_integrity(&blob)?;
        Ok(blob)
    }

    async fn get_many(
        &self,
        cas_ids: &[CasId],
    ) -> Result<HashMap<CasId, Blob>, dagvault_core::Error> {
        if cas_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<String> = cas_ids.iter().map(ToString::to_string).collect();
        let rows = sqlx::query(
            r"select cas_id, media_type, size_bytes, content, external_url
              from cas_blob where cas_id = any($1)",
        )
        .bind(&ids)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("cas get_many failed: {e}"),
        })?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in &rows {
            let raw_id: String = row.get("cas_id");
            let cas_id: CasId = raw_id.parse().map_err(|_| dagvault_core::Error::Integrity {
                message: format!("cas_blob row has unparseable cas_id {raw_id:?}"),
            })?;
            found.insert(cas_id, row_to_blob(cas_id, row));
        }

        let missing_count = cas_ids.len() - found.len();
        if missing_count > 0 {
            tracing::warn!(missing_count, "get_many: some cas ids were not found");
        }
        Ok(found)
    }

    async fn exists(&self, cas_id: CasId) -> Result<bool, dagvault_core::Error> {
        let row = sqlx::query("select 1 from cas_blob where cas_id = $1")
            .bind(cas_id.to_string())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("cas exists check failed: {e}"),
            })?;
        Ok(row.is_some())
    }
}
