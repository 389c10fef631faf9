// SPDX-License-Identifier: Apache-2.0
//! In-memory content-addressed blob store, for tests and for embedding in
//! single-process tools.
// A poisoned lock means a prior writer panicked mid-mutation; there is no
// sane recovery short of process restart, so these propagate via panic.
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{hash, verify_integrity, Blob, BlobStore, CasId};

/// In-memory [`BlobStore`] backed by a `HashMap<CasId, Blob>` behind a
/// `RwLock`. No eviction or byte budget — callers that need bounded memory
/// should use [`PgBlobStore`](crate::PgBlobStore) instead.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<CasId, Blob>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no blobs are stored.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    #[allow(clippy::cast_possible_truncation)]
    async fn put(&self, media_type: &str, bytes: Bytes) -> Result<CasId, dagvault_core::Error> {
        let cas_id = hash(&bytes);
        let mut blobs = self.blobs.write().expect("lock poisoned");
        blobs.entry(cas_id).or_insert_with(|| Blob {
            cas_id,
            media_type: media_type.to_string(),
            size: bytes.len() as u64,
            content: Some(bytes),
            external_url: None,
        });
        Ok(cas_id)
    }

    async fn get(&self, cas_id: CasId) -> Result<Blob, dagvault_core::Error> {
        let blob = {
            let blobs = self.blobs.read().expect("lock poisoned");
            blobs
                .get(&cas_id)
                .cloned()
                .ok_or_else(|| dagvault_core::Error::blob_not_found(cas_id.to_string()))?
        };
        verify_integrity(&blob)?;
        Ok(blob)
    }

    async fn get_many(
        &self,
        cas_ids: &[CasId],
    ) -> Result<HashMap<CasId, Blob>, dagvault_core::Error> {
        let blobs = self.blobs.read().expect("lock poisoned");
        let mut found = HashMap::with_capacity(cas_ids.len());
        let mut missing_count = 0usize;
        for id in cas_ids {
            match blobs.get(id) {
                Some(blob) => {
                    found.insert(*id, blob.clone());
                }
                None => missing_count += 1,
            }
        }
        if missing_count > 0 {
            tracing::warn!(missing_count, "get_many: some cas ids were not found");
        }
        Ok(found)
    }

    async fn exists(&self, cas_id: CasId) -> Result<bool, dagvault_core::Error> {
        Ok(self.blobs.read().expect("lock poisoned").contains_key(&cas_id))
    }
}
