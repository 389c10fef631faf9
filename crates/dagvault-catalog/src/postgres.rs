// SPDX-License-Identifier: Apache-2.0
//! Postgres-backed [`ArtifactCatalog`], storing rows in the `artifact` and
//! `patch_chain_member` tables.

use async_trait::async_trait;
use dagvault_cas::CasId;
use dagvault_core::Id;
use dagvault_store::Db;
use sqlx::Row;

use crate::{Artifact, ArtifactCatalog, ArtifactKind};

/// [`ArtifactCatalog`] backed by the `artifact` table via a shared [`Db`]
/// pool.
pub struct PgArtifactCatalog {
    db: Db,
}

impl PgArtifactCatalog {
    /// Wrap a connection pool as an artifact catalog.
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn row_to_artifact(row: &sqlx::postgres::PgRow) -> Result<Artifact, dagvault_core::Error> {
    let raw_id: uuid::Uuid = row.get("id");
    let kind_label: String = row.get("kind");
    let raw_cas_id: String = row.get("cas_id");
    let cas_id: CasId = raw_cas_id
        .parse()
        .map_err(|_| dagvault_core::Error::Integrity {
            message: format!("artifact row has unparseable cas_id {raw_cas_id:?}"),
        })?;

    let kind = match kind_label.as_str() {
        "dag_version" => ArtifactKind::DagVersion {
            version_hash: row.get("version_hash"),
            node_count: row.get("node_count"),
            edge_count: row.get("edge_count"),
            compacted_from_id: row
                .get::<Option<uuid::Uuid>, _>("compacted_from_id")
                .map(Id::from_uuid),
        },
        "patch_set" => ArtifactKind::PatchSet {
            base_version: Id::from_uuid(row.get::<uuid::Uuid, _>("base_version")),
            depth: row.get("depth"),
            op_count: row.get("op_count"),
        },
        "run_snapshot" => ArtifactKind::RunSnapshot {
            plan_hash: row.get("plan_hash"),
            version_hash: row.get("version_hash"),
            node_count: row.get("node_count"),
            edge_count: row.get("edge_count"),
        },
        other => {
            return Err(dagvault_core::Error::Integrity {
                message: format!("artifact row has unknown kind {other:?}"),
            })
        }
    };

    Ok(Artifact {
        id: Id::from_uuid(raw_id),
        kind,
        cas_id,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        metadata: row.get("metadata"),
    })
}

#[async_trait]
impl ArtifactCatalog for PgArtifactCatalog {
    async fn create(&self, artifact: Artifact) -> Result<Id, dagvault_core::Error> {
        let (
            version_hash,
            node_count,
            edge_count,
            compacted_from_id,
            base_version,
            depth,
            op_count,
            plan_hash,
        ): (
            Option<String>,
            Option<i32>,
            Option<i32>,
            Option<uuid::Uuid>,
            Option<uuid::Uuid>,
            Option<i32>,
            Option<i32>,
            Option<String>,
        ) = match &artifact.kind {
            ArtifactKind::DagVersion {
                version_hash,
                node_count,
                edge_count,
                compacted_from_id,
            } => (
                version_hash.clone(),
                *node_count,
                *edge_count,
                compacted_from_id.map(|id| id.as_uuid()),
                None,
                None,
                None,
                None,
            ),
            ArtifactKind::PatchSet {
                base_version,
                depth,
                op_count,
            } => (
                None,
                None,
                None,
                None,
                Some(base_version.as_uuid()),
                Some(*depth),
                Some(*op_count),
                None,
            ),
            ArtifactKind::RunSnapshot {
                plan_hash,
                version_hash,
                node_count,
                edge_count,
            } => (
                version_hash.clone(),
                *node_count,
                *edge_count,
                None,
                None,
                None,
                None,
                Some(plan_hash.clone()),
            ),
        };

        let collision_hash = version_hash.clone();
        sqlx::query(
            r"insert into artifact
                (id, kind, cas_id, created_by, created_at, metadata,
                 version_hash, node_count, edge_count, compacted_from_id,
                 base_version, depth, op_count, plan_hash)
              values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(artifact.id.as_uuid())
        .bind(artifact.kind.label())
        .bind(artifact.cas_id.to_string())
        .bind(&artifact.created_by)
        .bind(artifact.created_at)
        .bind(&artifact.metadata)
        .bind(version_hash)
        .bind(node_count)
        .bind(edge_count)
        .bind(compacted_from_id)
        .bind(base_version)
        .bind(depth)
        .bind(op_count)
        .bind(plan_hash)
        .execute(self.db.pool())
        .await
        .map_err(|e| {
            let is_unique_violation = e.as_database_error().is_some_and(|d| d.is_unique_violation());
            match (is_unique_violation, collision_hash) {
                (true, Some(version_hash)) => dagvault_core::Error::VersionHashCollision { version_hash },
                _ => dagvault_core::Error::Integrity {
                    message: format!("artifact insert failed: {e}"),
                },
            }
        })?;

        Ok(artifact.id)
    }

    async fn get_by_id(&self, id: Id) -> Result<Artifact, dagvault_core::Error> {
        let row = sqlx::query("select * from artifact where id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("artifact lookup failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::artifact_not_found(id))?;
        row_to_artifact(&row)
    }

    async fn get_by_version_hash(
        &self,
        version_hash: &str,
    ) -> Result<Artifact, dagvault_core::Error> {
        let row = sqlx::query("select * from artifact where version_hash = $1")
            .bind(version_hash)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("artifact lookup failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::NotFound {
                resource: "artifact",
                reference: version_hash.to_string(),
            })?;
        row_to_artifact(&row)
    }

    async fn get_by_plan_hash(&self, plan_hash: &str) -> Result<Artifact, dagvault_core::Error> {
        let row = sqlx::query("select * from artifact where plan_hash = $1")
            .bind(plan_hash)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("artifact lookup failed: {e}"),
            })?
            .ok_or_else(|| dagvault_core::Error::NotFound {
                resource: "artifact",
                reference: plan_hash.to_string(),
            })?;
        row_to_artifact(&row)
    }

    async fn list_by_kind(
        &self,
        kind: &str,
        limit: u32,
    ) -> Result<Vec<Artifact>, dagvault_core::Error> {
        let rows = sqlx::query(
            "select * from artifact where kind = $1 order by created_at desc limit $2",
        )
        .bind(kind)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("artifact list failed: {e}"),
        })?;
        rows.iter().map(row_to_artifact).collect()
    }

    async fn insert_patch_chain(
        &self,
        head_id: Id,
        members: &[Id],
    ) -> Result<(), dagvault_core::Error> {
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("begin transaction failed: {e}"),
            })?;

        for (i, member_id) in members.iter().enumerate() {
            let seq = i32::try_from(i + 1).map_err(|_| dagvault_core::Error::Validation {
                message: "patch chain too long to index".to_string(),
            })?;
            sqlx::query(
                "insert into patch_chain_member (head_id, seq, member_id) values ($1, $2, $3)",
            )
            .bind(head_id.as_uuid())
            .bind(seq)
            .bind(member_id.as_uuid())
            .execute(&mut *txn)
            .await
            .map_err(|e| dagvault_core::Error::Integrity {
                message: format!("patch chain insert failed at seq {seq}: {e}"),
            })?;
        }

        txn.commit()
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("commit failed: {e}"),
            })
    }

    async fn get_patch_chain(&self, head_id: Id) -> Result<Vec<Artifact>, dagvault_core::Error> {
        let rows = sqlx::query(
            r"select a.*
              from patch_chain_member m
              join artifact a on a.id = m.member_id
              where m.head_id = $1
              order by m.seq asc",
        )
        .bind(head_id.as_uuid())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("patch chain lookup failed: {e}"),
        })?;

        if rows.is_empty() {
            return Err(dagvault_core::Error::artifact_not_found(head_id));
        }
        rows.iter().map(row_to_artifact).collect()
    }

    async fn find_compacted_base(
        &self,
        patch_id: Id,
    ) -> Result<Option<Artifact>, dagvault_core::Error> {
        let row = sqlx::query("select * from artifact where compacted_from_id = $1")
            .bind(patch_id.as_uuid())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| dagvault_core::Error::Unavailable {
                message: format!("compacted-base lookup failed: {e}"),
            })?;
        row.as_ref().map(row_to_artifact).transpose()
    }

    async fn get_compaction_candidates(
        &self,
        threshold: i32,
    ) -> Result<Vec<Artifact>, dagvault_core::Error> {
        let rows = sqlx::query(
            "select * from artifact where kind = 'patch_set' and depth >= $1 order by depth desc",
        )
        .bind(threshold)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| dagvault_core::Error::Unavailable {
            message: format!("compaction candidate lookup failed: {e}"),
        })?;
        rows.iter().map(row_to_artifact).collect()
    }
}
