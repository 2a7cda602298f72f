//! Namespace Store persistence: CRUD over the single schema-per-
//! `object_type` model, one row per registered namespace.

use chrono::Utc;
use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use nexus_models::{default_namespaces, Namespace, NamespaceConfig};

use crate::error::Result;

#[derive(FromRow)]
struct NamespaceRow {
    id: Uuid,
    object_type: String,
    config: serde_json::Value,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<NamespaceRow> for Namespace {
    type Error = crate::error::StorageError;

    fn try_from(row: NamespaceRow) -> Result<Self> {
        let config: NamespaceConfig = serde_json::from_value(row.config)
            .map_err(|e| crate::error::StorageError::Config(e.to_string()))?;
        Ok(Namespace {
            id: row.id,
            object_type: row.object_type,
            config,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct NamespaceRepository {
    pool: PgPool,
}

impl NamespaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `create_or_update`: upsert keyed on `object_type`, bumping
    /// `updated_at`. Schema validation (cycle-free construction, known
    /// relation names inside `permissions`) happens in `nexus-graph` before
    /// this is called.
    pub async fn create_or_update(
        &self,
        object_type: &str,
        config: &NamespaceConfig,
    ) -> Result<Namespace> {
        let config_json = serde_json::to_value(config)
            .map_err(|e| crate::error::StorageError::Config(e.to_string()))?;
        let now = Utc::now();

        let row: NamespaceRow = sqlx::query_as(
            r#"
            INSERT INTO namespaces (id, object_type, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (object_type)
            DO UPDATE SET config = EXCLUDED.config, updated_at = EXCLUDED.updated_at
            RETURNING id, object_type, config, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(object_type)
        .bind(config_json)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(object_type, "namespace schema upserted");
        Namespace::try_from(row)
    }

    /// `get`: `None` when no schema exists for `object_type`.
    pub async fn get(&self, object_type: &str) -> Result<Option<Namespace>> {
        let row: Option<NamespaceRow> =
            sqlx::query_as("SELECT id, object_type, config, created_at, updated_at FROM namespaces WHERE object_type = $1")
                .bind(object_type)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Namespace::try_from).transpose()
    }

    /// all registered object types, for schema-validation passes that
    /// need to resolve cross-type `tupleToUserset` references.
    pub async fn list_all(&self) -> Result<Vec<Namespace>> {
        let rows: Vec<NamespaceRow> =
            sqlx::query_as("SELECT id, object_type, config, created_at, updated_at FROM namespaces")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Namespace::try_from).collect()
    }

    /// `seed_defaults`: idempotently ensures the built-in `file`, `group`,
    /// `memory` namespaces exist (spec §3, §4.1). No-op for any
    /// `object_type` already registered, so it's safe to call on every
    /// startup rather than only on a fresh deployment.
    pub async fn seed_defaults(&self) -> Result<()> {
        for (object_type, config) in default_namespaces() {
            if self.get(object_type).await?.is_none() {
                self.create_or_update(object_type, &config).await?;
            }
        }
        Ok(())
    }
}
