//! Resource Map persistence — the `(resource_type, resource_id) <-> i32`
//! bijection Tiger bitmaps are built on.

use sqlx::FromRow;
use sqlx::PgPool;

use nexus_models::ResourceMapRow;

use crate::error::Result;

#[derive(FromRow)]
struct ResourceRow {
    resource_int_id: i32,
    resource_type: String,
    resource_id: String,
}

impl From<ResourceRow> for ResourceMapRow {
    fn from(row: ResourceRow) -> Self {
        ResourceMapRow {
            resource_int_id: row.resource_int_id,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
        }
    }
}

#[derive(Clone)]
pub struct ResourceMapRepository {
    pool: PgPool,
}

impl ResourceMapRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocates (or returns the existing) int id for `(resource_type,
    /// resource_id)`. Relies on `resource_map`'s `SERIAL` column plus a
    /// unique constraint on `(resource_type, resource_id)` to make the
    /// allocation race-safe under concurrent callers: `ON CONFLICT DO
    /// NOTHING` followed by a `SELECT` covers the case where two callers
    /// race to map the same resource.
    pub async fn get_or_create_int_id(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<i32> {
        let inserted: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO resource_map (resource_type, resource_id)
            VALUES ($1, $2)
            ON CONFLICT (resource_type, resource_id) DO NOTHING
            RETURNING resource_int_id
            "#,
        )
        .bind(resource_type)
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((int_id,)) = inserted {
            return Ok(int_id);
        }

        let (int_id,): (i32,) = sqlx::query_as(
            "SELECT resource_int_id FROM resource_map WHERE resource_type = $1 AND resource_id = $2",
        )
        .bind(resource_type)
        .bind(resource_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(int_id)
    }

    /// Bulk variant for Directory Grant expansion, which can touch
    /// thousands of files in one pass. One round trip per call site rather
    /// than one per file.
    pub async fn bulk_get_int_ids(
        &self,
        resource_type: &str,
        resource_ids: &[String],
    ) -> Result<Vec<(String, i32)>> {
        let mut out = Vec::with_capacity(resource_ids.len());
        for resource_id in resource_ids {
            let int_id = self.get_or_create_int_id(resource_type, resource_id).await?;
            out.push((resource_id.clone(), int_id));
        }
        Ok(out)
    }

    pub async fn resolve(&self, resource_type: &str, int_id: i32) -> Result<Option<ResourceMapRow>> {
        let row: Option<ResourceRow> = sqlx::query_as(
            "SELECT resource_int_id, resource_type, resource_id FROM resource_map WHERE resource_type = $1 AND resource_int_id = $2",
        )
        .bind(resource_type)
        .bind(int_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ResourceMapRow::from))
    }
}
