//! Tiger Bitmap Cache persistence, backed by the `tiger_cache` table. The
//! in-memory Roaring Bitmap logic lives in `nexus-tiger`; this crate only
//! durably stores/loads the serialized form and does the compound-key
//! invalidation queries.

use chrono::Utc;
use sqlx::FromRow;
use sqlx::PgPool;

use nexus_models::tuple::SubjectType;
use nexus_models::TigerBitmapRow;

use crate::error::Result;

#[derive(FromRow)]
struct TigerRow {
    subject_type: String,
    subject_id: String,
    permission: String,
    resource_type: String,
    zone_id: Option<String>,
    bitmap_data: Vec<u8>,
    revision: i64,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<TigerRow> for TigerBitmapRow {
    type Error = crate::error::StorageError;

    fn try_from(row: TigerRow) -> Result<Self> {
        let subject_type: SubjectType = row
            .subject_type
            .parse()
            .map_err(crate::error::StorageError::NotFound)?;
        Ok(TigerBitmapRow {
            subject_type,
            subject_id: row.subject_id,
            permission: row.permission,
            resource_type: row.resource_type,
            zone_id: row.zone_id,
            bitmap_data: row.bitmap_data,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct TigerRepository {
    pool: PgPool,
}

impl TigerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// fetches a persisted bitmap to warm the in-process Tiger cache.
    /// `zone_id` is part of the storage key (UNIQUE constraint) even though
    /// the in-memory logical key omits it, per the comment on
    /// `TigerBitmapRow`.
    pub async fn load(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        permission: &str,
        resource_type: &str,
        zone_id: Option<&str>,
    ) -> Result<Option<TigerBitmapRow>> {
        let row: Option<TigerRow> = sqlx::query_as(
            r#"
            SELECT subject_type, subject_id, permission, resource_type, zone_id,
                   bitmap_data, revision, created_at, updated_at
            FROM tiger_cache
            WHERE subject_type = $1 AND subject_id = $2 AND permission = $3
              AND resource_type = $4 AND zone_id IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(subject_type.to_string())
        .bind(subject_id)
        .bind(permission)
        .bind(resource_type)
        .bind(zone_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TigerBitmapRow::try_from).transpose()
    }

    /// `persist_bitmap`: upserts the serialized bitmap, bumping
    /// `revision` to the caller-supplied value (not auto-incremented —
    /// callers pass the zone's current revision so the row self-describes
    /// its freshness for `at_least_as_fresh` checks).
    pub async fn persist(&self, row: &TigerBitmapRow) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tiger_cache
                (subject_type, subject_id, permission, resource_type, zone_id,
                 bitmap_data, revision, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (subject_type, subject_id, permission, resource_type, zone_id)
            DO UPDATE SET bitmap_data = EXCLUDED.bitmap_data,
                          revision = EXCLUDED.revision,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(row.subject_type.to_string())
        .bind(&row.subject_id)
        .bind(&row.permission)
        .bind(&row.resource_type)
        .bind(&row.zone_id)
        .bind(&row.bitmap_data)
        .bind(row.revision)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `persist_bitmap_bulk`: one round trip for a batch of rows
    /// produced by Directory Grant expansion or a warm-from-db pass.
    pub async fn persist_bulk(&self, rows: &[TigerBitmapRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO tiger_cache
                    (subject_type, subject_id, permission, resource_type, zone_id,
                     bitmap_data, revision, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                ON CONFLICT (subject_type, subject_id, permission, resource_type, zone_id)
                DO UPDATE SET bitmap_data = EXCLUDED.bitmap_data,
                              revision = EXCLUDED.revision,
                              updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(row.subject_type.to_string())
            .bind(&row.subject_id)
            .bind(&row.permission)
            .bind(&row.resource_type)
            .bind(&row.zone_id)
            .bind(&row.bitmap_data)
            .bind(row.revision)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::debug!(count = rows.len(), "persisted tiger bitmaps in bulk");
        Ok(())
    }

    /// invalidation: compound-WHERE delete covering every trigger-matrix
    /// shape (exact subject+permission, subject-wide, permission-wide).
    pub async fn invalidate(
        &self,
        subject_type: Option<SubjectType>,
        subject_id: Option<&str>,
        permission: Option<&str>,
        resource_type: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tiger_cache
            WHERE ($1::text IS NULL OR subject_type = $1)
              AND ($2::text IS NULL OR subject_id = $2)
              AND ($3::text IS NULL OR permission = $3)
              AND ($4::text IS NULL OR resource_type = $4)
            "#,
        )
        .bind(subject_type.map(|s| s.to_string()))
        .bind(subject_id)
        .bind(permission)
        .bind(resource_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// `warm_from_db`: every bitmap row for a subject, used on cold
    /// start or after a wide invalidation to avoid repeated single-key
    /// round trips.
    pub async fn load_all_for_subject(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Vec<TigerBitmapRow>> {
        let rows: Vec<TigerRow> = sqlx::query_as(
            r#"
            SELECT subject_type, subject_id, permission, resource_type, zone_id,
                   bitmap_data, revision, created_at, updated_at
            FROM tiger_cache
            WHERE subject_type = $1 AND subject_id = $2
            "#,
        )
        .bind(subject_type.to_string())
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TigerBitmapRow::try_from).collect()
    }

    /// `warm_from_db(limit)`: the most recently updated bitmaps, used
    /// to pre-populate L1 on startup so the first requests after a restart
    /// don't all fall through to a relational read.
    pub async fn load_most_recent(&self, limit: i64) -> Result<Vec<TigerBitmapRow>> {
        let rows: Vec<TigerRow> = sqlx::query_as(
            r#"
            SELECT subject_type, subject_id, permission, resource_type, zone_id,
                   bitmap_data, revision, created_at, updated_at
            FROM tiger_cache
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TigerBitmapRow::try_from).collect()
    }
}
