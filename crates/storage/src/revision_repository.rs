//! Revision Service persistence: per-zone monotonic counters backing
//! `at_least_as_fresh` consistency checks. The quantization/bucketing
//! logic itself lives in `nexus-revision`; this only does the atomic
//! "bump and return new value" and "read current value" queries.

use sqlx::PgPool;

use crate::error::Result;

#[derive(Clone)]
pub struct RevisionRepository {
    pool: PgPool,
}

impl RevisionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically increments the zone's counter and returns the new value.
    /// `INSERT ... ON CONFLICT DO UPDATE ... RETURNING` is one round trip
    /// and one row lock, so concurrent writers serialize on the zone row
    /// rather than racing a read-modify-write.
    pub async fn bump(&self, zone_id: &str) -> Result<i64> {
        let (revision,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO zone_revisions (zone_id, revision)
            VALUES ($1, 1)
            ON CONFLICT (zone_id)
            DO UPDATE SET revision = zone_revisions.revision + 1
            RETURNING revision
            "#,
        )
        .bind(zone_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(revision)
    }

    /// Current revision without bumping, defaulting to `0` for a zone that
    /// has never been written to.
    pub async fn current(&self, zone_id: &str) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM zone_revisions WHERE zone_id = $1")
                .bind(zone_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(r,)| r).unwrap_or(0))
    }
}
