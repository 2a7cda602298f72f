//! Refresh-token rotation history: an append-only log per
//! `token_family_id`. Reuse of a hash that isn't the most recent rotation
//! in its family is the signal the family has been compromised.

use chrono::Utc;
use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use nexus_models::RefreshTokenHistory;

use crate::error::Result;

#[derive(FromRow)]
struct RefreshTokenRow {
    token_family_id: Uuid,
    credential_id: Uuid,
    refresh_token_hash: String,
    rotation_counter: i64,
    rotated_at: chrono::DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenHistory {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            token_family_id: row.token_family_id,
            credential_id: row.credential_id,
            refresh_token_hash: row.refresh_token_hash,
            rotation_counter: row.rotation_counter,
            rotated_at: row.rotated_at,
        }
    }
}

#[derive(Clone)]
pub struct RefreshTokenRepository {
    pool: PgPool,
}

impl RefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records the next rotation in a family, assigning
    /// `rotation_counter = previous + 1` (starting at `0` for a new family).
    pub async fn record_rotation(
        &self,
        token_family_id: Uuid,
        credential_id: Uuid,
        refresh_token_hash: &str,
    ) -> Result<RefreshTokenHistory> {
        let next_counter: i64 = self.latest(token_family_id).await?.map_or(0, |h| h.rotation_counter + 1);

        let row: RefreshTokenRow = sqlx::query_as(
            r#"
            INSERT INTO refresh_token_history
                (token_family_id, credential_id, refresh_token_hash, rotation_counter, rotated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING token_family_id, credential_id, refresh_token_hash, rotation_counter, rotated_at
            "#,
        )
        .bind(token_family_id)
        .bind(credential_id)
        .bind(refresh_token_hash)
        .bind(next_counter)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// The most recently recorded rotation for a family, `None` for an
    /// unknown family.
    pub async fn latest(&self, token_family_id: Uuid) -> Result<Option<RefreshTokenHistory>> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(
            r#"
            SELECT token_family_id, credential_id, refresh_token_hash, rotation_counter, rotated_at
            FROM refresh_token_history
            WHERE token_family_id = $1
            ORDER BY rotation_counter DESC
            LIMIT 1
            "#,
        )
        .bind(token_family_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Deletes every rotation on record for a family, forcing the next
    /// refresh attempt to fail closed.
    pub async fn revoke_family(&self, token_family_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_token_history WHERE token_family_id = $1")
            .bind(token_family_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
