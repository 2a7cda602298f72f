//! Directory Grant persistence and the expansion-progress bookkeeping that
//! tracks materializing a grant out to every file beneath it.

use chrono::Utc;
use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use nexus_models::directory_grant::ExpansionStatus;
use nexus_models::tuple::SubjectType;
use nexus_models::DirectoryGrant;

use crate::error::Result;

#[derive(FromRow)]
struct DirectoryGrantRow {
    grant_id: Uuid,
    subject_type: String,
    subject_id: String,
    permission: String,
    directory_path: String,
    zone_id: Option<String>,
    grant_revision: i64,
    include_future_files: bool,
    expansion_status: String,
    expanded_count: i64,
    total_count: i64,
    error_message: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
}

impl TryFrom<DirectoryGrantRow> for DirectoryGrant {
    type Error = crate::error::StorageError;

    fn try_from(row: DirectoryGrantRow) -> Result<Self> {
        let subject_type: SubjectType = row
            .subject_type
            .parse()
            .map_err(crate::error::StorageError::NotFound)?;
        let expansion_status = match row.expansion_status.as_str() {
            "pending" => ExpansionStatus::Pending,
            "in_progress" => ExpansionStatus::InProgress,
            "completed" => ExpansionStatus::Completed,
            "failed" => ExpansionStatus::Failed,
            other => {
                return Err(crate::error::StorageError::NotFound(format!(
                    "unknown expansion_status: {other}"
                )))
            }
        };
        Ok(DirectoryGrant {
            grant_id: row.grant_id,
            subject_type,
            subject_id: row.subject_id,
            permission: row.permission,
            directory_path: row.directory_path,
            zone_id: row.zone_id,
            grant_revision: row.grant_revision,
            include_future_files: row.include_future_files,
            expansion_status,
            expanded_count: row.expanded_count,
            total_count: row.total_count,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Clone)]
pub struct DirectoryGrantRepository {
    pool: PgPool,
}

impl DirectoryGrantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `record_directory_grant`: idempotent on
    /// `(zone_id, directory_path, permission, subject_type, subject_id)` —
    /// re-recording the same grant (e.g. a client retry) refreshes
    /// `grant_revision`/`include_future_files` instead of resetting
    /// expansion progress back to `pending`.
    pub async fn upsert(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        permission: &str,
        directory_path: &str,
        zone_id: Option<&str>,
        grant_revision: i64,
        include_future_files: bool,
    ) -> Result<DirectoryGrant> {
        let directory_path = if directory_path.ends_with('/') {
            directory_path.to_string()
        } else {
            format!("{directory_path}/")
        };
        let grant_id = Uuid::new_v4();
        let now = Utc::now();

        let row: DirectoryGrantRow = sqlx::query_as(
            r#"
            INSERT INTO directory_grants
                (grant_id, subject_type, subject_id, permission, directory_path, zone_id,
                 grant_revision, include_future_files, expansion_status, expanded_count,
                 total_count, error_message, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 0, 0, NULL, $9, $9, NULL)
            ON CONFLICT (zone_id, directory_path, permission, subject_type, subject_id)
            DO UPDATE SET grant_revision = EXCLUDED.grant_revision,
                          include_future_files = EXCLUDED.include_future_files,
                          updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(grant_id)
        .bind(subject_type.to_string())
        .bind(subject_id)
        .bind(permission)
        .bind(&directory_path)
        .bind(zone_id)
        .bind(grant_revision)
        .bind(include_future_files)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        DirectoryGrant::try_from(row)
    }

    pub async fn create(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        permission: &str,
        directory_path: &str,
        zone_id: Option<&str>,
        grant_revision: i64,
        include_future_files: bool,
    ) -> Result<DirectoryGrant> {
        let grant_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO directory_grants
                (grant_id, subject_type, subject_id, permission, directory_path, zone_id,
                 grant_revision, include_future_files, expansion_status, expanded_count,
                 total_count, error_message, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 0, 0, NULL, $9, $9, NULL)
            "#,
        )
        .bind(grant_id)
        .bind(subject_type.to_string())
        .bind(subject_id)
        .bind(permission)
        .bind(directory_path)
        .bind(zone_id)
        .bind(grant_revision)
        .bind(include_future_files)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(DirectoryGrant {
            grant_id,
            subject_type,
            subject_id: subject_id.to_string(),
            permission: permission.to_string(),
            directory_path: directory_path.to_string(),
            zone_id: zone_id.map(str::to_string),
            grant_revision,
            include_future_files,
            expansion_status: ExpansionStatus::Pending,
            expanded_count: 0,
            total_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// advances expansion progress, marking `completed`/`failed` and
    /// stamping `completed_at` once `expanded_count == total_count` or an
    /// error is reported.
    pub async fn update_progress(
        &self,
        grant_id: Uuid,
        status: ExpansionStatus,
        expanded_count: i64,
        total_count: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let status_str = match status {
            ExpansionStatus::Pending => "pending",
            ExpansionStatus::InProgress => "in_progress",
            ExpansionStatus::Completed => "completed",
            ExpansionStatus::Failed => "failed",
        };
        let completed_at = matches!(status, ExpansionStatus::Completed | ExpansionStatus::Failed)
            .then_some(now);

        sqlx::query(
            r#"
            UPDATE directory_grants
            SET expansion_status = $1, expanded_count = $2, total_count = $3,
                error_message = $4, updated_at = $5, completed_at = COALESCE($6, completed_at)
            WHERE grant_id = $7
            "#,
        )
        .bind(status_str)
        .bind(expanded_count)
        .bind(total_count)
        .bind(error_message)
        .bind(now)
        .bind(completed_at)
        .bind(grant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, grant_id: Uuid) -> Result<Option<DirectoryGrant>> {
        let row: Option<DirectoryGrantRow> = sqlx::query_as(
            "SELECT * FROM directory_grants WHERE grant_id = $1",
        )
        .bind(grant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DirectoryGrant::try_from).transpose()
    }

    /// `add_file_to_ancestor_grants`: only grants that have *finished*
    /// expanding and opted in to future files extend to a newly created
    /// file — an in-progress grant's own batch loop will pick the file up
    /// if it existed before the scan reached it, and a failed grant made no
    /// promises about future membership.
    pub async fn find_covering(
        &self,
        directory_path: &str,
        zone_id: Option<&str>,
    ) -> Result<Vec<DirectoryGrant>> {
        let rows: Vec<DirectoryGrantRow> = sqlx::query_as(
            r#"
            SELECT * FROM directory_grants
            WHERE $1 LIKE directory_path || '%'
              AND include_future_files = true
              AND expansion_status = 'completed'
              AND zone_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(directory_path)
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DirectoryGrant::try_from).collect()
    }

    /// `remove_directory_grant`: the bitmap membership this grant
    /// expanded into subjects' Tiger entries is left untouched here — the
    /// caller (`DirectoryGrantManager::revoke`) is responsible for walking
    /// the expanded set and issuing the matching `persist_single_revoke`
    /// calls before or after this delete.
    #[allow(clippy::too_many_arguments)]
    pub async fn delete(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        permission: &str,
        directory_path: &str,
        zone_id: Option<&str>,
    ) -> Result<bool> {
        let directory_path = if directory_path.ends_with('/') {
            directory_path.to_string()
        } else {
            format!("{directory_path}/")
        };
        let result = sqlx::query(
            r#"
            DELETE FROM directory_grants
            WHERE subject_type = $1 AND subject_id = $2 AND permission = $3
              AND directory_path = $4 AND zone_id IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(subject_type.to_string())
        .bind(subject_id)
        .bind(permission)
        .bind(&directory_path)
        .bind(zone_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
