//! Directory Grant — "subject X has permission P on directory D, including
//! future files", with the batch-expansion bookkeeping that walks existing
//! descendants after the grant is recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tuple::SubjectType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryGrant {
    pub grant_id: Uuid,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub permission: String,
    pub directory_path: String,
    pub zone_id: Option<String>,
    pub grant_revision: i64,
    pub include_future_files: bool,
    pub expansion_status: ExpansionStatus,
    pub expanded_count: i64,
    pub total_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
