//! Tiger Bitmap row — a serialized Roaring Bitmap keyed by
//! `(subject_type, subject_id, permission, resource_type)`. `zone_id` is
//! deliberately excluded from the logical cache key (see `nexus-tiger`); it
//! is carried here only because the L3 table is `UNIQUE` on it as well, to
//! let the same subject hold distinct bitmaps across zones when isolation
//! requires it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tuple::SubjectType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TigerBitmapRow {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub permission: String,
    pub resource_type: String,
    pub zone_id: Option<String>,
    pub bitmap_data: Vec<u8>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
