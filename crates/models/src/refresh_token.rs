//! Refresh-token rotation history: not an authorization entity, but its
//! rotation-family shape backs reuse detection — a replayed hash fails the
//! refresh, revokes the family, and logs a SECURITY event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenHistory {
    pub token_family_id: Uuid,
    pub credential_id: Uuid,
    pub refresh_token_hash: String,
    pub rotation_counter: i64,
    pub rotated_at: DateTime<Utc>,
}
