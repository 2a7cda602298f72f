//! Refresh-token family invalidation: a replayed refresh token fails the
//! refresh, revokes the family, and logs a SECURITY event. Not part of the
//! ReBAC graph — a sibling invariant that reuses the same "detect, deny,
//! and widen invalidation" shape as the cache invalidation trigger matrix,
//! so it lives alongside the rest of the engine facade rather than bolted
//! onto an unrelated credential service.

use uuid::Uuid;

use nexus_storage::RefreshTokenRepository;

use crate::error::Result;

pub struct RefreshTokenGuard {
    repo: RefreshTokenRepository,
}

impl RefreshTokenGuard {
    pub fn new(repo: RefreshTokenRepository) -> Self {
        Self { repo }
    }

    /// Validates a presented refresh token against the family's last
    /// recorded rotation. A hash that doesn't match the latest rotation
    /// means an older token in the chain was replayed — the family is
    /// compromised and every outstanding token in it is revoked.
    ///
    /// Returns `Ok(true)` when the rotation is accepted (and has already
    /// been recorded), `Ok(false)` when reuse was detected (and the family
    /// has already been revoked).
    pub async fn rotate(
        &self,
        token_family_id: Uuid,
        credential_id: Uuid,
        presented_hash: &str,
    ) -> Result<bool> {
        if let Some(latest) = self.repo.latest(token_family_id).await? {
            if latest.refresh_token_hash != presented_hash {
                tracing::error!(
                    target: "security",
                    token_family_id = %token_family_id,
                    credential_id = %credential_id,
                    "refresh token reuse detected, revoking family"
                );
                self.repo.revoke_family(token_family_id).await?;
                return Ok(false);
            }
        }

        self.repo
            .record_rotation(token_family_id, credential_id, presented_hash)
            .await?;
        Ok(true)
    }
}
