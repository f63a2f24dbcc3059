use async_trait::async_trait;
use dsps_types::{Context, JwtExp, JwtJti, JwtStorage, StorageError};

use super::keys::jwt_revocation_key;
use super::{ttl_sec, RedisStorage, TTL_MARGIN};

#[async_trait]
impl JwtStorage for RedisStorage {
    async fn revoke_jwt(&self, ctx: &Context, exp: JwtExp, jti: &JwtJti) -> Result<(), StorageError> {
        let now = self.clock.now();
        let Ok(remaining) = (exp.to_time() - now).to_std() else {
            // Already expired, nothing to remember.
            return Ok(());
        };
        self.cmd()
            .set_ex(
                ctx,
                &jwt_revocation_key(jti),
                &exp.epoch_seconds().to_string(),
                ttl_sec(remaining + TTL_MARGIN),
            )
            .await
            .map_err(|e| e.into_storage_error("RevokeJwt failed due to Redis error"))
    }

    async fn is_revoked_jwt(&self, ctx: &Context, jti: &JwtJti) -> Result<bool, StorageError> {
        let value = self
            .cmd()
            .get(ctx, &jwt_revocation_key(jti))
            .await
            .map_err(|e| e.into_storage_error("IsRevokedJwt failed due to Redis error"))?;
        let Some(value) = value else {
            return Ok(false);
        };
        match JwtExp::parse(&value) {
            Ok(exp) => Ok(self.clock.now() <= exp.to_time()),
            // Unreadable entry still marks a revocation.
            Err(_) => Ok(true),
        }
    }
}
