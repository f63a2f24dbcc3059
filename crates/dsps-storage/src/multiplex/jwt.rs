use async_trait::async_trait;
use dsps_types::{Context, JwtExp, JwtJti, JwtStorage, StorageError};
use futures::FutureExt;

use super::StorageMultiplexer;

#[async_trait]
impl JwtStorage for StorageMultiplexer {
    async fn revoke_jwt(&self, ctx: &Context, exp: JwtExp, jti: &JwtJti) -> Result<(), StorageError> {
        self.parallel_at_least_one_success("RevokeJwt", |_, child| {
            let jwt = child.as_jwt()?;
            Some(async move { jwt.revoke_jwt(ctx, exp, jti).await }.boxed())
        })
        .await
        .map(|_| ())
    }

    /// Revoked when any reachable child says so.
    async fn is_revoked_jwt(&self, ctx: &Context, jti: &JwtJti) -> Result<bool, StorageError> {
        let results = self
            .parallel_at_least_one_success("IsRevokedJwt", |_, child| {
                let jwt = child.as_jwt()?;
                Some(async move { jwt.is_revoked_jwt(ctx, jti).await }.boxed())
            })
            .await?;
        Ok(results.values().any(|revoked| *revoked))
    }
}
