use async_trait::async_trait;
use dsps_types::{Context, JwtExp, JwtJti, JwtStorage, StorageError};

use super::OnmemoryStorage;

#[async_trait]
impl JwtStorage for OnmemoryStorage {
    async fn revoke_jwt(&self, ctx: &Context, exp: JwtExp, jti: &JwtJti) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock(ctx).await?;
        state.revoked_jwts.insert(jti.clone(), exp);
        Ok(())
    }

    async fn is_revoked_jwt(&self, ctx: &Context, jti: &JwtJti) -> Result<bool, StorageError> {
        let state = self.inner.state.lock(ctx).await?;
        let now = self.inner.clock.now();
        Ok(state.revoked_jwts.get(jti).is_some_and(|exp| now <= exp.to_time()))
    }
}
