use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{qualify, CacheGateway};
use crate::{CoreError, CoreResult};

/// Revoked access tokens, kept in the cache until they would have expired.
///
/// Built once at startup and handed to whichever component verifies tokens.
#[derive(Clone)]
pub struct TokenBlacklist {
    cache: Arc<dyn CacheGateway>,
    namespace: String,
}

impl TokenBlacklist {
    pub fn new(cache: Arc<dyn CacheGateway>, namespace: impl Into<String>) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
        }
    }

    fn token_key(&self, token: &str) -> String {
        qualify(&self.namespace, &format!("blacklist:{token}"))
    }

    fn user_key(&self, user_id: Uuid) -> String {
        qualify(&self.namespace, &format!("user_blacklist:{user_id}"))
    }

    /// Revokes a single token. Unlike reads, a cache failure here is returned:
    /// a logout that did not stick must not look successful.
    pub async fn revoke(&self, token: &str, ttl: Duration) -> CoreResult<()> {
        self.cache
            .set(&self.token_key(token), b"blacklisted", ttl)
            .await
            .map_err(|e| CoreError::Identity(e.to_string()))?;
        info!(ttl_seconds = ttl.as_secs(), "token revoked");
        Ok(())
    }

    /// Fails open: an unreachable cache reports the token as not revoked.
    pub async fn is_revoked(&self, token: &str) -> bool {
        match self.cache.exists(&self.token_key(token)).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(error = %e, "token blacklist lookup failed");
                false
            }
        }
    }

    /// Revokes every token of a user issued before `at`.
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        ttl: Duration,
    ) -> CoreResult<()> {
        self.cache
            .set(&self.user_key(user_id), at.timestamp().to_string().as_bytes(), ttl)
            .await
            .map_err(|e| CoreError::Identity(e.to_string()))?;
        info!(%user_id, "all tokens revoked for user");
        Ok(())
    }

    pub async fn is_user_revoked(&self, user_id: Uuid, issued_at: DateTime<Utc>) -> bool {
        let raw = match self.cache.get(&self.user_key(user_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(%user_id, error = %e, "user blacklist lookup failed");
                return false;
            }
        };

        let cutoff = std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok());
        match cutoff {
            Some(cutoff) => issued_at.timestamp() < cutoff,
            None => {
                warn!(%user_id, "unreadable user blacklist entry");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;
    use chrono::TimeZone;

    fn blacklist() -> (Arc<MemoryCache>, TokenBlacklist) {
        let cache = Arc::new(MemoryCache::new());
        (cache.clone(), TokenBlacklist::new(cache, "test"))
    }

    #[tokio::test]
    async fn test_revoked_token_is_detected() {
        let (cache, blacklist) = blacklist();
        assert!(!blacklist.is_revoked("abc").await);

        blacklist.revoke("abc", Duration::from_secs(60)).await.unwrap();

        assert!(blacklist.is_revoked("abc").await);
        assert!(cache.contains("test:blacklist:abc"));
    }

    #[tokio::test]
    async fn test_revoke_surfaces_cache_outage_but_lookup_fails_open() {
        let (cache, blacklist) = blacklist();
        cache.set_offline(true);

        assert!(matches!(
            blacklist.revoke("abc", Duration::from_secs(60)).await,
            Err(CoreError::Identity(_))
        ));
        assert!(!blacklist.is_revoked("abc").await);
    }

    #[tokio::test]
    async fn test_user_cutoff_only_revokes_older_tokens() {
        let (_, blacklist) = blacklist();
        let user = Uuid::new_v4();
        let cutoff = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        blacklist
            .revoke_all_for_user(user, cutoff, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(blacklist.is_user_revoked(user, cutoff - chrono::Duration::minutes(5)).await);
        assert!(!blacklist.is_user_revoked(user, cutoff + chrono::Duration::minutes(5)).await);
        assert!(!blacklist.is_user_revoked(Uuid::new_v4(), cutoff).await);
    }
}
