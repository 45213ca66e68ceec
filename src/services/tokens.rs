//! Short-lived token state: revoked JWT ids and pending password-reset tokens

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AppResult;

/// Expiring key/value state behind the identity service.
///
/// Reset tokens are stored by user id, so a newer request replaces the older one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Blacklist a token id until `ttl_seconds` from now
    async fn revoke_token(&self, jti: &str, ttl_seconds: u64) -> AppResult<()>;

    async fn is_token_revoked(&self, jti: &str) -> AppResult<bool>;

    /// Store the hash of a password-reset token for a user
    async fn store_reset_token(&self, user_id: i32, token_hash: &str, ttl_seconds: u64) -> AppResult<()>;

    /// Consume the reset token if it matches; a token is accepted at most once
    async fn consume_reset_token(&self, user_id: i32, token_hash: &str) -> AppResult<bool>;

    /// Fails when the backing store cannot be reached
    async fn ping(&self) -> AppResult<()>;
}

/// In-process token store used by the tests and by deployments without Redis
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    revoked: Arc<Mutex<HashMap<String, Instant>>>,
    resets: Arc<Mutex<HashMap<i32, (String, Instant)>>>,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn revoke_token(&self, jti: &str, ttl_seconds: u64) -> AppResult<()> {
        let mut revoked = self.revoked.lock().await;
        let now = Instant::now();
        revoked.retain(|_, expires| *expires > now);
        revoked.insert(jti.to_string(), now + Duration::from_secs(ttl_seconds));
        Ok(())
    }

    async fn is_token_revoked(&self, jti: &str) -> AppResult<bool> {
        let revoked = self.revoked.lock().await;
        Ok(revoked
            .get(jti)
            .map(|expires| *expires > Instant::now())
            .unwrap_or(false))
    }

    async fn store_reset_token(&self, user_id: i32, token_hash: &str, ttl_seconds: u64) -> AppResult<()> {
        let expires = Instant::now() + Duration::from_secs(ttl_seconds);
        self.resets
            .lock()
            .await
            .insert(user_id, (token_hash.to_string(), expires));
        Ok(())
    }

    async fn consume_reset_token(&self, user_id: i32, token_hash: &str) -> AppResult<bool> {
        let mut resets = self.resets.lock().await;
        match resets.get(&user_id) {
            Some((stored, expires)) if stored == token_hash && *expires > Instant::now() => {
                resets.remove(&user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let store = MemoryTokenStore::default();
        store.store_reset_token(1, "abc", 60).await.unwrap();

        assert!(!store.consume_reset_token(1, "wrong").await.unwrap());
        assert!(store.consume_reset_token(1, "abc").await.unwrap());
        assert!(!store.consume_reset_token(1, "abc").await.unwrap());
    }

    #[tokio::test]
    async fn newer_reset_token_replaces_older() {
        let store = MemoryTokenStore::default();
        store.store_reset_token(1, "first", 60).await.unwrap();
        store.store_reset_token(1, "second", 60).await.unwrap();

        assert!(!store.consume_reset_token(1, "first").await.unwrap());
        assert!(store.consume_reset_token(1, "second").await.unwrap());
    }

    #[test]
    fn revoked_token_is_reported() {
        let store = MemoryTokenStore::default();
        tokio_test::block_on(async {
            store.revoke_token("jti-2", 60).await.unwrap();
            assert!(store.is_token_revoked("jti-2").await.unwrap());
            assert!(!store.is_token_revoked("jti-3").await.unwrap());
        });
    }

    #[tokio::test]
    async fn expired_entries_are_ignored() {
        let store = MemoryTokenStore::default();
        store.revoke_token("jti-1", 0).await.unwrap();
        store.store_reset_token(2, "abc", 0).await.unwrap();

        assert!(!store.is_token_revoked("jti-1").await.unwrap());
        assert!(!store.consume_reset_token(2, "abc").await.unwrap());
    }
}
