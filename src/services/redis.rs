//! Redis-backed token store for revoked JWTs and password-reset tokens

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Client, Script};

use crate::error::{AppError, AppResult};

use super::tokens::TokenStore;

/// Delete the key only while it still holds the presented hash; returns 1 on success
static CONSUME_IF_MATCHES: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        ",
    )
});

#[derive(Clone)]
pub struct RedisService {
    client: Client,
}

impl RedisService {
    /// Create a new Redis service
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        let service = Self { client };
        service.ping().await?;

        Ok(service)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl TokenStore for RedisService {
    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis ping failed: {}", e)))?;
        Ok(())
    }

    async fn revoke_token(&self, jti: &str, ttl_seconds: u64) -> AppResult<()> {
        // SETEX rejects a zero TTL; an already expired token needs no entry
        if ttl_seconds == 0 {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let key = format!("revoked:{}", jti);
        conn.set_ex::<_, _, ()>(&key, "1", ttl_seconds)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to revoke token in Redis: {}", e)))?;
        Ok(())
    }

    async fn is_token_revoked(&self, jti: &str) -> AppResult<bool> {
        let mut conn = self.connection().await?;
        let key = format!("revoked:{}", jti);
        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to check revoked token in Redis: {}", e)))?;
        Ok(exists)
    }

    async fn store_reset_token(&self, user_id: i32, token_hash: &str, ttl_seconds: u64) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let key = format!("password_reset:{}", user_id);
        conn.set_ex::<_, _, ()>(&key, token_hash, ttl_seconds.max(1))
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store reset token in Redis: {}", e)))?;
        Ok(())
    }

    async fn consume_reset_token(&self, user_id: i32, token_hash: &str) -> AppResult<bool> {
        let mut conn = self.connection().await?;
        let key = format!("password_reset:{}", user_id);

        let removed: i64 = CONSUME_IF_MATCHES
            .key(&key)
            .arg(token_hash)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to consume reset token in Redis: {}", e)))?;
        Ok(removed == 1)
    }
}
