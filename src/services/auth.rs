//! Authentication, token lifecycle, password reset and role management

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use validator::Validate;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{
        AccessToken, NewUser, Role, SignupRequest, TokenPair, TokenType, User, UserClaims, UserInfo,
    },
    repository::Repository,
};

use super::{email::Notifier, tokens::TokenStore};

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    config: AuthConfig,
    public_url: String,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
}

impl AuthService {
    pub fn new(
        repository: Repository,
        config: AuthConfig,
        public_url: String,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repository,
            config,
            public_url,
            tokens,
            notifier,
        }
    }

    /// Register a new account with the `user` role
    pub async fn signup(&self, request: SignupRequest) -> AppResult<UserInfo> {
        request.validate()?;

        let user = self
            .repository
            .users
            .create(&NewUser {
                email: request.email.trim().to_string(),
                name: request.name,
                phone_number: request.phone_number,
                role: Role::User,
                password_hash: self.hash_password(&request.password)?,
            })
            .await?;

        tracing::info!(user_id = user.id, "User signed up");
        Ok(user.into())
    }

    /// Check credentials and issue an access/refresh pair
    pub async fn login(&self, email: &str, password: &str) -> AppResult<TokenPair> {
        let invalid = || AppError::Authentication("Invalid email or password".to_string());

        let user = self
            .repository
            .users
            .get_by_email(email.trim())
            .await?
            .ok_or_else(invalid)?;

        if !user.is_active || !self.verify_password(&user, password)? {
            tracing::warn!(user_id = user.id, "Failed login attempt");
            return Err(invalid());
        }

        Ok(TokenPair {
            access: self.issue_token(&user, TokenType::Access)?,
            refresh: self.issue_token(&user, TokenType::Refresh)?,
        })
    }

    /// Exchange a valid refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<AccessToken> {
        let claims = self.decode(refresh_token, TokenType::Refresh).await?;

        // Pick up role changes made since login
        let user = self.repository.users.get_by_id(claims.user_id).await.map_err(|_| {
            AppError::Authentication("Invalid or expired token".to_string())
        })?;
        if !user.is_active {
            return Err(AppError::Authentication("Account is disabled".to_string()));
        }

        Ok(AccessToken {
            access: self.issue_token(&user, TokenType::Access)?,
        })
    }

    /// Fails when revocations and reset tokens cannot be read
    pub async fn token_store_ready(&self) -> AppResult<()> {
        self.tokens.ping().await
    }

    /// Validate an access token presented on a request
    pub async fn verify_access(&self, token: &str) -> AppResult<UserClaims> {
        self.decode(token, TokenType::Access).await
    }

    /// Revoke the caller's access token and, when given, their refresh token
    pub async fn logout(&self, claims: &UserClaims, refresh_token: Option<&str>) -> AppResult<()> {
        if let Some(token) = refresh_token {
            let refresh = UserClaims::from_token(token, &self.config.jwt_secret)
                .ok()
                .filter(|c| c.token_type == TokenType::Refresh && c.user_id == claims.user_id)
                .ok_or_else(|| AppError::BadRequest("Invalid refresh token".to_string()))?;
            self.tokens
                .revoke_token(&refresh.jti, refresh.remaining_seconds())
                .await?;
        }

        self.tokens
            .revoke_token(&claims.jti, claims.remaining_seconds())
            .await?;

        tracing::info!(user_id = claims.user_id, "User logged out");
        Ok(())
    }

    /// Send a single-use reset link; a newer request replaces the previous token
    pub async fn request_password_reset(&self, email: Option<&str>) -> AppResult<()> {
        let email = email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::BadRequest("Email is required".to_string()))?;

        let user = self
            .repository
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| AppError::BadRequest("User not found".to_string()))?;

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        self.tokens
            .store_reset_token(
                user.id,
                &hash_reset_token(&token),
                self.config.password_reset_ttl_minutes * 60,
            )
            .await?;

        let link = format!(
            "{}/api/v1/password-reset/{}/{}/",
            self.public_url.trim_end_matches('/'),
            user.id,
            token
        );
        let body = format!(
            "Hello {},\n\nUse the link below to reset your password:\n\n{}\n\n\
             The link expires in {} minutes. If you did not ask for a reset, ignore this email.\n",
            user.name, link, self.config.password_reset_ttl_minutes
        );
        self.notifier
            .send(&user.email, "Reset your Libris password", &body)
            .await?;

        tracing::info!(user_id = user.id, "Password reset requested");
        Ok(())
    }

    pub async fn confirm_password_reset(
        &self,
        user_id: i32,
        token: &str,
        new_password: Option<&str>,
    ) -> AppResult<()> {
        let new_password = new_password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("New password is required".to_string()))?;
        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        self.repository.users.get_by_id(user_id).await?;

        if !self
            .tokens
            .consume_reset_token(user_id, &hash_reset_token(token))
            .await?
        {
            return Err(AppError::BadRequest("Invalid or expired token".to_string()));
        }

        let hash = self.hash_password(new_password)?;
        self.repository.users.set_password(user_id, &hash).await?;

        tracing::info!(user_id, "Password reset completed");
        Ok(())
    }

    pub async fn me(&self, claims: &UserClaims) -> AppResult<UserInfo> {
        Ok(self.repository.users.get_by_id(claims.user_id).await?.into())
    }

    /// Change a user's role (admin only, checked by the caller)
    pub async fn set_role(&self, user_id: i32, role: Role) -> AppResult<UserInfo> {
        let user = self.repository.users.set_role(user_id, role).await?;
        tracing::info!(user_id, role = %role, "User role changed");
        Ok(user.into())
    }

    /// Create the configured administrator account if it does not exist yet
    pub async fn ensure_bootstrap_admin(&self) -> AppResult<()> {
        let (Some(email), Some(password)) = (
            self.config.bootstrap_admin_email.as_deref(),
            self.config.bootstrap_admin_password.as_deref(),
        ) else {
            return Ok(());
        };

        if self.repository.users.get_by_email(email).await?.is_some() {
            return Ok(());
        }

        let admin = self
            .repository
            .users
            .create(&NewUser {
                email: email.to_string(),
                name: "Administrator".to_string(),
                phone_number: String::new(),
                role: Role::Admin,
                password_hash: self.hash_password(password)?,
            })
            .await?;

        tracing::info!(user_id = admin.id, "Bootstrap administrator created");
        Ok(())
    }

    fn issue_token(&self, user: &User, token_type: TokenType) -> AppResult<String> {
        let now = Utc::now();
        let lifetime = match token_type {
            TokenType::Access => Duration::minutes(self.config.access_token_minutes),
            TokenType::Refresh => Duration::days(self.config.refresh_token_days),
        };

        let claims = UserClaims {
            sub: user.email.clone(),
            user_id: user.id,
            role: user.role,
            token_type,
            jti: uuid::Uuid::new_v4().to_string(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
        };

        claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    async fn decode(&self, token: &str, expected: TokenType) -> AppResult<UserClaims> {
        let claims = UserClaims::from_token(token, &self.config.jwt_secret)
            .map_err(|_| AppError::Authentication("Invalid or expired token".to_string()))?;

        if claims.token_type != expected {
            return Err(AppError::Authentication("Wrong token type".to_string()));
        }

        if self.tokens.is_token_revoked(&claims.jti).await? {
            return Err(AppError::Authentication("Token has been revoked".to_string()));
        }

        Ok(claims)
    }

    fn verify_password(&self, user: &User, password: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Hash a password using Argon2
    fn hash_password(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
        Ok(hash.to_string())
    }
}

/// Reset tokens are only ever stored hashed
fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
