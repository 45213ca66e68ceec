//! Identity endpoints: signup, tokens, logout, password reset and roles

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::user::{
        AccessToken, LoginRequest, LogoutRequest, PasswordResetConfirm, PasswordResetRequest,
        RefreshRequest, SignupRequest, TokenPair, UpdateRole, UserInfo,
    },
    AppState,
};

use super::{AuthenticatedUser, MessageResponse};

/// Register a new account
#[utoipa::path(
    post,
    path = "/signup",
    tag = "auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = UserInfo),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<UserInfo>)> {
    let user = state.services.auth.signup(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Obtain an access/refresh token pair
#[utoipa::path(
    post,
    path = "/token",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair", body = TokenPair),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<TokenPair>> {
    let pair = state
        .services
        .auth
        .login(&request.email, &request.password)
        .await?;
    Ok(Json(pair))
}

/// Exchange a refresh token for a new access token
#[utoipa::path(
    post,
    path = "/token/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = AccessToken),
        (status = 401, description = "Invalid, expired or revoked refresh token")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<Json<AccessToken>> {
    Ok(Json(state.services.auth.refresh(&request.refresh).await?))
}

/// Revoke the current access token and optionally a refresh token
#[utoipa::path(
    post,
    path = "/logout",
    tag = "auth",
    security(("bearer_auth" = [])),
    request_body(content = LogoutRequest, description = "Optional refresh token to revoke"),
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    body: Option<Json<LogoutRequest>>,
) -> AppResult<StatusCode> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state
        .services
        .auth
        .logout(&claims, request.refresh_token.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Email a password reset link
#[utoipa::path(
    post,
    path = "/password-reset",
    tag = "auth",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset link sent", body = MessageResponse),
        (status = 400, description = "Missing email or unknown user")
    )
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .services
        .auth
        .request_password_reset(request.email.as_deref())
        .await?;
    Ok(Json(MessageResponse::new("Password reset link sent")))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/password-reset/{uid}/{token}",
    tag = "auth",
    params(
        ("uid" = i32, Path, description = "User ID"),
        ("token" = String, Path, description = "Reset token from the emailed link")
    ),
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Missing password, or invalid or expired token"),
        (status = 404, description = "User not found")
    )
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Path((uid, token)): Path<(i32, String)>,
    Json(request): Json<PasswordResetConfirm>,
) -> AppResult<Json<MessageResponse>> {
    state
        .services
        .auth
        .confirm_password_reset(uid, &token, request.new_password.as_deref())
        .await?;
    Ok(Json(MessageResponse::new("Password reset successful")))
}

/// Current user profile
#[utoipa::path(
    get,
    path = "/me",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserInfo),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<UserInfo>> {
    Ok(Json(state.services.auth.me(&claims).await?))
}

/// Change a user's role
#[utoipa::path(
    put,
    path = "/users/{id}/role",
    tag = "auth",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    request_body = UpdateRole,
    responses(
        (status = 200, description = "Role updated", body = UserInfo),
        (status = 403, description = "Administrator privileges required"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_role(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateRole>,
) -> AppResult<Json<UserInfo>> {
    claims.require_admin()?;

    let user = state.services.auth.set_role(id, request.role).await?;
    Ok(Json(user))
}
