//! Membership type and borrower endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::membership::{
        Borrower, ChangeMembership, CreateBorrower, MembershipType, MembershipTypeInput,
    },
    AppState,
};

use super::AuthenticatedUser;

#[utoipa::path(
    get,
    path = "/membership-types",
    tag = "memberships",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Available membership types", body = Vec<MembershipType>)
    )
)]
pub async fn list_types(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
) -> AppResult<Json<Vec<MembershipType>>> {
    Ok(Json(state.services.memberships.list_types().await?))
}

#[utoipa::path(
    get,
    path = "/membership-types/{id}",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Membership type ID")),
    responses(
        (status = 200, description = "Membership type", body = MembershipType),
        (status = 404, description = "Membership type not found")
    )
)]
pub async fn get_type(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<MembershipType>> {
    Ok(Json(state.services.memberships.get_type(id).await?))
}

#[utoipa::path(
    post,
    path = "/membership-types",
    tag = "memberships",
    security(("bearer_auth" = [])),
    request_body = MembershipTypeInput,
    responses(
        (status = 201, description = "Membership type created", body = MembershipType),
        (status = 403, description = "Administrator privileges required"),
        (status = 409, description = "Price already used by another type")
    )
)]
pub async fn create_type(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(input): Json<MembershipTypeInput>,
) -> AppResult<(StatusCode, Json<MembershipType>)> {
    claims.require_admin()?;

    let created = state.services.memberships.create_type(input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/membership-types/{id}",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Membership type ID")),
    request_body = MembershipTypeInput,
    responses(
        (status = 200, description = "Membership type updated", body = MembershipType),
        (status = 404, description = "Membership type not found"),
        (status = 409, description = "Price already used by another type")
    )
)]
pub async fn update_type(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(input): Json<MembershipTypeInput>,
) -> AppResult<Json<MembershipType>> {
    claims.require_admin()?;

    Ok(Json(state.services.memberships.update_type(id, input).await?))
}

#[utoipa::path(
    delete,
    path = "/membership-types/{id}",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Membership type ID")),
    responses(
        (status = 204, description = "Membership type deleted"),
        (status = 404, description = "Membership type not found")
    )
)]
pub async fn delete_type(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    claims.require_admin()?;

    state.services.memberships.delete_type(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/borrowers",
    tag = "memberships",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All borrowers", body = Vec<Borrower>),
        (status = 403, description = "Staff privileges required")
    )
)]
pub async fn list_borrowers(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<Borrower>>> {
    claims.require_staff()?;

    Ok(Json(state.services.memberships.list_borrowers().await?))
}

/// Enroll a user as a borrower
#[utoipa::path(
    post,
    path = "/borrowers",
    tag = "memberships",
    security(("bearer_auth" = [])),
    request_body = CreateBorrower,
    responses(
        (status = 201, description = "Borrower created", body = Borrower),
        (status = 403, description = "Cannot enroll another user"),
        (status = 404, description = "User or membership type not found"),
        (status = 409, description = "User already has a borrower record")
    )
)]
pub async fn create_borrower(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateBorrower>,
) -> AppResult<(StatusCode, Json<Borrower>)> {
    let borrower = state
        .services
        .memberships
        .create_borrower(&claims, request.user_id, request.membership_type_id)
        .await?;
    Ok((StatusCode::CREATED, Json(borrower)))
}

#[utoipa::path(
    get,
    path = "/borrowers/{id}",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Borrower", body = Borrower),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Borrower not found")
    )
)]
pub async fn get_borrower(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Borrower>> {
    Ok(Json(state.services.memberships.get_borrower(&claims, id).await?))
}

#[utoipa::path(
    put,
    path = "/borrowers/{id}/membership",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrower ID")),
    request_body = ChangeMembership,
    responses(
        (status = 200, description = "Membership changed", body = Borrower),
        (status = 404, description = "Borrower or membership type not found")
    )
)]
pub async fn change_membership(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<ChangeMembership>,
) -> AppResult<Json<Borrower>> {
    let borrower = state
        .services
        .memberships
        .change_membership(&claims, id, request.membership_type_id)
        .await?;
    Ok(Json(borrower))
}

#[utoipa::path(
    post,
    path = "/borrowers/{id}/cancel",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Membership cancelled", body = Borrower),
        (status = 422, description = "Borrower still has outstanding loans")
    )
)]
pub async fn cancel_membership(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Borrower>> {
    Ok(Json(state.services.memberships.cancel(&claims, id).await?))
}

#[utoipa::path(
    post,
    path = "/borrowers/{id}/renew",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Membership renewed", body = Borrower),
        (status = 404, description = "Borrower not found")
    )
)]
pub async fn renew_membership(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Borrower>> {
    Ok(Json(state.services.memberships.renew(&claims, id).await?))
}
