//! API handlers for the Libris REST endpoints

pub mod auth;
pub mod authors;
pub mod books;
pub mod circulation;
pub mod health;
pub mod memberships;
pub mod openapi;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post, put},
    Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::ToSchema;

use crate::{error::AppError, models::user::UserClaims, AppState};

/// Extractor for the caller's claims, from a non-revoked bearer access token
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AppError::Authentication("Missing or malformed authorization header".to_string())
                })?;

        let claims = state.services.auth.verify_access(bearer.token()).await?;

        Ok(AuthenticatedUser(claims))
    }
}

/// Plain message body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Identity
        .route("/signup", post(auth::signup))
        .route("/token", post(auth::login))
        .route("/token/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/password-reset", post(auth::request_password_reset))
        .route("/password-reset/:uid/:token", post(auth::confirm_password_reset))
        .route("/password-reset/:uid/:token/", post(auth::confirm_password_reset))
        .route("/me", get(auth::me))
        .route("/users/:id/role", put(auth::update_role))
        // Books
        .route("/books", get(books::list_books).post(books::create_book))
        .route(
            "/books/:id",
            get(books::get_book).put(books::update_book).delete(books::delete_book),
        )
        .route("/books/:id/copies", post(circulation::adjust_copies))
        .route("/books/:id/availability", get(circulation::availability))
        .route("/books/:id/loans", get(circulation::book_loans))
        .route("/books/:id/authors", get(authors::authors_of_book))
        // Authors
        .route("/authors", get(authors::list_authors).post(authors::create_author))
        .route(
            "/authors/:id",
            get(authors::get_author)
                .put(authors::update_author)
                .delete(authors::delete_author),
        )
        .route("/authors/:id/books", get(authors::books_by_author))
        .route(
            "/authors/:id/books/:book_id",
            put(authors::link_book).delete(authors::unlink_book),
        )
        // Memberships
        .route(
            "/membership-types",
            get(memberships::list_types).post(memberships::create_type),
        )
        .route(
            "/membership-types/:id",
            get(memberships::get_type)
                .put(memberships::update_type)
                .delete(memberships::delete_type),
        )
        .route(
            "/borrowers",
            get(memberships::list_borrowers).post(memberships::create_borrower),
        )
        .route("/borrowers/:id", get(memberships::get_borrower))
        .route("/borrowers/:id/membership", put(memberships::change_membership))
        .route("/borrowers/:id/cancel", post(memberships::cancel_membership))
        .route("/borrowers/:id/renew", post(memberships::renew_membership))
        .route("/borrowers/:id/loans", get(circulation::borrower_loans))
        // Circulation
        .route("/borrow", post(circulation::borrow))
        .route("/return", post(circulation::return_book))
        .route("/loans/:id", get(circulation::get_loan))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi::create_openapi_router())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}
