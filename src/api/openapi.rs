//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, authors, books, circulation, health, memberships};

/// Registers the `bearer_auth` scheme referenced by the secured paths
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Libris API",
        version = "1.0.0",
        description = "Library management REST API: catalog, memberships and circulation"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    modifiers(&BearerAuth),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Identity
        auth::signup,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::request_password_reset,
        auth::confirm_password_reset,
        auth::me,
        auth::update_role,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Authors
        authors::list_authors,
        authors::get_author,
        authors::create_author,
        authors::update_author,
        authors::delete_author,
        authors::books_by_author,
        authors::authors_of_book,
        authors::link_book,
        authors::unlink_book,
        // Memberships
        memberships::list_types,
        memberships::get_type,
        memberships::create_type,
        memberships::update_type,
        memberships::delete_type,
        memberships::list_borrowers,
        memberships::create_borrower,
        memberships::get_borrower,
        memberships::change_membership,
        memberships::cancel_membership,
        memberships::renew_membership,
        // Circulation
        circulation::borrow,
        circulation::return_book,
        circulation::adjust_copies,
        circulation::availability,
        circulation::book_loans,
        circulation::borrower_loans,
        circulation::get_loan,
    ),
    components(
        schemas(
            // Identity
            crate::models::user::Role,
            crate::models::user::SignupRequest,
            crate::models::user::LoginRequest,
            crate::models::user::TokenPair,
            crate::models::user::RefreshRequest,
            crate::models::user::AccessToken,
            crate::models::user::LogoutRequest,
            crate::models::user::PasswordResetRequest,
            crate::models::user::PasswordResetConfirm,
            crate::models::user::UpdateRole,
            crate::models::user::UserInfo,
            // Catalog
            crate::models::book::Book,
            crate::models::book::BookPage,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            crate::models::book::AdjustCopies,
            crate::models::book::Availability,
            crate::models::author::Author,
            crate::models::author::AuthorInput,
            // Memberships
            crate::models::membership::MembershipType,
            crate::models::membership::MembershipTypeInput,
            crate::models::membership::Borrower,
            crate::models::membership::CreateBorrower,
            crate::models::membership::ChangeMembership,
            // Circulation
            crate::models::loan::BorrowedBook,
            crate::models::loan::LoanStatus,
            crate::models::loan::LoanStatusFilter,
            crate::models::loan::BorrowRequest,
            crate::models::loan::ReturnRequest,
            circulation::ReturnStatus,
            circulation::ReturnResponse,
            // Common
            health::HealthResponse,
            super::MessageResponse,
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Signup, tokens, password reset and roles"),
        (name = "books", description = "Book catalog"),
        (name = "authors", description = "Authors and book credits"),
        (name = "memberships", description = "Membership types and borrowers"),
        (name = "circulation", description = "Borrowing, returns and copy counts")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
