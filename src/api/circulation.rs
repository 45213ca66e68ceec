//! Circulation endpoints: borrow, return, copy adjustments and loan queries

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        book::{AdjustCopies, Availability, Book},
        loan::{BorrowRequest, BorrowedBook, LoanQuery, ReturnOutcome, ReturnRequest},
    },
    AppState,
};

use super::AuthenticatedUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Returned,
    AlreadyReturned,
}

/// Result of a return request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReturnResponse {
    pub status: ReturnStatus,
    pub loan: BorrowedBook,
}

impl From<ReturnOutcome> for ReturnResponse {
    fn from(outcome: ReturnOutcome) -> Self {
        match outcome {
            ReturnOutcome::Returned(loan) => Self {
                status: ReturnStatus::Returned,
                loan,
            },
            ReturnOutcome::AlreadyReturned(loan) => Self {
                status: ReturnStatus::AlreadyReturned,
                loan,
            },
        }
    }
}

/// Borrow one copy of a book
#[utoipa::path(
    post,
    path = "/borrow",
    tag = "circulation",
    security(("bearer_auth" = [])),
    request_body = BorrowRequest,
    responses(
        (status = 201, description = "Book borrowed", body = BorrowedBook),
        (status = 403, description = "Cannot borrow for another user"),
        (status = 404, description = "Book or borrower not found, or borrower inactive"),
        (status = 409, description = "No copy available, or concurrent update")
    )
)]
pub async fn borrow(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<BorrowedBook>)> {
    let loan = state
        .services
        .circulation
        .borrow(&claims, request.book_id, request.borrower_id)
        .await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// Return a borrowed book; returning twice is a no-op
#[utoipa::path(
    post,
    path = "/return",
    tag = "circulation",
    security(("bearer_auth" = [])),
    request_body = ReturnRequest,
    responses(
        (status = 200, description = "Book returned, or was already returned", body = ReturnResponse),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<ReturnRequest>,
) -> AppResult<Json<ReturnResponse>> {
    let outcome = state
        .services
        .circulation
        .return_loan(&claims, request.borrowed_book_id)
        .await?;
    Ok(Json(outcome.into()))
}

/// Add or remove physical copies of a book
#[utoipa::path(
    post,
    path = "/books/{id}/copies",
    tag = "circulation",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    request_body = AdjustCopies,
    responses(
        (status = 200, description = "Copy counts updated", body = Book),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Concurrent update"),
        (status = 422, description = "Counts would become inconsistent")
    )
)]
pub async fn adjust_copies(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<AdjustCopies>,
) -> AppResult<Json<Book>> {
    let book = state
        .services
        .circulation
        .adjust_copies(&claims, id, request.delta)
        .await?;
    Ok(Json(book))
}

#[utoipa::path(
    get,
    path = "/books/{id}/availability",
    tag = "circulation",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Copy accounting", body = Availability),
        (status = 404, description = "Book not found")
    )
)]
pub async fn availability(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Availability>> {
    Ok(Json(state.services.circulation.availability(id).await?))
}

#[utoipa::path(
    get,
    path = "/books/{id}/loans",
    tag = "circulation",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID"), LoanQuery),
    responses(
        (status = 200, description = "Loans of the book", body = Vec<BorrowedBook>),
        (status = 403, description = "Staff privileges required")
    )
)]
pub async fn book_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Query(query): Query<LoanQuery>,
) -> AppResult<Json<Vec<BorrowedBook>>> {
    let loans = state
        .services
        .circulation
        .book_loans(&claims, id, query.status.unwrap_or_default())
        .await?;
    Ok(Json(loans))
}

#[utoipa::path(
    get,
    path = "/borrowers/{id}/loans",
    tag = "circulation",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrower ID"), LoanQuery),
    responses(
        (status = 200, description = "Loans of the borrower", body = Vec<BorrowedBook>),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Borrower not found")
    )
)]
pub async fn borrower_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Query(query): Query<LoanQuery>,
) -> AppResult<Json<Vec<BorrowedBook>>> {
    let loans = state
        .services
        .circulation
        .borrower_loans(&claims, id, query.status.unwrap_or_default())
        .await?;
    Ok(Json(loans))
}

#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "circulation",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowed book ID")),
    responses(
        (status = 200, description = "Loan", body = BorrowedBook),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowedBook>> {
    Ok(Json(state.services.circulation.get_loan(&claims, id).await?))
}
