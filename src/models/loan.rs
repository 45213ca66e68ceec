//! Borrowed book (loan) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

/// One loan of one book to one borrower. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowedBook {
    pub id: i32,
    pub book_id: i32,
    pub borrower_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
}

impl BorrowedBook {
    pub fn status(&self) -> LoanStatus {
        if self.return_date.is_some() {
            LoanStatus::Returned
        } else {
            LoanStatus::Outstanding
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.status() == LoanStatus::Outstanding
    }
}

/// `Outstanding` -> `Returned`, terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Outstanding,
    Returned,
}

/// Status filter for loan listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatusFilter {
    Outstanding,
    Returned,
    #[default]
    All,
}

impl LoanStatusFilter {
    pub fn matches(&self, loan: &BorrowedBook) -> bool {
        match self {
            LoanStatusFilter::Outstanding => loan.is_outstanding(),
            LoanStatusFilter::Returned => !loan.is_outstanding(),
            LoanStatusFilter::All => true,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoanQuery {
    pub status: Option<LoanStatusFilter>,
}

/// Which loans to list
#[derive(Debug, Clone, Copy)]
pub enum LoanScope {
    Book(i32),
    Borrower(i32),
}

/// Borrow request
#[derive(Debug, Deserialize, ToSchema)]
pub struct BorrowRequest {
    pub book_id: i32,
    pub borrower_id: i32,
}

/// Return request
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReturnRequest {
    pub borrowed_book_id: i32,
}

/// Result of a return: a fresh transition or an idempotent no-op
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnOutcome {
    Returned(BorrowedBook),
    AlreadyReturned(BorrowedBook),
}

impl ReturnOutcome {
    pub fn loan(&self) -> &BorrowedBook {
        match self {
            ReturnOutcome::Returned(loan) | ReturnOutcome::AlreadyReturned(loan) => loan,
        }
    }
}

/// Input of the atomic borrow commit
#[derive(Debug, Clone)]
pub struct BorrowCommit {
    pub book_id: i32,
    /// Version of the book row the decision was based on
    pub book_version: i64,
    pub borrower_id: i32,
    pub borrow_date: DateTime<Utc>,
}
