//! Circulation: borrowing, returning and copy-count adjustments
//!
//! Every mutation that touches `available_copies` goes through here. Decisions
//! are taken on a read of the book, then committed with a compare-and-set on
//! the book's version; a lost race re-reads and retries a bounded number of
//! times before giving up with `Conflict`.

use chrono::Utc;

use crate::{
    config::CirculationConfig,
    error::{AppError, AppResult},
    models::{
        book::{Availability, Book},
        loan::{BorrowCommit, BorrowedBook, LoanScope, LoanStatusFilter, ReturnOutcome},
        membership::Borrower,
        user::UserClaims,
    },
    repository::{CasOutcome, Repository},
};

#[derive(Clone)]
pub struct CirculationService {
    repository: Repository,
    max_retries: u32,
}

impl CirculationService {
    pub fn new(repository: Repository, config: &CirculationConfig) -> Self {
        Self {
            repository,
            max_retries: config.max_retries.max(1),
        }
    }

    /// Borrower lookup plus ownership check: users act only through their own record
    async fn borrower_for(&self, claims: &UserClaims, borrower_id: i32) -> AppResult<Borrower> {
        let borrower = self.repository.memberships.get_borrower(borrower_id).await?;
        claims.require_self_or_staff(borrower.user_id)?;
        Ok(borrower)
    }

    /// Borrow one copy of a book on behalf of a borrower
    pub async fn borrow(&self, claims: &UserClaims, book_id: i32, borrower_id: i32) -> AppResult<BorrowedBook> {
        self.borrower_for(claims, borrower_id).await?;
        self.borrow_book(book_id, borrower_id).await
    }

    /// Return a loan on behalf of its borrower
    pub async fn return_loan(&self, claims: &UserClaims, loan_id: i32) -> AppResult<ReturnOutcome> {
        let loan = self.repository.loans.get_loan(loan_id).await?;
        self.borrower_for(claims, loan.borrower_id).await?;
        self.return_book(loan_id).await
    }

    pub async fn borrow_book(&self, book_id: i32, borrower_id: i32) -> AppResult<BorrowedBook> {
        for attempt in 1..=self.max_retries {
            let book = self.repository.books.get(book_id).await?;

            let borrower = self.repository.memberships.get_borrower(borrower_id).await?;
            if !borrower.is_active {
                return Err(AppError::NotFound(format!(
                    "Borrower with id {} is not active",
                    borrower_id
                )));
            }

            if book.available_copies <= 0 {
                return Err(AppError::Unavailable(format!(
                    "No copies of book {} are available",
                    book_id
                )));
            }

            let commit = BorrowCommit {
                book_id,
                book_version: book.version,
                borrower_id,
                borrow_date: Utc::now(),
            };

            match self.repository.loans.commit_borrow(&commit).await? {
                CasOutcome::Applied(loan) => {
                    tracing::info!(
                        loan_id = loan.id,
                        book_id,
                        borrower_id,
                        "Book borrowed"
                    );
                    return Ok(loan);
                }
                CasOutcome::Stale => {
                    tracing::debug!(book_id, borrower_id, attempt, "Borrow lost a race, retrying");
                }
            }
        }

        tracing::warn!(book_id, borrower_id, "Borrow gave up after {} attempts", self.max_retries);
        Err(AppError::Conflict(format!(
            "Book {} is being modified concurrently, try again",
            book_id
        )))
    }

    pub async fn return_book(&self, loan_id: i32) -> AppResult<ReturnOutcome> {
        let loan = self.repository.loans.get_loan(loan_id).await?;
        if !loan.is_outstanding() {
            tracing::info!(loan_id, "Loan already returned");
            return Ok(ReturnOutcome::AlreadyReturned(loan));
        }

        match self.repository.loans.commit_return(loan_id, Utc::now()).await? {
            CasOutcome::Applied(loan) => {
                tracing::info!(
                    loan_id,
                    book_id = loan.book_id,
                    borrower_id = loan.borrower_id,
                    "Book returned"
                );
                Ok(ReturnOutcome::Returned(loan))
            }
            // A concurrent return got there first
            CasOutcome::Stale => {
                let loan = self.repository.loans.get_loan(loan_id).await?;
                Ok(ReturnOutcome::AlreadyReturned(loan))
            }
        }
    }

    /// Add or remove physical copies (staff)
    pub async fn adjust_copies(&self, claims: &UserClaims, book_id: i32, delta: i32) -> AppResult<Book> {
        claims.require_staff()?;
        self.adjust_copy_count(book_id, delta).await
    }

    pub async fn adjust_copy_count(&self, book_id: i32, delta: i32) -> AppResult<Book> {
        for attempt in 1..=self.max_retries {
            let book = self.repository.books.get(book_id).await?;

            let (total, available) = match (
                book.total_copies.checked_add(delta),
                book.available_copies.checked_add(delta),
            ) {
                (Some(total), Some(available)) => (total, available),
                _ => return Err(AppError::InvalidState("Copy count out of range".to_string())),
            };

            if available < 0 {
                return Err(AppError::InvalidState(format!(
                    "Removing {} copies would leave a negative number of available copies ({} available)",
                    -delta, book.available_copies
                )));
            }
            if available > total {
                return Err(AppError::InvalidState(
                    "Available copies cannot exceed total copies".to_string(),
                ));
            }

            match self
                .repository
                .books
                .update_copies(book_id, book.version, total, available)
                .await?
            {
                CasOutcome::Applied(book) => {
                    tracing::info!(
                        book_id,
                        delta,
                        total_copies = book.total_copies,
                        available_copies = book.available_copies,
                        "Copy count adjusted"
                    );
                    return Ok(book);
                }
                CasOutcome::Stale => {
                    tracing::debug!(book_id, attempt, "Copy adjustment lost a race, retrying");
                }
            }
        }

        tracing::warn!(book_id, "Copy adjustment gave up after {} attempts", self.max_retries);
        Err(AppError::Conflict(format!(
            "Book {} is being modified concurrently, try again",
            book_id
        )))
    }

    pub async fn availability(&self, book_id: i32) -> AppResult<Availability> {
        let book = self.repository.books.get(book_id).await?;
        let outstanding_loans = self.repository.loans.count_outstanding_for_book(book_id).await?;
        Ok(Availability {
            book_id,
            total_copies: book.total_copies,
            available_copies: book.available_copies,
            outstanding_loans,
        })
    }

    pub async fn get_loan(&self, claims: &UserClaims, loan_id: i32) -> AppResult<BorrowedBook> {
        let loan = self.repository.loans.get_loan(loan_id).await?;
        self.borrower_for(claims, loan.borrower_id).await?;
        Ok(loan)
    }

    pub async fn borrower_loans(
        &self,
        claims: &UserClaims,
        borrower_id: i32,
        status: LoanStatusFilter,
    ) -> AppResult<Vec<BorrowedBook>> {
        self.borrower_for(claims, borrower_id).await?;
        self.repository
            .loans
            .list_loans(LoanScope::Borrower(borrower_id), status)
            .await
    }

    /// Loans of a book, including books soft-deleted since (staff)
    pub async fn book_loans(
        &self,
        claims: &UserClaims,
        book_id: i32,
        status: LoanStatusFilter,
    ) -> AppResult<Vec<BorrowedBook>> {
        claims.require_staff()?;
        self.repository
            .loans
            .list_loans(LoanScope::Book(book_id), status)
            .await
    }
}
