//! Circulation repository: borrowed-book records and the atomic borrow/return commits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::loan::{BorrowCommit, BorrowedBook, LoanScope, LoanStatusFilter},
};

use super::CasOutcome;

/// Store for borrowed-book records.
///
/// `commit_borrow` and `commit_return` each run as one atomic unit covering the
/// book counter, the borrower counter and the loan row; no reader can observe
/// one without the others.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CirculationStore: Send + Sync {
    async fn get_loan(&self, id: i32) -> AppResult<BorrowedBook>;

    async fn list_loans(&self, scope: LoanScope, status: LoanStatusFilter) -> AppResult<Vec<BorrowedBook>>;

    async fn count_outstanding_for_book(&self, book_id: i32) -> AppResult<i64>;

    /// Decrement the book's available copies (compare-and-set on version, still
    /// positive, not deleted), bump the borrower's count (borrower still active)
    /// and insert the loan. `Stale` when any of those conditions no longer holds.
    async fn commit_borrow(&self, commit: &BorrowCommit) -> AppResult<CasOutcome<BorrowedBook>>;

    /// Set the return date, give the copy back (capped at total) and decrement the
    /// borrower's count (floored at 0). `Stale` when the loan was already returned.
    async fn commit_return(
        &self,
        loan_id: i32,
        returned_at: DateTime<Utc>,
    ) -> AppResult<CasOutcome<BorrowedBook>>;
}

#[derive(Clone)]
pub struct PgCirculationStore {
    pool: Pool<Postgres>,
}

impl PgCirculationStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Compare-and-set on the book row; takes the row lock until commit
    async fn update_available_copies(
        tx: &mut Transaction<'_, Postgres>,
        book_id: i32,
        expected_version: i64,
        delta: i32,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = available_copies + $1,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $2 AND version = $3 AND is_deleted = FALSE
              AND available_copies + $1 >= 0
              AND available_copies + $1 <= total_copies
            "#,
        )
        .bind(delta)
        .bind(book_id)
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Adjust the denormalized loan counter, floored at 0
    async fn increment_borrowed_count(
        tx: &mut Transaction<'_, Postgres>,
        borrower_id: i32,
        delta: i32,
        require_active: bool,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE borrowers
            SET borrowed_books_count = GREATEST(borrowed_books_count + $1, 0),
                updated_at = NOW()
            WHERE id = $2 AND (is_active OR NOT $3)
            "#,
        )
        .bind(delta)
        .bind(borrower_id)
        .bind(require_active)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CirculationStore for PgCirculationStore {
    async fn get_loan(&self, id: i32) -> AppResult<BorrowedBook> {
        sqlx::query_as::<_, BorrowedBook>("SELECT * FROM borrowed_books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrowed book with id {} not found", id)))
    }

    async fn list_loans(&self, scope: LoanScope, status: LoanStatusFilter) -> AppResult<Vec<BorrowedBook>> {
        let (column, id) = match scope {
            LoanScope::Book(id) => ("book_id", id),
            LoanScope::Borrower(id) => ("borrower_id", id),
        };
        let status_clause = match status {
            LoanStatusFilter::Outstanding => " AND return_date IS NULL",
            LoanStatusFilter::Returned => " AND return_date IS NOT NULL",
            LoanStatusFilter::All => "",
        };

        let loans = sqlx::query_as::<_, BorrowedBook>(&format!(
            "SELECT * FROM borrowed_books WHERE {} = $1{} ORDER BY borrow_date DESC, id DESC",
            column, status_clause
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    async fn count_outstanding_for_book(&self, book_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowed_books WHERE book_id = $1 AND return_date IS NULL",
        )
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn commit_borrow(&self, commit: &BorrowCommit) -> AppResult<CasOutcome<BorrowedBook>> {
        let mut tx = self.pool.begin().await?;

        if !Self::update_available_copies(&mut tx, commit.book_id, commit.book_version, -1).await? {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        }

        if !Self::increment_borrowed_count(&mut tx, commit.borrower_id, 1, true).await? {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        }

        let loan = sqlx::query_as::<_, BorrowedBook>(
            r#"
            INSERT INTO borrowed_books (book_id, borrower_id, borrow_date, return_date)
            VALUES ($1, $2, $3, NULL)
            RETURNING *
            "#,
        )
        .bind(commit.book_id)
        .bind(commit.borrower_id)
        .bind(commit.borrow_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CasOutcome::Applied(loan))
    }

    async fn commit_return(
        &self,
        loan_id: i32,
        returned_at: DateTime<Utc>,
    ) -> AppResult<CasOutcome<BorrowedBook>> {
        let mut tx = self.pool.begin().await?;

        let returned = sqlx::query_as::<_, BorrowedBook>(
            r#"
            UPDATE borrowed_books SET return_date = $1
            WHERE id = $2 AND return_date IS NULL
            RETURNING *
            "#,
        )
        .bind(returned_at)
        .bind(loan_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(loan) = returned else {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        };

        // Returns apply to soft-deleted books as well; the cap guards against double returns
        sqlx::query(
            r#"
            UPDATE books
            SET available_copies = LEAST(available_copies + 1, total_copies),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(loan.book_id)
        .execute(&mut *tx)
        .await?;

        Self::increment_borrowed_count(&mut tx, loan.borrower_id, -1, false).await?;

        tx.commit().await?;

        Ok(CasOutcome::Applied(loan))
    }
}
