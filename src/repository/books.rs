//! Books repository for database operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, QueryBuilder};

use crate::{
    error::{map_unique_violation, AppError, AppResult},
    models::book::{Book, BookListParams, CreateBook, UpdateBook},
};

use super::{contains_pattern, CasOutcome};

/// Catalog store for books
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Get a live (not soft-deleted) book
    async fn get(&self, id: i32) -> AppResult<Book>;

    /// Filtered, sorted page of live books with the total match count
    async fn list(&self, params: &BookListParams) -> AppResult<(Vec<Book>, i64)>;

    async fn create(&self, book: &CreateBook) -> AppResult<Book>;

    /// Replace the descriptive fields of a live book
    async fn update(&self, id: i32, book: &UpdateBook) -> AppResult<Book>;

    /// Soft delete a live book. Without `force` the delete is refused (`Stale`)
    /// while loans are outstanding; the check and the write are one atomic step.
    /// `Applied` carries the outstanding-loan count at deletion time.
    async fn soft_delete(&self, id: i32, force: bool) -> AppResult<CasOutcome<i64>>;

    /// ISBN uniqueness spans soft-deleted rows too
    async fn isbn_exists(&self, isbn: &str, exclude_id: Option<i32>) -> AppResult<bool>;

    /// Set both copy counters if the row is still at `expected_version`
    async fn update_copies(
        &self,
        id: i32,
        expected_version: i64,
        total_copies: i32,
        available_copies: i32,
    ) -> AppResult<CasOutcome<Book>>;
}

const BOOK_COLUMNS: &str = "id, title, isbn, publication_year, genre, available_copies, \
                            total_copies, version, is_deleted, created_at, updated_at";

#[derive(Clone)]
pub struct PgBookStore {
    pool: Pool<Postgres>,
}

impl PgBookStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &BookListParams) {
        builder.push(" WHERE is_deleted = FALSE");

        if let Some(ref genre) = params.genre {
            builder.push(" AND genre = ").push_bind(genre.clone());
        }

        if let Some(ref year) = params.publication_year {
            builder.push(" AND publication_year = ").push_bind(year.clone());
        }

        if let Some(ref search) = params.search {
            let pattern = contains_pattern(search);
            builder
                .push(" AND (LOWER(title) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(COALESCE(isbn, '')) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(COALESCE(genre, '')) LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[async_trait]
impl BookStore for PgBookStore {
    async fn get(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books WHERE id = $1 AND is_deleted = FALSE",
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    async fn list(&self, params: &BookListParams) -> AppResult<(Vec<Book>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books");
        Self::push_filters(&mut count, params);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM books", BOOK_COLUMNS));
        Self::push_filters(&mut select, params);

        // Column names come from a closed enum, never from user input
        match params.sort {
            Some(sort) => {
                select
                    .push(" ORDER BY ")
                    .push(sort.field.column())
                    .push(if sort.descending { " DESC" } else { " ASC" })
                    .push(", id ASC");
            }
            None => {
                select.push(" ORDER BY id ASC");
            }
        }

        select
            .push(" LIMIT ")
            .push_bind(params.per_page)
            .push(" OFFSET ")
            .push_bind(params.offset());

        let books = select.build_query_as::<Book>().fetch_all(&self.pool).await?;

        Ok((books, total))
    }

    async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        let now = Utc::now();

        sqlx::query_as::<_, Book>(&format!(
            r#"
            INSERT INTO books (title, isbn, publication_year, genre,
                               available_copies, total_copies, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(&book.title)
        .bind(&book.isbn)
        .bind(&book.publication_year)
        .bind(&book.genre)
        .bind(book.initial_available())
        .bind(book.total_copies)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Book with this ISBN already exists"))
    }

    async fn update(&self, id: i32, book: &UpdateBook) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET title = $1, isbn = $2, publication_year = $3, genre = $4, updated_at = $5
            WHERE id = $6 AND is_deleted = FALSE
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(&book.title)
        .bind(&book.isbn)
        .bind(&book.publication_year)
        .bind(&book.genre)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Book with this ISBN already exists"))?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    async fn soft_delete(&self, id: i32, force: bool) -> AppResult<CasOutcome<i64>> {
        let mut tx = self.pool.begin().await?;

        // Borrow commits update the book row first, so holding its lock means every
        // loan committed so far is visible to the count below
        let locked: Option<i32> =
            sqlx::query_scalar("SELECT id FROM books WHERE id = $1 AND is_deleted = FALSE FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Book with id {} not found", id)));
        }

        let outstanding: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowed_books WHERE book_id = $1 AND return_date IS NULL",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if outstanding > 0 && !force {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        }

        sqlx::query(
            "UPDATE books SET is_deleted = TRUE, version = version + 1, updated_at = $1 WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CasOutcome::Applied(outstanding))
    }

    async fn isbn_exists(&self, isbn: &str, exclude_id: Option<i32>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM books WHERE isbn = $1 AND ($2::INTEGER IS NULL OR id <> $2))",
        )
        .bind(isbn)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn update_copies(
        &self,
        id: i32,
        expected_version: i64,
        total_copies: i32,
        available_copies: i32,
    ) -> AppResult<CasOutcome<Book>> {
        let updated = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET total_copies = $1, available_copies = $2,
                version = version + 1, updated_at = $3
            WHERE id = $4 AND version = $5 AND is_deleted = FALSE
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(total_copies)
        .bind(available_copies)
        .bind(Utc::now())
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match updated {
            Some(book) => CasOutcome::Applied(book),
            None => CasOutcome::Stale,
        })
    }
}
