//! Authors repository and the book/author association

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        author::{Author, AuthorInput, AuthorQuery},
        book::Book,
    },
};

use super::contains_pattern;

#[async_trait]
pub trait AuthorStore: Send + Sync {
    async fn get(&self, id: i32) -> AppResult<Author>;
    async fn list(&self, query: &AuthorQuery) -> AppResult<Vec<Author>>;
    async fn create(&self, author: &AuthorInput) -> AppResult<Author>;
    async fn update(&self, id: i32, author: &AuthorInput) -> AppResult<Author>;
    async fn soft_delete(&self, id: i32) -> AppResult<()>;

    /// Idempotent: linking twice keeps a single association
    async fn link_book(&self, author_id: i32, book_id: i32) -> AppResult<()>;
    async fn unlink_book(&self, author_id: i32, book_id: i32) -> AppResult<()>;

    /// Live books written by a live author
    async fn books_of(&self, author_id: i32) -> AppResult<Vec<Book>>;
    /// Live authors of a live book
    async fn authors_of(&self, book_id: i32) -> AppResult<Vec<Author>>;
}

const AUTHOR_COLUMNS: &str = "id, full_name, dob, nationality, is_deleted, created_at, updated_at";

#[derive(Clone)]
pub struct PgAuthorStore {
    pool: Pool<Postgres>,
}

impl PgAuthorStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorStore for PgAuthorStore {
    async fn get(&self, id: i32) -> AppResult<Author> {
        sqlx::query_as::<_, Author>(&format!(
            "SELECT {} FROM authors WHERE id = $1 AND is_deleted = FALSE",
            AUTHOR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Author with id {} not found", id)))
    }

    async fn list(&self, query: &AuthorQuery) -> AppResult<Vec<Author>> {
        let pattern = query.name.as_deref().map(contains_pattern);
        let authors = sqlx::query_as::<_, Author>(&format!(
            r#"
            SELECT {} FROM authors
            WHERE is_deleted = FALSE AND ($1::TEXT IS NULL OR LOWER(full_name) LIKE $1)
            ORDER BY full_name, id
            "#,
            AUTHOR_COLUMNS
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(authors)
    }

    async fn create(&self, author: &AuthorInput) -> AppResult<Author> {
        let author = sqlx::query_as::<_, Author>(&format!(
            r#"
            INSERT INTO authors (full_name, dob, nationality, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {}
            "#,
            AUTHOR_COLUMNS
        ))
        .bind(&author.full_name)
        .bind(author.dob)
        .bind(&author.nationality)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(author)
    }

    async fn update(&self, id: i32, author: &AuthorInput) -> AppResult<Author> {
        sqlx::query_as::<_, Author>(&format!(
            r#"
            UPDATE authors SET full_name = $1, dob = $2, nationality = $3, updated_at = $4
            WHERE id = $5 AND is_deleted = FALSE
            RETURNING {}
            "#,
            AUTHOR_COLUMNS
        ))
        .bind(&author.full_name)
        .bind(author.dob)
        .bind(&author.nationality)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Author with id {} not found", id)))
    }

    async fn soft_delete(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE authors SET is_deleted = TRUE, updated_at = $1 WHERE id = $2 AND is_deleted = FALSE",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Author with id {} not found", id)));
        }
        Ok(())
    }

    async fn link_book(&self, author_id: i32, book_id: i32) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO book_authors (book_id, author_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(book_id)
        .bind(author_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unlink_book(&self, author_id: i32, book_id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM book_authors WHERE book_id = $1 AND author_id = $2")
            .bind(book_id)
            .bind(author_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Author {} is not linked to book {}",
                author_id, book_id
            )));
        }
        Ok(())
    }

    async fn books_of(&self, author_id: i32) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT b.id, b.title, b.isbn, b.publication_year, b.genre, b.available_copies,
                   b.total_copies, b.version, b.is_deleted, b.created_at, b.updated_at
            FROM book_authors ba
            JOIN books b ON b.id = ba.book_id
            WHERE ba.author_id = $1 AND b.is_deleted = FALSE
            ORDER BY b.title, b.id
            "#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    async fn authors_of(&self, book_id: i32) -> AppResult<Vec<Author>> {
        let authors = sqlx::query_as::<_, Author>(
            r#"
            SELECT a.id, a.full_name, a.dob, a.nationality, a.is_deleted, a.created_at, a.updated_at
            FROM book_authors ba
            JOIN authors a ON a.id = ba.author_id
            WHERE ba.book_id = $1 AND a.is_deleted = FALSE
            ORDER BY a.full_name, a.id
            "#,
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(authors)
    }
}
