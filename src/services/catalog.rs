//! Catalog management service: books and authors

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        author::{Author, AuthorInput, AuthorQuery},
        book::{Book, BookListParams, BookPage, BookQuery, CreateBook, UpdateBook},
    },
    repository::{CasOutcome, Repository},
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Filtered, searched, ordered page of books
    pub async fn list_books(&self, query: &BookQuery) -> AppResult<BookPage> {
        let params = BookListParams::try_from(query)?;
        let (items, total) = self.repository.books.list(&params).await?;
        Ok(BookPage {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
        })
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books.get(id).await
    }

    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        book.validate()?;

        if book.initial_available() > book.total_copies {
            return Err(AppError::Validation(
                "Available copies cannot exceed total copies".to_string(),
            ));
        }

        if let Some(ref isbn) = book.isbn {
            if self.repository.books.isbn_exists(isbn, None).await? {
                return Err(AppError::Conflict("Book with this ISBN already exists".to_string()));
            }
        }

        let created = self.repository.books.create(&book).await?;
        tracing::info!(book_id = created.id, title = %created.title, "Book created");
        Ok(created)
    }

    pub async fn update_book(&self, id: i32, book: UpdateBook) -> AppResult<Book> {
        book.validate()?;

        if let Some(ref isbn) = book.isbn {
            if self.repository.books.isbn_exists(isbn, Some(id)).await? {
                return Err(AppError::Conflict("Book with this ISBN already exists".to_string()));
            }
        }

        self.repository.books.update(id, &book).await
    }

    /// Soft delete; refused while copies are out on loan unless `force` is set
    pub async fn delete_book(&self, id: i32, force: bool) -> AppResult<()> {
        match self.repository.books.soft_delete(id, force).await? {
            CasOutcome::Applied(outstanding) => {
                tracing::info!(book_id = id, outstanding, "Book deleted");
                Ok(())
            }
            CasOutcome::Stale => {
                let outstanding = self.repository.loans.count_outstanding_for_book(id).await?;
                Err(AppError::BusinessRule(format!(
                    "Book has {} outstanding loan(s). Use force=true to delete anyway.",
                    outstanding.max(1)
                )))
            }
        }
    }

    pub async fn list_authors(&self, query: &AuthorQuery) -> AppResult<Vec<Author>> {
        self.repository.authors.list(query).await
    }

    pub async fn get_author(&self, id: i32) -> AppResult<Author> {
        self.repository.authors.get(id).await
    }

    pub async fn create_author(&self, author: AuthorInput) -> AppResult<Author> {
        author.validate()?;
        self.repository.authors.create(&author).await
    }

    pub async fn update_author(&self, id: i32, author: AuthorInput) -> AppResult<Author> {
        author.validate()?;
        self.repository.authors.update(id, &author).await
    }

    pub async fn delete_author(&self, id: i32) -> AppResult<()> {
        self.repository.authors.soft_delete(id).await
    }

    pub async fn link_author(&self, author_id: i32, book_id: i32) -> AppResult<()> {
        self.repository.authors.get(author_id).await?;
        self.repository.books.get(book_id).await?;
        self.repository.authors.link_book(author_id, book_id).await
    }

    pub async fn unlink_author(&self, author_id: i32, book_id: i32) -> AppResult<()> {
        self.repository.authors.unlink_book(author_id, book_id).await
    }

    pub async fn books_by_author(&self, author_id: i32) -> AppResult<Vec<Book>> {
        self.repository.authors.get(author_id).await?;
        self.repository.authors.books_of(author_id).await
    }

    pub async fn authors_of_book(&self, book_id: i32) -> AppResult<Vec<Author>> {
        self.repository.books.get(book_id).await?;
        self.repository.authors.authors_of(book_id).await
    }
}
