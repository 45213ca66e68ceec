//! Book (catalog) model and related types

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::AppError;

static PUBLICATION_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}$").expect("valid year regex"));

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;
/// Highest page whose offset still fits in an `i64`
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

/// Book model from database
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub isbn: Option<String>,
    pub publication_year: Option<String>,
    pub genre: Option<String>,
    pub available_copies: i32,
    pub total_copies: i32,
    /// Bumped on every copy-count change
    #[serde(skip_serializing)]
    pub version: i64,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(min = 1, max = 255))]
    pub isbn: Option<String>,
    #[validate(regex(path = *PUBLICATION_YEAR, message = "Publication year must be 4 digits"))]
    pub publication_year: Option<String>,
    #[validate(length(max = 255))]
    pub genre: Option<String>,
    #[validate(range(min = 0))]
    pub total_copies: i32,
    /// Defaults to `total_copies`
    #[validate(range(min = 0))]
    pub available_copies: Option<i32>,
}

impl CreateBook {
    pub fn initial_available(&self) -> i32 {
        self.available_copies.unwrap_or(self.total_copies)
    }
}

/// Update request for the descriptive fields; copy counts go through the copies endpoint
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(min = 1, max = 255))]
    pub isbn: Option<String>,
    #[validate(regex(path = *PUBLICATION_YEAR, message = "Publication year must be 4 digits"))]
    pub publication_year: Option<String>,
    #[validate(length(max = 255))]
    pub genre: Option<String>,
}

/// Book list query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    pub genre: Option<String>,
    pub publication_year: Option<String>,
    /// Case-insensitive match on title, ISBN and genre
    pub search: Option<String>,
    /// `title`, `publication_year` or `available_copies`, prefixed with `-` for descending
    pub ordering: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSortField {
    Title,
    PublicationYear,
    AvailableCopies,
}

impl BookSortField {
    pub fn column(&self) -> &'static str {
        match self {
            BookSortField::Title => "title",
            BookSortField::PublicationYear => "publication_year",
            BookSortField::AvailableCopies => "available_copies",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookSort {
    pub field: BookSortField,
    pub descending: bool,
}

impl std::str::FromStr for BookSort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let field = match name {
            "title" => BookSortField::Title,
            "publication_year" => BookSortField::PublicationYear,
            "available_copies" => BookSortField::AvailableCopies,
            other => {
                return Err(AppError::Validation(format!("Unknown ordering field: {}", other)))
            }
        };
        Ok(BookSort { field, descending })
    }
}

/// Validated listing parameters handed to the store
#[derive(Debug, Clone, Default)]
pub struct BookListParams {
    pub genre: Option<String>,
    pub publication_year: Option<String>,
    pub search: Option<String>,
    pub sort: Option<BookSort>,
    pub page: i64,
    pub per_page: i64,
}

impl BookListParams {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.per_page)
    }
}

impl TryFrom<&BookQuery> for BookListParams {
    type Error = AppError;

    fn try_from(query: &BookQuery) -> Result<Self, Self::Error> {
        let sort = query
            .ordering
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .transpose()?;
        Ok(Self {
            genre: query.genre.clone(),
            publication_year: query.publication_year.clone(),
            search: query.search.clone().filter(|s| !s.trim().is_empty()),
            sort,
            page: query.page.unwrap_or(1).clamp(1, MAX_PAGE),
            per_page: query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        })
    }
}

/// Paginated list of books
#[derive(Debug, Serialize, ToSchema)]
pub struct BookPage {
    pub items: Vec<Book>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Add (positive) or remove (negative) physical copies
#[derive(Debug, Deserialize, ToSchema)]
pub struct AdjustCopies {
    pub delta: i32,
}

/// Copy accounting for one book
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Availability {
    pub book_id: i32,
    pub total_copies: i32,
    pub available_copies: i32,
    pub outstanding_loans: i64,
}
