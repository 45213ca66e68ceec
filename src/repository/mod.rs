//! Repository layer: store traits and their PostgreSQL implementations
//!
//! Every read path on books, authors and membership types excludes
//! soft-deleted rows; callers never filter `is_deleted` themselves.

pub mod authors;
pub mod books;
pub mod loans;
pub mod memberships;
pub mod memory;
pub mod users;

use std::sync::Arc;

use sqlx::{Pool, Postgres};

pub use authors::AuthorStore;
pub use books::BookStore;
pub use loans::CirculationStore;
pub use memberships::MembershipStore;
pub use users::UserStore;

/// Case-insensitive `LIKE` pattern matching `term` literally anywhere in the value
pub(crate) fn contains_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Outcome of a conditional (compare-and-set) write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<T> {
    Applied(T),
    /// The row changed since it was read; nothing was written
    Stale,
}

/// Main repository struct holding one handle per store
#[derive(Clone)]
pub struct Repository {
    pub books: Arc<dyn BookStore>,
    pub authors: Arc<dyn AuthorStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub loans: Arc<dyn CirculationStore>,
    pub users: Arc<dyn UserStore>,
}

impl Repository {
    /// Create a PostgreSQL-backed repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: Arc::new(books::PgBookStore::new(pool.clone())),
            authors: Arc::new(authors::PgAuthorStore::new(pool.clone())),
            memberships: Arc::new(memberships::PgMembershipStore::new(pool.clone())),
            loans: Arc::new(loans::PgCirculationStore::new(pool.clone())),
            users: Arc::new(users::PgUserStore::new(pool)),
        }
    }

    /// Create a repository whose stores all share one in-memory state
    pub fn in_memory() -> Self {
        let store = memory::MemoryStore::default();
        Self {
            books: Arc::new(store.clone()),
            authors: Arc::new(store.clone()),
            memberships: Arc::new(store.clone()),
            loans: Arc::new(store.clone()),
            users: Arc::new(store),
        }
    }
}
