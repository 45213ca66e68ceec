//! Libris library management server
//!
//! REST JSON API over a book catalog, library memberships and circulation.
//! Borrowing and returning keep copy counts and per-borrower loan counts
//! consistent under concurrent requests.

use std::sync::Arc;

use sqlx::{Pool, Postgres};

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
    /// Checked by the readiness endpoint; absent when running on in-memory stores
    pub db: Option<Pool<Postgres>>,
}
