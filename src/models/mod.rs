//! Data models for Libris

pub mod author;
pub mod book;
pub mod loan;
pub mod membership;
pub mod user;

// Re-export commonly used types
pub use author::Author;
pub use book::Book;
pub use loan::{BorrowedBook, LoanStatus, ReturnOutcome};
pub use membership::{Borrower, MembershipType};
pub use user::{Role, User, UserClaims};
