//! Membership types and borrowers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// Membership plan (reference data managed by administrators)
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct MembershipType {
    pub id: i32,
    pub title: String,
    #[schema(value_type = String, example = "19.99")]
    pub price: Decimal,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn non_negative(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

/// Create or replace membership type request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct MembershipTypeInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(custom(function = "non_negative"))]
    #[schema(value_type = String, example = "19.99")]
    pub price: Decimal,
}

/// Library member: one per user, referencing a membership type
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Borrower {
    pub id: i32,
    pub user_id: i32,
    pub membership_type_id: i32,
    /// Number of outstanding loans
    pub borrowed_books_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Assign a membership to a user, creating their borrower record
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBorrower {
    pub user_id: i32,
    pub membership_type_id: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeMembership {
    pub membership_type_id: i32,
}
