//! Author model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Author model from database
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Author {
    pub id: i32,
    pub full_name: String,
    pub dob: Option<NaiveDate>,
    pub nationality: Option<String>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create or replace author request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AuthorInput {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    pub dob: Option<NaiveDate>,
    #[validate(length(max = 255))]
    pub nationality: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct AuthorQuery {
    /// Case-insensitive match on the full name
    pub name: Option<String>,
}
