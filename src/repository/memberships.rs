//! Membership types and borrowers repository

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres};

use crate::{
    error::{map_unique_violation, AppError, AppResult},
    models::membership::{Borrower, MembershipType, MembershipTypeInput},
};

use super::CasOutcome;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn list_types(&self) -> AppResult<Vec<MembershipType>>;
    async fn get_type(&self, id: i32) -> AppResult<MembershipType>;
    async fn create_type(&self, input: &MembershipTypeInput) -> AppResult<MembershipType>;
    async fn update_type(&self, id: i32, input: &MembershipTypeInput) -> AppResult<MembershipType>;
    async fn soft_delete_type(&self, id: i32) -> AppResult<()>;
    async fn price_exists(&self, price: Decimal, exclude_id: Option<i32>) -> AppResult<bool>;

    async fn get_borrower(&self, id: i32) -> AppResult<Borrower>;
    async fn list_borrowers(&self) -> AppResult<Vec<Borrower>>;
    async fn create_borrower(&self, user_id: i32, membership_type_id: i32) -> AppResult<Borrower>;
    async fn set_membership_type(&self, id: i32, membership_type_id: i32) -> AppResult<Borrower>;

    /// Deactivate only while the borrower has no outstanding loans
    async fn deactivate_borrower(&self, id: i32) -> AppResult<CasOutcome<Borrower>>;
    async fn reactivate_borrower(&self, id: i32) -> AppResult<Borrower>;
}

const TYPE_COLUMNS: &str = "id, title, price, is_deleted, created_at, updated_at";
const BORROWER_COLUMNS: &str =
    "id, user_id, membership_type_id, borrowed_books_count, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgMembershipStore {
    pool: Pool<Postgres>,
}

impl PgMembershipStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn borrower_not_found(id: i32) -> AppError {
        AppError::NotFound(format!("Borrower with id {} not found", id))
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn list_types(&self) -> AppResult<Vec<MembershipType>> {
        let types = sqlx::query_as::<_, MembershipType>(&format!(
            "SELECT {} FROM membership_types WHERE is_deleted = FALSE ORDER BY price, id",
            TYPE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(types)
    }

    async fn get_type(&self, id: i32) -> AppResult<MembershipType> {
        sqlx::query_as::<_, MembershipType>(&format!(
            "SELECT {} FROM membership_types WHERE id = $1 AND is_deleted = FALSE",
            TYPE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Membership type with id {} not found", id)))
    }

    async fn create_type(&self, input: &MembershipTypeInput) -> AppResult<MembershipType> {
        sqlx::query_as::<_, MembershipType>(&format!(
            r#"
            INSERT INTO membership_types (title, price, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING {}
            "#,
            TYPE_COLUMNS
        ))
        .bind(&input.title)
        .bind(input.price)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "A membership type with this price already exists"))
    }

    async fn update_type(&self, id: i32, input: &MembershipTypeInput) -> AppResult<MembershipType> {
        sqlx::query_as::<_, MembershipType>(&format!(
            r#"
            UPDATE membership_types SET title = $1, price = $2, updated_at = $3
            WHERE id = $4 AND is_deleted = FALSE
            RETURNING {}
            "#,
            TYPE_COLUMNS
        ))
        .bind(&input.title)
        .bind(input.price)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "A membership type with this price already exists"))?
        .ok_or_else(|| AppError::NotFound(format!("Membership type with id {} not found", id)))
    }

    async fn soft_delete_type(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE membership_types SET is_deleted = TRUE, updated_at = $1 WHERE id = $2 AND is_deleted = FALSE",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Membership type with id {} not found", id)));
        }
        Ok(())
    }

    async fn price_exists(&self, price: Decimal, exclude_id: Option<i32>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM membership_types WHERE price = $1 AND ($2::INTEGER IS NULL OR id <> $2))",
        )
        .bind(price)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn get_borrower(&self, id: i32) -> AppResult<Borrower> {
        sqlx::query_as::<_, Borrower>(&format!(
            "SELECT {} FROM borrowers WHERE id = $1",
            BORROWER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Self::borrower_not_found(id))
    }

    async fn list_borrowers(&self) -> AppResult<Vec<Borrower>> {
        let borrowers = sqlx::query_as::<_, Borrower>(&format!(
            "SELECT {} FROM borrowers ORDER BY id",
            BORROWER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(borrowers)
    }

    async fn create_borrower(&self, user_id: i32, membership_type_id: i32) -> AppResult<Borrower> {
        sqlx::query_as::<_, Borrower>(&format!(
            r#"
            INSERT INTO borrowers (user_id, membership_type_id, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING {}
            "#,
            BORROWER_COLUMNS
        ))
        .bind(user_id)
        .bind(membership_type_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "User already has a borrower record"))
    }

    async fn set_membership_type(&self, id: i32, membership_type_id: i32) -> AppResult<Borrower> {
        sqlx::query_as::<_, Borrower>(&format!(
            r#"
            UPDATE borrowers SET membership_type_id = $1, updated_at = $2
            WHERE id = $3
            RETURNING {}
            "#,
            BORROWER_COLUMNS
        ))
        .bind(membership_type_id)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Self::borrower_not_found(id))
    }

    async fn deactivate_borrower(&self, id: i32) -> AppResult<CasOutcome<Borrower>> {
        // The count check and the flag flip happen under the same row lock a borrow takes
        let updated = sqlx::query_as::<_, Borrower>(&format!(
            r#"
            UPDATE borrowers SET is_active = FALSE, updated_at = $1
            WHERE id = $2 AND borrowed_books_count = 0
            RETURNING {}
            "#,
            BORROWER_COLUMNS
        ))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(borrower) => Ok(CasOutcome::Applied(borrower)),
            None => {
                // Distinguish a missing row from one with outstanding loans
                self.get_borrower(id).await?;
                Ok(CasOutcome::Stale)
            }
        }
    }

    async fn reactivate_borrower(&self, id: i32) -> AppResult<Borrower> {
        sqlx::query_as::<_, Borrower>(&format!(
            "UPDATE borrowers SET is_active = TRUE, updated_at = $1 WHERE id = $2 RETURNING {}",
            BORROWER_COLUMNS
        ))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Self::borrower_not_found(id))
    }
}
