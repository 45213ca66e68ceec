//! Membership types and borrower records

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        membership::{Borrower, MembershipType, MembershipTypeInput},
        user::UserClaims,
    },
    repository::{CasOutcome, Repository},
};

#[derive(Clone)]
pub struct MembershipService {
    repository: Repository,
}

impl MembershipService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn list_types(&self) -> AppResult<Vec<MembershipType>> {
        self.repository.memberships.list_types().await
    }

    pub async fn get_type(&self, id: i32) -> AppResult<MembershipType> {
        self.repository.memberships.get_type(id).await
    }

    pub async fn create_type(&self, input: MembershipTypeInput) -> AppResult<MembershipType> {
        input.validate()?;
        if self.repository.memberships.price_exists(input.price, None).await? {
            return Err(AppError::Conflict(
                "A membership type with this price already exists".to_string(),
            ));
        }
        self.repository.memberships.create_type(&input).await
    }

    pub async fn update_type(&self, id: i32, input: MembershipTypeInput) -> AppResult<MembershipType> {
        input.validate()?;
        if self.repository.memberships.price_exists(input.price, Some(id)).await? {
            return Err(AppError::Conflict(
                "A membership type with this price already exists".to_string(),
            ));
        }
        self.repository.memberships.update_type(id, &input).await
    }

    pub async fn delete_type(&self, id: i32) -> AppResult<()> {
        self.repository.memberships.soft_delete_type(id).await
    }

    /// Borrower lookup restricted to its owner and staff
    pub async fn get_borrower(&self, claims: &UserClaims, id: i32) -> AppResult<Borrower> {
        let borrower = self.repository.memberships.get_borrower(id).await?;
        claims.require_self_or_staff(borrower.user_id)?;
        Ok(borrower)
    }

    pub async fn list_borrowers(&self) -> AppResult<Vec<Borrower>> {
        self.repository.memberships.list_borrowers().await
    }

    /// Give a user a membership; a user may only enroll themselves
    pub async fn create_borrower(
        &self,
        claims: &UserClaims,
        user_id: i32,
        membership_type_id: i32,
    ) -> AppResult<Borrower> {
        claims.require_self_or_staff(user_id)?;
        self.repository.users.get_by_id(user_id).await?;
        self.repository.memberships.get_type(membership_type_id).await?;

        let borrower = self
            .repository
            .memberships
            .create_borrower(user_id, membership_type_id)
            .await?;
        tracing::info!(borrower_id = borrower.id, user_id, membership_type_id, "Borrower created");
        Ok(borrower)
    }

    pub async fn change_membership(
        &self,
        claims: &UserClaims,
        id: i32,
        membership_type_id: i32,
    ) -> AppResult<Borrower> {
        self.get_borrower(claims, id).await?;
        self.repository.memberships.get_type(membership_type_id).await?;
        self.repository
            .memberships
            .set_membership_type(id, membership_type_id)
            .await
    }

    /// Deactivate a membership; refused while books are still out
    pub async fn cancel(&self, claims: &UserClaims, id: i32) -> AppResult<Borrower> {
        self.get_borrower(claims, id).await?;
        match self.repository.memberships.deactivate_borrower(id).await? {
            CasOutcome::Applied(borrower) => {
                tracing::info!(borrower_id = id, "Membership cancelled");
                Ok(borrower)
            }
            CasOutcome::Stale => Err(AppError::InvalidState(
                "Borrower still has outstanding loans".to_string(),
            )),
        }
    }

    pub async fn renew(&self, claims: &UserClaims, id: i32) -> AppResult<Borrower> {
        self.get_borrower(claims, id).await?;
        let borrower = self.repository.memberships.reactivate_borrower(id).await?;
        tracing::info!(borrower_id = id, "Membership renewed");
        Ok(borrower)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        config::CirculationConfig,
        models::{
            book::CreateBook,
            user::{NewUser, Role, TokenType},
        },
        services::circulation::CirculationService,
    };

    fn claims(role: Role, user_id: i32) -> UserClaims {
        let now = Utc::now().timestamp();
        UserClaims {
            sub: user_id.to_string(),
            user_id,
            role,
            token_type: TokenType::Access,
            jti: "jti".into(),
            exp: now + 600,
            iat: now,
        }
    }

    async fn add_user(repository: &Repository, email: &str) -> i32 {
        repository
            .users
            .create(&NewUser {
                email: email.into(),
                name: "Reader".into(),
                phone_number: "+4412345678".into(),
                role: Role::User,
                password_hash: "hash".into(),
            })
            .await
            .unwrap()
            .id
    }

    fn plan(title: &str, cents: i64) -> MembershipTypeInput {
        MembershipTypeInput {
            title: title.into(),
            price: Decimal::new(cents, 2),
        }
    }

    #[tokio::test]
    async fn membership_prices_are_unique() {
        let service = MembershipService::new(Repository::in_memory());
        service.create_type(plan("Basic", 500)).await.unwrap();
        let err = service.create_type(plan("Other", 500)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(service.create_type(plan("Negative", -1)).await.is_err());
    }

    #[tokio::test]
    async fn users_enroll_only_themselves() {
        let repository = Repository::in_memory();
        let service = MembershipService::new(repository.clone());
        let basic = service.create_type(plan("Basic", 500)).await.unwrap();
        let me = add_user(&repository, "me@example.org").await;
        let other = add_user(&repository, "other@example.org").await;

        let err = service
            .create_borrower(&claims(Role::User, me), other, basic.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let borrower = service
            .create_borrower(&claims(Role::User, me), me, basic.id)
            .await
            .unwrap();
        assert_eq!(borrower.borrowed_books_count, 0);
        assert!(borrower.is_active);

        let err = service
            .create_borrower(&claims(Role::Staff, 99), me, basic.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_is_refused_with_outstanding_loans() {
        let repository = Repository::in_memory();
        let service = MembershipService::new(repository.clone());
        let circulation = CirculationService::new(repository.clone(), &CirculationConfig { max_retries: 3 });
        let basic = service.create_type(plan("Basic", 500)).await.unwrap();
        let user = add_user(&repository, "reader@example.org").await;
        let owner = claims(Role::User, user);
        let borrower = service.create_borrower(&owner, user, basic.id).await.unwrap();
        let book = repository
            .books
            .create(&CreateBook {
                title: "Ubik".into(),
                isbn: None,
                publication_year: None,
                genre: None,
                total_copies: 1,
                available_copies: None,
            })
            .await
            .unwrap();

        let loan = circulation.borrow_book(book.id, borrower.id).await.unwrap();
        let err = service.cancel(&owner, borrower.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        circulation.return_book(loan.id).await.unwrap();
        let cancelled = service.cancel(&owner, borrower.id).await.unwrap();
        assert!(!cancelled.is_active);

        let renewed = service.renew(&owner, borrower.id).await.unwrap();
        assert!(renewed.is_active);
    }
}
