//! PostgreSQL store tests
//!
//! Need a database: `DATABASE_URL=postgres://... cargo test --test pg_store_tests -- --ignored`

use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use libris_server::{
    config::CirculationConfig,
    error::AppError,
    models::{
        book::{Book, BookListParams, CreateBook},
        loan::{LoanScope, LoanStatusFilter, ReturnOutcome},
        membership::{Borrower, MembershipTypeInput},
        user::{NewUser, Role},
    },
    repository::{CasOutcome, Repository},
    services::circulation::CirculationService,
};

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn repository() -> Repository {
    Repository::new(pool().await)
}

fn circulation(repository: &Repository) -> CirculationService {
    CirculationService::new(repository.clone(), &CirculationConfig { max_retries: 3 })
}

async fn add_book(repository: &Repository, title: &str, copies: i32) -> Book {
    repository
        .books
        .create(&CreateBook {
            title: title.to_string(),
            isbn: None,
            publication_year: None,
            genre: Some(format!("pg-{}", Uuid::new_v4())),
            total_copies: copies,
            available_copies: None,
        })
        .await
        .unwrap()
}

async fn add_borrowers(repository: &Repository, count: usize) -> Vec<Borrower> {
    // Prices are unique, so each run gets its own membership type
    let cents = (Uuid::new_v4().as_u128() % 1_000_000_000) as i64;
    let membership = repository
        .memberships
        .create_type(&MembershipTypeInput {
            title: "Pg test".to_string(),
            price: Decimal::new(cents, 2),
        })
        .await
        .unwrap();

    let mut borrowers = Vec::with_capacity(count);
    for _ in 0..count {
        let user = repository
            .users
            .create(&NewUser {
                email: format!("{}@pg.test", Uuid::new_v4()),
                name: "Pg reader".to_string(),
                phone_number: "+33123456789".to_string(),
                role: Role::User,
                password_hash: "unused".to_string(),
            })
            .await
            .unwrap();
        borrowers.push(
            repository
                .memberships
                .create_borrower(user.id, membership.id)
                .await
                .unwrap(),
        );
    }
    borrowers
}

/// available = total - outstanding, and each borrower's count matches their open loans
async fn assert_counters(repository: &Repository, book_id: i32, borrowers: &[Borrower]) {
    let book = repository.books.get(book_id).await.unwrap();
    let outstanding = repository
        .loans
        .count_outstanding_for_book(book_id)
        .await
        .unwrap();
    assert!(book.available_copies >= 0);
    assert_eq!(i64::from(book.total_copies - book.available_copies), outstanding);

    for borrower in borrowers {
        let stored = repository.memberships.get_borrower(borrower.id).await.unwrap();
        let open = repository
            .loans
            .list_loans(LoanScope::Borrower(borrower.id), LoanStatusFilter::Outstanding)
            .await
            .unwrap();
        assert_eq!(stored.borrowed_books_count as usize, open.len());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Run with: cargo test --test pg_store_tests -- --ignored
async fn test_last_copy_race_has_one_winner() {
    let repository = repository().await;
    let service = circulation(&repository);
    let book = add_book(&repository, "Last copy", 1).await;
    let borrowers = add_borrowers(&repository, 8).await;

    let handles: Vec<_> = borrowers
        .iter()
        .map(|b| {
            let service = service.clone();
            let (book_id, borrower_id) = (book.id, b.id);
            tokio::spawn(async move { service.borrow_book(book_id, borrower_id).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AppError::Unavailable(_)) | Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(repository.books.get(book.id).await.unwrap().available_copies, 0);
    assert_counters(&repository, book.id, &borrowers).await;
}

#[tokio::test]
#[ignore]
async fn test_double_return_changes_counters_once() {
    let repository = repository().await;
    let service = circulation(&repository);
    let book = add_book(&repository, "Returned twice", 2).await;
    let borrowers = add_borrowers(&repository, 1).await;

    let loan = service.borrow_book(book.id, borrowers[0].id).await.unwrap();

    assert!(matches!(
        service.return_book(loan.id).await.unwrap(),
        ReturnOutcome::Returned(_)
    ));
    assert!(matches!(
        service.return_book(loan.id).await.unwrap(),
        ReturnOutcome::AlreadyReturned(_)
    ));

    // The conditional UPDATE refuses a second return on its own
    assert_eq!(
        repository
            .loans
            .commit_return(loan.id, chrono::Utc::now())
            .await
            .unwrap(),
        CasOutcome::Stale
    );

    let stored = repository.books.get(book.id).await.unwrap();
    assert_eq!(stored.available_copies, 2);
    assert_eq!(
        repository.memberships.get_borrower(borrowers[0].id).await.unwrap().borrowed_books_count,
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_counters_hold_after_mixed_borrows_and_returns() {
    let repository = repository().await;
    let service = circulation(&repository);
    let book = add_book(&repository, "Busy shelf", 3).await;
    let borrowers = add_borrowers(&repository, 4).await;

    let mut loans = Vec::new();
    for borrower in &borrowers[..3] {
        loans.push(service.borrow_book(book.id, borrower.id).await.unwrap());
    }
    assert!(matches!(
        service.borrow_book(book.id, borrowers[3].id).await,
        Err(AppError::Unavailable(_))
    ));
    assert_counters(&repository, book.id, &borrowers).await;

    // Returns and borrows racing on the same row
    let returns: Vec<_> = loans
        .iter()
        .take(2)
        .map(|loan| {
            let service = service.clone();
            let id = loan.id;
            tokio::spawn(async move { service.return_book(id).await.map(|_| ()) })
        })
        .collect();
    let borrow = {
        let service = service.clone();
        let (book_id, borrower_id) = (book.id, borrowers[3].id);
        tokio::spawn(async move { service.borrow_book(book_id, borrower_id).await.map(|_| ()) })
    };
    for handle in returns {
        handle.await.unwrap().unwrap();
    }
    match borrow.await.unwrap() {
        Ok(()) | Err(AppError::Unavailable(_)) | Err(AppError::Conflict(_)) => {}
        Err(other) => panic!("unexpected error: {:?}", other),
    }

    assert_counters(&repository, book.id, &borrowers).await;
}

#[tokio::test]
#[ignore]
async fn test_copy_adjustment_cannot_go_negative() {
    let repository = repository().await;
    let service = circulation(&repository);
    let book = add_book(&repository, "Shrinking", 2).await;
    let borrowers = add_borrowers(&repository, 1).await;
    service.borrow_book(book.id, borrowers[0].id).await.unwrap();

    assert!(matches!(
        service.adjust_copy_count(book.id, -2).await,
        Err(AppError::InvalidState(_))
    ));

    // A compare-and-set against an old version writes nothing
    assert!(matches!(
        repository
            .books
            .update_copies(book.id, book.version, 5, 5)
            .await
            .unwrap(),
        CasOutcome::Stale
    ));

    let adjusted = service.adjust_copy_count(book.id, -1).await.unwrap();
    assert_eq!((adjusted.total_copies, adjusted.available_copies), (1, 0));
    assert_counters(&repository, book.id, &borrowers).await;
}

#[tokio::test]
#[ignore]
async fn test_delete_is_refused_while_on_loan() {
    let pool = pool().await;
    let repository = Repository::new(pool.clone());
    let service = circulation(&repository);
    let book = add_book(&repository, "Out on loan", 1).await;
    let borrowers = add_borrowers(&repository, 1).await;
    let loan = service.borrow_book(book.id, borrowers[0].id).await.unwrap();

    assert_eq!(
        repository.books.soft_delete(book.id, false).await.unwrap(),
        CasOutcome::Stale
    );
    assert_eq!(
        repository.books.soft_delete(book.id, true).await.unwrap(),
        CasOutcome::Applied(1)
    );
    assert!(matches!(
        service.borrow_book(book.id, borrowers[0].id).await,
        Err(AppError::NotFound(_))
    ));

    // Returns still land on a deleted book, capped at the total
    service.return_book(loan.id).await.unwrap();
    let available: i32 = sqlx::query_scalar("SELECT available_copies FROM books WHERE id = $1")
        .bind(book.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(available, 1);
}

#[tokio::test]
#[ignore]
async fn test_search_treats_wildcards_literally() {
    let repository = repository().await;
    let marker = Uuid::new_v4().simple().to_string();
    add_book(&repository, &format!("{} 100% pure", marker), 1).await;
    add_book(&repository, &format!("{} 1000 pure", marker), 1).await;

    let search = |term: String| BookListParams {
        search: Some(term),
        page: 1,
        per_page: 20,
        ..Default::default()
    };

    let (_, total) = repository
        .books
        .list(&search(format!("{} 100%", marker)))
        .await
        .unwrap();
    assert_eq!(total, 1);

    let (_, total) = repository
        .books
        .list(&search(format!("{} 1_0", marker)))
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_delete_racing_a_borrow_never_strands_a_loan() {
    let repository = repository().await;
    let service = circulation(&repository);
    let borrowers = add_borrowers(&repository, 1).await;

    for round in 0..10 {
        let book = add_book(&repository, &format!("Contested {}", round), 1).await;

        let borrow = {
            let service = service.clone();
            let (book_id, borrower_id) = (book.id, borrowers[0].id);
            tokio::spawn(async move { service.borrow_book(book_id, borrower_id).await })
        };
        let delete = {
            let repository = repository.clone();
            let book_id = book.id;
            tokio::spawn(async move { repository.books.soft_delete(book_id, false).await })
        };

        let borrowed = borrow.await.unwrap();
        let deleted = delete.await.unwrap().unwrap();
        match (borrowed, deleted) {
            // Borrow landed first: the delete must have seen its loan
            (Ok(loan), CasOutcome::Stale) => {
                service.return_book(loan.id).await.unwrap();
            }
            // Delete landed first: the borrow must have found no book
            (Err(AppError::NotFound(_)), CasOutcome::Applied(0)) => {}
            (borrowed, deleted) => panic!("inconsistent outcome: {:?} / {:?}", borrowed, deleted),
        }
    }
}
