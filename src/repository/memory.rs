//! In-memory implementation of every store, used by the test suites and for
//! running the API without PostgreSQL.
//!
//! One mutex guards the whole state, so each trait call is atomic on its own.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{
        author::{Author, AuthorInput, AuthorQuery},
        book::{Book, BookListParams, BookSortField, CreateBook, UpdateBook},
        loan::{BorrowCommit, BorrowedBook, LoanScope, LoanStatusFilter},
        membership::{Borrower, MembershipType, MembershipTypeInput},
        user::{NewUser, Role, User},
    },
};

use super::{AuthorStore, BookStore, CasOutcome, CirculationStore, MembershipStore, UserStore};

#[derive(Default)]
struct MemoryState {
    sequences: HashMap<&'static str, i32>,
    books: BTreeMap<i32, Book>,
    authors: BTreeMap<i32, Author>,
    /// (book_id, author_id)
    book_authors: BTreeSet<(i32, i32)>,
    membership_types: BTreeMap<i32, MembershipType>,
    borrowers: BTreeMap<i32, Borrower>,
    loans: BTreeMap<i32, BorrowedBook>,
    users: BTreeMap<i32, User>,
}

impl MemoryState {
    fn next_id(&mut self, table: &'static str) -> i32 {
        let id = self.sequences.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn live_book(&self, id: i32) -> AppResult<&Book> {
        self.books
            .get(&id)
            .filter(|b| !b.is_deleted)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    fn live_book_mut(&mut self, id: i32) -> AppResult<&mut Book> {
        self.books
            .get_mut(&id)
            .filter(|b| !b.is_deleted)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    fn live_author_mut(&mut self, id: i32) -> AppResult<&mut Author> {
        self.authors
            .get_mut(&id)
            .filter(|a| !a.is_deleted)
            .ok_or_else(|| AppError::NotFound(format!("Author with id {} not found", id)))
    }

    fn live_type_mut(&mut self, id: i32) -> AppResult<&mut MembershipType> {
        self.membership_types
            .get_mut(&id)
            .filter(|t| !t.is_deleted)
            .ok_or_else(|| AppError::NotFound(format!("Membership type with id {} not found", id)))
    }

    fn borrower_mut(&mut self, id: i32) -> AppResult<&mut Borrower> {
        self.borrowers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Borrower with id {} not found", id)))
    }

    fn isbn_taken(&self, isbn: &str, exclude_id: Option<i32>) -> bool {
        self.books
            .values()
            .any(|b| b.isbn.as_deref() == Some(isbn) && Some(b.id) != exclude_id)
    }

    fn price_taken(&self, price: Decimal, exclude_id: Option<i32>) -> bool {
        self.membership_types
            .values()
            .any(|t| t.price == price && Some(t.id) != exclude_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

fn matches_search(book: &Book, term: &str) -> bool {
    let contains = |s: Option<&str>| s.map(|s| s.to_lowercase().contains(term)).unwrap_or(false);
    contains(Some(&book.title)) || contains(book.isbn.as_deref()) || contains(book.genre.as_deref())
}

/// Ascending order with NULLs last, the way PostgreSQL sorts
fn cmp_nulls_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl BookStore for MemoryStore {
    async fn get(&self, id: i32) -> AppResult<Book> {
        let state = self.state.lock().await;
        state.live_book(id).cloned()
    }

    async fn list(&self, params: &BookListParams) -> AppResult<(Vec<Book>, i64)> {
        let state = self.state.lock().await;
        let search = params.search.as_ref().map(|s| s.to_lowercase());

        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| !b.is_deleted)
            .filter(|b| params.genre.is_none() || b.genre == params.genre)
            .filter(|b| params.publication_year.is_none() || b.publication_year == params.publication_year)
            .filter(|b| search.as_deref().map(|t| matches_search(b, t)).unwrap_or(true))
            .cloned()
            .collect();

        if let Some(sort) = params.sort {
            books.sort_by(|a, b| {
                let ordering = match sort.field {
                    BookSortField::Title => a.title.cmp(&b.title),
                    BookSortField::PublicationYear => {
                        cmp_nulls_last(a.publication_year.as_ref(), b.publication_year.as_ref())
                    }
                    BookSortField::AvailableCopies => a.available_copies.cmp(&b.available_copies),
                };
                let ordering = if sort.descending { ordering.reverse() } else { ordering };
                ordering.then(a.id.cmp(&b.id))
            });
        }

        let total = books.len() as i64;
        let page = books
            .into_iter()
            .skip(usize::try_from(params.offset()).unwrap_or(usize::MAX))
            .take(params.per_page as usize)
            .collect();

        Ok((page, total))
    }

    async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        if let Some(ref isbn) = book.isbn {
            if state.isbn_taken(isbn, None) {
                return Err(AppError::Conflict("Book with this ISBN already exists".to_string()));
            }
        }

        let now = Utc::now();
        let id = state.next_id("books");
        let created = Book {
            id,
            title: book.title.clone(),
            isbn: book.isbn.clone(),
            publication_year: book.publication_year.clone(),
            genre: book.genre.clone(),
            available_copies: book.initial_available(),
            total_copies: book.total_copies,
            version: 0,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        state.books.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, id: i32, book: &UpdateBook) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        state.live_book(id)?;
        if let Some(ref isbn) = book.isbn {
            if state.isbn_taken(isbn, Some(id)) {
                return Err(AppError::Conflict("Book with this ISBN already exists".to_string()));
            }
        }

        let stored = state.live_book_mut(id)?;
        stored.title = book.title.clone();
        stored.isbn = book.isbn.clone();
        stored.publication_year = book.publication_year.clone();
        stored.genre = book.genre.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn soft_delete(&self, id: i32, force: bool) -> AppResult<CasOutcome<i64>> {
        let mut state = self.state.lock().await;
        state.live_book_mut(id)?;
        let outstanding = state
            .loans
            .values()
            .filter(|l| l.book_id == id && l.is_outstanding())
            .count() as i64;
        if outstanding > 0 && !force {
            return Ok(CasOutcome::Stale);
        }

        let stored = state.live_book_mut(id)?;
        stored.is_deleted = true;
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(CasOutcome::Applied(outstanding))
    }

    async fn isbn_exists(&self, isbn: &str, exclude_id: Option<i32>) -> AppResult<bool> {
        Ok(self.state.lock().await.isbn_taken(isbn, exclude_id))
    }

    async fn update_copies(
        &self,
        id: i32,
        expected_version: i64,
        total_copies: i32,
        available_copies: i32,
    ) -> AppResult<CasOutcome<Book>> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.books.get_mut(&id).filter(|b| !b.is_deleted) else {
            return Ok(CasOutcome::Stale);
        };
        if stored.version != expected_version {
            return Ok(CasOutcome::Stale);
        }
        stored.total_copies = total_copies;
        stored.available_copies = available_copies;
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(CasOutcome::Applied(stored.clone()))
    }
}

#[async_trait]
impl AuthorStore for MemoryStore {
    async fn get(&self, id: i32) -> AppResult<Author> {
        let mut state = self.state.lock().await;
        state.live_author_mut(id).map(|a| a.clone())
    }

    async fn list(&self, query: &AuthorQuery) -> AppResult<Vec<Author>> {
        let state = self.state.lock().await;
        let name = query.name.as_ref().map(|n| n.to_lowercase());
        let mut authors: Vec<Author> = state
            .authors
            .values()
            .filter(|a| !a.is_deleted)
            .filter(|a| {
                name.as_deref()
                    .map(|n| a.full_name.to_lowercase().contains(n))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        authors.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        Ok(authors)
    }

    async fn create(&self, author: &AuthorInput) -> AppResult<Author> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let id = state.next_id("authors");
        let created = Author {
            id,
            full_name: author.full_name.clone(),
            dob: author.dob,
            nationality: author.nationality.clone(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        state.authors.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, id: i32, author: &AuthorInput) -> AppResult<Author> {
        let mut state = self.state.lock().await;
        let stored = state.live_author_mut(id)?;
        stored.full_name = author.full_name.clone();
        stored.dob = author.dob;
        stored.nationality = author.nationality.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn soft_delete(&self, id: i32) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let stored = state.live_author_mut(id)?;
        stored.is_deleted = true;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn link_book(&self, author_id: i32, book_id: i32) -> AppResult<()> {
        self.state.lock().await.book_authors.insert((book_id, author_id));
        Ok(())
    }

    async fn unlink_book(&self, author_id: i32, book_id: i32) -> AppResult<()> {
        if !self.state.lock().await.book_authors.remove(&(book_id, author_id)) {
            return Err(AppError::NotFound(format!(
                "Author {} is not linked to book {}",
                author_id, book_id
            )));
        }
        Ok(())
    }

    async fn books_of(&self, author_id: i32) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state
            .book_authors
            .iter()
            .filter(|(_, a)| *a == author_id)
            .filter_map(|(b, _)| state.books.get(b))
            .filter(|b| !b.is_deleted)
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn authors_of(&self, book_id: i32) -> AppResult<Vec<Author>> {
        let state = self.state.lock().await;
        let mut authors: Vec<Author> = state
            .book_authors
            .range((book_id, i32::MIN)..=(book_id, i32::MAX))
            .filter_map(|(_, a)| state.authors.get(a))
            .filter(|a| !a.is_deleted)
            .cloned()
            .collect();
        authors.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        Ok(authors)
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn list_types(&self) -> AppResult<Vec<MembershipType>> {
        let state = self.state.lock().await;
        let mut types: Vec<MembershipType> = state
            .membership_types
            .values()
            .filter(|t| !t.is_deleted)
            .cloned()
            .collect();
        types.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id)));
        Ok(types)
    }

    async fn get_type(&self, id: i32) -> AppResult<MembershipType> {
        let mut state = self.state.lock().await;
        state.live_type_mut(id).map(|t| t.clone())
    }

    async fn create_type(&self, input: &MembershipTypeInput) -> AppResult<MembershipType> {
        let mut state = self.state.lock().await;
        if state.price_taken(input.price, None) {
            return Err(AppError::Conflict(
                "A membership type with this price already exists".to_string(),
            ));
        }
        let now = Utc::now();
        let id = state.next_id("membership_types");
        let created = MembershipType {
            id,
            title: input.title.clone(),
            price: input.price,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        state.membership_types.insert(id, created.clone());
        Ok(created)
    }

    async fn update_type(&self, id: i32, input: &MembershipTypeInput) -> AppResult<MembershipType> {
        let mut state = self.state.lock().await;
        state.live_type_mut(id)?;
        if state.price_taken(input.price, Some(id)) {
            return Err(AppError::Conflict(
                "A membership type with this price already exists".to_string(),
            ));
        }
        let stored = state.live_type_mut(id)?;
        stored.title = input.title.clone();
        stored.price = input.price;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn soft_delete_type(&self, id: i32) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let stored = state.live_type_mut(id)?;
        stored.is_deleted = true;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn price_exists(&self, price: Decimal, exclude_id: Option<i32>) -> AppResult<bool> {
        Ok(self.state.lock().await.price_taken(price, exclude_id))
    }

    async fn get_borrower(&self, id: i32) -> AppResult<Borrower> {
        let mut state = self.state.lock().await;
        state.borrower_mut(id).map(|b| b.clone())
    }

    async fn list_borrowers(&self) -> AppResult<Vec<Borrower>> {
        Ok(self.state.lock().await.borrowers.values().cloned().collect())
    }

    async fn create_borrower(&self, user_id: i32, membership_type_id: i32) -> AppResult<Borrower> {
        let mut state = self.state.lock().await;
        if state.borrowers.values().any(|b| b.user_id == user_id) {
            return Err(AppError::Conflict("User already has a borrower record".to_string()));
        }
        let now = Utc::now();
        let id = state.next_id("borrowers");
        let created = Borrower {
            id,
            user_id,
            membership_type_id,
            borrowed_books_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.borrowers.insert(id, created.clone());
        Ok(created)
    }

    async fn set_membership_type(&self, id: i32, membership_type_id: i32) -> AppResult<Borrower> {
        let mut state = self.state.lock().await;
        let stored = state.borrower_mut(id)?;
        stored.membership_type_id = membership_type_id;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn deactivate_borrower(&self, id: i32) -> AppResult<CasOutcome<Borrower>> {
        let mut state = self.state.lock().await;
        let stored = state.borrower_mut(id)?;
        if stored.borrowed_books_count > 0 {
            return Ok(CasOutcome::Stale);
        }
        stored.is_active = false;
        stored.updated_at = Utc::now();
        Ok(CasOutcome::Applied(stored.clone()))
    }

    async fn reactivate_borrower(&self, id: i32) -> AppResult<Borrower> {
        let mut state = self.state.lock().await;
        let stored = state.borrower_mut(id)?;
        stored.is_active = true;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }
}

#[async_trait]
impl CirculationStore for MemoryStore {
    async fn get_loan(&self, id: i32) -> AppResult<BorrowedBook> {
        let state = self.state.lock().await;
        state
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Borrowed book with id {} not found", id)))
    }

    async fn list_loans(&self, scope: LoanScope, status: LoanStatusFilter) -> AppResult<Vec<BorrowedBook>> {
        let state = self.state.lock().await;
        let mut loans: Vec<BorrowedBook> = state
            .loans
            .values()
            .filter(|l| match scope {
                LoanScope::Book(id) => l.book_id == id,
                LoanScope::Borrower(id) => l.borrower_id == id,
            })
            .filter(|l| status.matches(l))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.borrow_date.cmp(&a.borrow_date).then(b.id.cmp(&a.id)));
        Ok(loans)
    }

    async fn count_outstanding_for_book(&self, book_id: i32) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .loans
            .values()
            .filter(|l| l.book_id == book_id && l.is_outstanding())
            .count() as i64)
    }

    async fn commit_borrow(&self, commit: &BorrowCommit) -> AppResult<CasOutcome<BorrowedBook>> {
        let mut state = self.state.lock().await;

        // Check every condition before touching anything
        let book_ok = state.books.get(&commit.book_id).is_some_and(|b| {
            !b.is_deleted && b.version == commit.book_version && b.available_copies > 0
        });
        let borrower_ok = state
            .borrowers
            .get(&commit.borrower_id)
            .is_some_and(|b| b.is_active);
        if !book_ok || !borrower_ok {
            return Ok(CasOutcome::Stale);
        }

        if let Some(book) = state.books.get_mut(&commit.book_id) {
            book.available_copies -= 1;
            book.version += 1;
            book.updated_at = commit.borrow_date;
        }
        if let Some(borrower) = state.borrowers.get_mut(&commit.borrower_id) {
            borrower.borrowed_books_count += 1;
            borrower.updated_at = commit.borrow_date;
        }

        let id = state.next_id("borrowed_books");
        let loan = BorrowedBook {
            id,
            book_id: commit.book_id,
            borrower_id: commit.borrower_id,
            borrow_date: commit.borrow_date,
            return_date: None,
        };
        state.loans.insert(id, loan.clone());

        Ok(CasOutcome::Applied(loan))
    }

    async fn commit_return(
        &self,
        loan_id: i32,
        returned_at: DateTime<Utc>,
    ) -> AppResult<CasOutcome<BorrowedBook>> {
        let mut state = self.state.lock().await;

        let loan = match state.loans.get_mut(&loan_id) {
            Some(loan) if loan.is_outstanding() => {
                loan.return_date = Some(returned_at);
                loan.clone()
            }
            Some(_) => return Ok(CasOutcome::Stale),
            None => {
                return Err(AppError::NotFound(format!(
                    "Borrowed book with id {} not found",
                    loan_id
                )))
            }
        };

        if let Some(book) = state.books.get_mut(&loan.book_id) {
            book.available_copies = (book.available_copies + 1).min(book.total_copies);
            book.version += 1;
            book.updated_at = returned_at;
        }
        if let Some(borrower) = state.borrowers.get_mut(&loan.borrower_id) {
            borrower.borrowed_books_count = (borrower.borrowed_books_count - 1).max(0);
            borrower.updated_at = returned_at;
        }

        Ok(CasOutcome::Applied(loan))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_by_id(&self, id: i32) -> AppResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create(&self, user: &NewUser) -> AppResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }
        let now = Utc::now();
        let id = state.next_id("users");
        let created = User {
            id,
            email: user.email.clone(),
            name: user.name.clone(),
            phone_number: user.phone_number.clone(),
            role: user.role,
            password: user.password_hash.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(id, created.clone());
        Ok(created)
    }

    async fn set_password(&self, id: i32, password_hash: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;
        user.password = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_role(&self, id: i32, role: Role) -> AppResult<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}
