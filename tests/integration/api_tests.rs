//! API integration tests
//!
//! Drive the full router in-process against the in-memory stores.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use libris_server::{
    api,
    config::AppConfig,
    error::AppResult,
    repository::Repository,
    services::{email::Notifier, tokens::MemoryTokenStore, Services},
    AppState,
};

const ADMIN_EMAIL: &str = "admin@libris.local";
const ADMIN_PASSWORD: &str = "admin-password";

/// Keeps every outgoing message instead of sending it
#[derive(Default)]
struct Outbox(Mutex<Vec<(String, String)>>);

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> AppResult<()> {
        self.0.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

struct TestApp {
    router: Router,
    outbox: Arc<Outbox>,
}

impl TestApp {
    async fn new() -> Self {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "integration-secret".to_string();
        config.auth.bootstrap_admin_email = Some(ADMIN_EMAIL.to_string());
        config.auth.bootstrap_admin_password = Some(ADMIN_PASSWORD.to_string());

        let outbox = Arc::new(Outbox::default());
        let services = Services::new(
            Repository::in_memory(),
            Arc::new(MemoryTokenStore::default()),
            outbox.clone(),
            &config,
        );
        services.auth.ensure_bootstrap_admin().await.unwrap();

        let state = AppState {
            config: Arc::new(config),
            services: Arc::new(services),
            db: None,
        };

        Self {
            router: api::create_router(state),
            outbox,
        }
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    async fn login(&self, email: &str, password: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/v1/token",
                None,
                json!({ "email": email, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body
    }

    async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await["access"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Sign up a reader and return (user id, access token)
    async fn reader(&self, email: &str) -> (i64, String) {
        let (status, user) = self
            .post(
                "/api/v1/signup",
                None,
                json!({
                    "email": email,
                    "name": "Reader",
                    "phone_number": "+33 6 12 34 56 78",
                    "password": "reader-password"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {}", user);
        let token = self.login(email, "reader-password").await["access"]
            .as_str()
            .unwrap()
            .to_string();
        (user["id"].as_i64().unwrap(), token)
    }

    async fn create_book(&self, token: &str, title: &str, genre: &str, copies: i32) -> i64 {
        let (status, book) = self
            .post(
                "/api/v1/books",
                Some(token),
                json!({
                    "title": title,
                    "genre": genre,
                    "publication_year": "1999",
                    "total_copies": copies
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create book failed: {}", book);
        book["id"].as_i64().unwrap()
    }

    /// Membership type plus a borrower record for `user_id`
    async fn enroll(&self, admin: &str, user_token: &str, user_id: i64) -> i64 {
        let (_, types) = self.get("/api/v1/membership-types", admin).await;
        let type_id = match types.as_array().and_then(|t| t.first()) {
            Some(t) => t["id"].as_i64().unwrap(),
            None => {
                let (status, created) = self
                    .post(
                        "/api/v1/membership-types",
                        Some(admin),
                        json!({ "title": "Standard", "price": "12.50" }),
                    )
                    .await;
                assert_eq!(status, StatusCode::CREATED, "{}", created);
                created["id"].as_i64().unwrap()
            }
        };

        let (status, borrower) = self
            .post(
                "/api/v1/borrowers",
                Some(user_token),
                json!({ "user_id": user_id, "membership_type_id": type_id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "enroll failed: {}", borrower);
        borrower["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.request(Method::GET, "/api/v1/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/return"].is_object());
}

#[tokio::test]
async fn test_unauthorized_access() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/api/v1/books", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication");

    let (status, _) = app.get("/api/v1/books", "not-a-jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signup_login_refresh_logout() {
    let app = TestApp::new().await;
    let (user_id, _) = app.reader("reader@example.org").await;

    let (status, body) = app
        .post(
            "/api/v1/signup",
            None,
            json!({
                "email": "reader@example.org",
                "name": "Again",
                "phone_number": "+4412345678",
                "password": "whatever-password"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");

    let (status, _) = app
        .post(
            "/api/v1/token",
            None,
            json!({ "email": "reader@example.org", "password": "wrong-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let pair = app.login("reader@example.org", "reader-password").await;
    let access = pair["access"].as_str().unwrap();
    let refresh = pair["refresh"].as_str().unwrap();

    let (status, me) = app.get("/api/v1/me", access).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"].as_i64().unwrap(), user_id);
    assert_eq!(me["role"], "user");
    assert!(me.get("password").is_none());

    let (status, renewed) = app
        .post("/api/v1/token/refresh", None, json!({ "refresh": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(renewed["access"].is_string());

    let (status, _) = app
        .post("/api/v1/logout", Some(access), json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get("/api/v1/me", access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post("/api/v1/token/refresh", None, json!({ "refresh": refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = TestApp::new().await;
    let (user_id, _) = app.reader("forgetful@example.org").await;

    let (status, _) = app.post("/api/v1/password-reset", None, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/v1/password-reset",
            None,
            json!({ "email": "nobody@example.org" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User not found");

    let (status, body) = app
        .post(
            "/api/v1/password-reset",
            None,
            json!({ "email": "forgetful@example.org" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Password reset link sent");

    let (to, message) = app.outbox.0.lock().unwrap()[0].clone();
    assert_eq!(to, "forgetful@example.org");
    let prefix = format!("http://localhost:8080/api/v1/password-reset/{}/", user_id);
    let path = message
        .lines()
        .find(|l| l.starts_with(&prefix))
        .map(|l| l.trim_start_matches("http://localhost:8080").to_string())
        .unwrap();

    let (status, _) = app.post(&path, None, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(&path, None, json!({ "new_password": "a-brand-new-one" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Password reset successful");

    let (status, body) = app
        .post(&path, None, json!({ "new_password": "and-another-one" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid or expired token");

    app.login("forgetful@example.org", "a-brand-new-one").await;
}

#[tokio::test]
async fn test_role_checks_on_catalog_writes() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (user_id, reader) = app.reader("clerk@example.org").await;

    let (status, _) = app
        .post(
            "/api/v1/books",
            Some(&reader),
            json!({ "title": "Nope", "total_copies": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, promoted) = app
        .request(
            Method::PUT,
            &format!("/api/v1/users/{}/role", user_id),
            Some(&admin),
            Some(json!({ "role": "staff" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(promoted["role"], "staff");

    // The role travels in the token, so log in again
    let staff = app.login("clerk@example.org", "reader-password").await["access"]
        .as_str()
        .unwrap()
        .to_string();
    let book_id = app.create_book(&staff, "Permitted", "essay", 1).await;

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/books/{}", book_id),
            Some(&staff),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_book_listing_filters_and_ordering() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    app.create_book(&admin, "Hyperion", "sf", 2).await;
    app.create_book(&admin, "Anathem", "sf", 1).await;
    let deleted = app.create_book(&admin, "Zeroes", "sf", 1).await;
    app.create_book(&admin, "Middlemarch", "classic", 3).await;

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/books/{}", deleted),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, page) = app
        .get("/api/v1/books?genre=sf&ordering=-title&per_page=1", &admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["title"], "Hyperion");

    let (_, page) = app.get("/api/v1/books?search=MIDDLE", &admin).await;
    assert_eq!(page["total"], 1);

    // Wildcard characters are matched literally
    let (_, page) = app.get("/api/v1/books?search=_", &admin).await;
    assert_eq!(page["total"], 0);

    let (status, body) = app.get("/api/v1/books?ordering=isbn", &admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation");

    let (status, _) = app.get(&format!("/api/v1/books/{}", deleted), &admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, page) = app
        .get("/api/v1/books?page=9223372036854775807", &admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert!(page["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_borrow_and_return_flow() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (user_id, reader) = app.reader("borrower@example.org").await;
    let borrower_id = app.enroll(&admin, &reader, user_id).await;
    let book_id = app.create_book(&admin, "Last Copy", "novel", 1).await;

    let (status, loan) = app
        .post(
            "/api/v1/borrow",
            Some(&reader),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", loan);
    assert!(loan["return_date"].is_null());
    let loan_id = loan["id"].as_i64().unwrap();

    let (status, body) = app
        .post(
            "/api/v1/borrow",
            Some(&reader),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Unavailable");

    let (_, availability) = app
        .get(&format!("/api/v1/books/{}/availability", book_id), &reader)
        .await;
    assert_eq!(availability["available_copies"], 0);
    assert_eq!(availability["outstanding_loans"], 1);

    let (_, borrower) = app
        .get(&format!("/api/v1/borrowers/{}", borrower_id), &reader)
        .await;
    assert_eq!(borrower["borrowed_books_count"], 1);

    let (status, body) = app
        .post("/api/v1/return", Some(&reader), json!({ "borrowed_book_id": loan_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "returned");
    assert!(body["loan"]["return_date"].is_string());

    let (status, body) = app
        .post("/api/v1/return", Some(&reader), json!({ "borrowed_book_id": loan_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_returned");

    let (_, availability) = app
        .get(&format!("/api/v1/books/{}/availability", book_id), &reader)
        .await;
    assert_eq!(availability["available_copies"], 1);
    assert_eq!(availability["outstanding_loans"], 0);

    let (_, loans) = app
        .get(
            &format!("/api/v1/borrowers/{}/loans?status=returned", borrower_id),
            &reader,
        )
        .await;
    assert_eq!(loans.as_array().unwrap().len(), 1);

    let (status, _) = app
        .post("/api/v1/return", Some(&reader), json!({ "borrowed_book_id": 9999 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cannot_borrow_through_someone_elses_record() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (owner_id, owner) = app.reader("owner@example.org").await;
    let (_, intruder) = app.reader("intruder@example.org").await;
    let borrower_id = app.enroll(&admin, &owner, owner_id).await;
    let book_id = app.create_book(&admin, "Guarded", "novel", 2).await;

    let (status, _) = app
        .post(
            "/api/v1/borrow",
            Some(&intruder),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .get(&format!("/api/v1/borrowers/{}/loans", borrower_id), &intruder)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Staff may act for anyone
    let (status, _) = app
        .post(
            "/api/v1/borrow",
            Some(&admin),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_copy_adjustments() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (user_id, reader) = app.reader("counter@example.org").await;
    let borrower_id = app.enroll(&admin, &reader, user_id).await;
    let book_id = app.create_book(&admin, "Counted", "novel", 2).await;
    let copies = format!("/api/v1/books/{}/copies", book_id);

    app.post(
        "/api/v1/borrow",
        Some(&reader),
        json!({ "book_id": book_id, "borrower_id": borrower_id }),
    )
    .await;

    let (status, _) = app.post(&copies, Some(&reader), json!({ "delta": 1 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.post(&copies, Some(&admin), json!({ "delta": -2 })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "InvalidState");

    let (status, book) = app.post(&copies, Some(&admin), json!({ "delta": 3 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(book["total_copies"], 5);
    assert_eq!(book["available_copies"], 4);

    let (status, book) = app.post(&copies, Some(&admin), json!({ "delta": -4 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(book["total_copies"], 1);
    assert_eq!(book["available_copies"], 0);
}

#[tokio::test]
async fn test_delete_book_with_outstanding_loans() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (user_id, reader) = app.reader("late@example.org").await;
    let borrower_id = app.enroll(&admin, &reader, user_id).await;
    let book_id = app.create_book(&admin, "Withdrawn", "novel", 1).await;

    let (_, loan) = app
        .post(
            "/api/v1/borrow",
            Some(&reader),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;
    let book_uri = format!("/api/v1/books/{}", book_id);

    let (status, body) = app
        .request(Method::DELETE, &book_uri, Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "BusinessRule");

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("{}?force=true", book_uri),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .post(
            "/api/v1/borrow",
            Some(&reader),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Returns still go through for withdrawn books
    let (status, body) = app
        .post(
            "/api/v1/return",
            Some(&reader),
            json!({ "borrowed_book_id": loan["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "returned");

    let (_, borrower) = app
        .get(&format!("/api/v1/borrowers/{}", borrower_id), &reader)
        .await;
    assert_eq!(borrower["borrowed_books_count"], 0);
}

#[tokio::test]
async fn test_cancel_membership_with_outstanding_loans() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (user_id, reader) = app.reader("member@example.org").await;
    let borrower_id = app.enroll(&admin, &reader, user_id).await;
    let book_id = app.create_book(&admin, "Kept", "novel", 1).await;

    let (_, loan) = app
        .post(
            "/api/v1/borrow",
            Some(&reader),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;

    let cancel = format!("/api/v1/borrowers/{}/cancel", borrower_id);
    let (status, _) = app.post(&cancel, Some(&reader), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    app.post(
        "/api/v1/return",
        Some(&reader),
        json!({ "borrowed_book_id": loan["id"] }),
    )
    .await;

    let (status, borrower) = app.post(&cancel, Some(&reader), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(borrower["is_active"], false);

    let (status, _) = app
        .post(
            "/api/v1/borrow",
            Some(&reader),
            json!({ "book_id": book_id, "borrower_id": borrower_id }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_authors_and_credits() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let book_id = app.create_book(&admin, "Ficciones", "short stories", 1).await;

    let (status, author) = app
        .post(
            "/api/v1/authors",
            Some(&admin),
            json!({ "full_name": "Jorge Luis Borges", "dob": "1899-08-24", "nationality": "Argentine" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let author_id = author["id"].as_i64().unwrap();

    let link = format!("/api/v1/authors/{}/books/{}", author_id, book_id);
    let (status, _) = app.request(Method::PUT, &link, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, authors) = app
        .get(&format!("/api/v1/books/{}/authors", book_id), &admin)
        .await;
    assert_eq!(authors[0]["full_name"], "Jorge Luis Borges");

    let (_, books) = app
        .get(&format!("/api/v1/authors/{}/books", author_id), &admin)
        .await;
    assert_eq!(books[0]["title"], "Ficciones");

    let (status, _) = app.request(Method::DELETE, &link, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.request(Method::DELETE, &link, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
