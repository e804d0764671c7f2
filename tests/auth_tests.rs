//! Credentials, permissions, impersonation and API key management over HTTP

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use chrono::{Duration, Utc};
use common::Harness;
use serde_json::{Value, json};
use uuid::Uuid;

fn impersonate(id: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-impersonate"),
        HeaderValue::from_str(id).unwrap(),
    )
}

#[tokio::test]
async fn test_protected_route_without_credential() {
    let harness = Harness::new().await;
    let response = harness.server.get("/documents").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "An authorization credential is required");
}

#[tokio::test]
async fn test_expired_and_malformed_credentials_are_distinct() {
    let harness = Harness::new().await;
    let expired = harness
        .token_expiring(&["document"], Some(Utc::now() - Duration::minutes(1)))
        .await;

    let response = harness
        .server
        .get("/documents")
        .authorization_bearer(&expired)
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let expired_body: Value = response.json();

    let response = harness
        .server
        .get("/documents")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Token abc"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let malformed_body: Value = response.json();

    assert_eq!(expired_body["message"], "The authorization credential has expired");
    assert_eq!(malformed_body["message"], "The authorization credential is malformed");
}

#[tokio::test]
async fn test_unknown_credential() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .get("/documents")
        .authorization_bearer("0000")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_permission_is_forbidden() {
    let harness = Harness::new().await;
    let token = harness.token(&["document.view"]).await;

    harness
        .server
        .get("/documents")
        .authorization_bearer(&token)
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&token)
        .json(&json!({ "title": "Nope" }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_authorization_runs_before_validation() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .post("/documents")
        .json(&json!({ "title": "" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_impersonation_requires_the_capability() {
    let harness = Harness::new().await;
    let target = harness.user("Grace", "grace@example.com").await;
    let token = harness.token(&["user.view"]).await;

    let (name, value) = impersonate(&target.to_string());
    let response = harness
        .server
        .get("/users/me")
        .authorization_bearer(&token)
        .add_header(name, value)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_impersonation_of_missing_subject() {
    let harness = Harness::new().await;
    let (name, value) = impersonate(&Uuid::new_v4().to_string());
    let response = harness
        .server
        .get("/users/me")
        .authorization_bearer(&harness.admin_token)
        .add_header(name, value)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_impersonation_acts_as_the_subject() {
    let harness = Harness::new().await;
    let target = harness.user("Grace", "grace@example.com").await;

    let (name, value) = impersonate(&target.to_string());
    let response = harness
        .server
        .get("/users/me")
        .authorization_bearer(&harness.admin_token)
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["content"]["email"], "grace@example.com");
    assert!(body["content"].get("password").is_none());
}

#[tokio::test]
async fn test_create_user_hides_password_and_rejects_duplicates() {
    let harness = Harness::new().await;
    let payload = json!({
        "name": "Linus",
        "email": "Linus@Example.com",
        "password": "a sufficiently long passphrase",
    });

    let response = harness
        .server
        .post("/users")
        .authorization_bearer(&harness.admin_token)
        .json(&payload)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["content"]["email"], "linus@example.com");
    assert!(body["content"].get("password").is_none());

    let response = harness
        .server
        .post("/users")
        .authorization_bearer(&harness.admin_token)
        .json(&payload)
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_weak_password_is_rejected() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .post("/users")
        .authorization_bearer(&harness.admin_token)
        .json(&json!({ "name": "Eve", "email": "eve@example.com", "password": "short" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["password"].is_string());
}

#[tokio::test]
async fn test_issued_key_authenticates_once_returned() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .post("/api-keys")
        .authorization_bearer(&harness.admin_token)
        .json(&json!({ "name": "reader", "permissions": ["document.view"] }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let token = body["content"]["token"].as_str().unwrap().to_string();
    assert!(body["content"].get("token_hash").is_none());

    harness
        .server
        .get("/documents")
        .authorization_bearer(&token)
        .await
        .assert_status_ok();
    harness
        .server
        .delete(&format!("/documents/{}", Uuid::new_v4()))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_key_cannot_grant_more_than_its_issuer() {
    let harness = Harness::new().await;
    let token = harness.token(&["api_key.create", "document.view"]).await;
    let response = harness
        .server
        .post("/api-keys")
        .authorization_bearer(&token)
        .json(&json!({ "name": "escalate", "permissions": ["document.delete"] }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_permission_name_is_rejected() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .post("/api-keys")
        .authorization_bearer(&harness.admin_token)
        .json(&json!({ "name": "odd", "permissions": ["document.fly"] }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["permissions"].is_string());
}

#[tokio::test]
async fn test_revoked_key_stops_working() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .post("/api-keys")
        .authorization_bearer(&harness.admin_token)
        .json(&json!({ "name": "temp", "permissions": ["document"] }))
        .await;
    let created: Value = response.json();
    let id = created["content"]["id"].as_str().unwrap();
    let token = created["content"]["token"].as_str().unwrap();

    harness
        .server
        .delete(&format!("/api-keys/{}", id))
        .authorization_bearer(&harness.admin_token)
        .await
        .assert_status_ok();

    harness
        .server
        .get("/documents")
        .authorization_bearer(token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    harness
        .server
        .delete(&format!("/api-keys/{}", id))
        .authorization_bearer(&harness.admin_token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_ascii_credential_is_malformed() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .get("/documents")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap(),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["message"], "The authorization credential is malformed");
}

#[tokio::test]
async fn test_non_ascii_impersonation_is_not_ignored() {
    let harness = Harness::new().await;
    let unreadable = || {
        (
            HeaderName::from_static("x-impersonate"),
            HeaderValue::from_bytes(b"\xffsomeone").unwrap(),
        )
    };

    let token = harness.token(&["user.view"]).await;
    let (name, value) = unreadable();
    harness
        .server
        .get("/users/me")
        .authorization_bearer(&token)
        .add_header(name, value)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let (name, value) = unreadable();
    harness
        .server
        .get("/users/me")
        .authorization_bearer(&harness.admin_token)
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
