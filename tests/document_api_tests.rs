//! Document CRUD, filter composition, pagination and uploads over HTTP

mod common;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use common::Harness;
use gatehouse::config::ServerConfig;
use serde_json::{Value, json};
use uuid::Uuid;

async fn list(harness: &Harness, query: &str) -> Vec<String> {
    let response = harness
        .server
        .get(&format!("/documents?{}", query))
        .authorization_bearer(&harness.admin_token)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    body["content"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["title"].as_str().unwrap().to_string())
        .collect()
}

/// Staged uploads are removed in the background once the response is built
async fn drained(dir: &std::path::Path) -> bool {
    for _ in 0..50 {
        if std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0) == 0 {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

async fn staged_harness() -> (Harness, tempfile::TempDir) {
    let staging = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.upload.temp_dir = Some(staging.path().to_path_buf());
    (Harness::with_config(config).await, staging)
}

async fn seed(harness: &Harness) {
    harness.document("alpha", "draft", &["rust", "web"]).await;
    harness.document("bravo", "published", &["rust"]).await;
    harness.document("charlie", "published", &["web"]).await;
    harness.document("delta", "archived", &[]).await;
}

#[tokio::test]
async fn test_create_get_update_delete() {
    let harness = Harness::new().await;
    let created = harness.document("Roadmap", "draft", &["plan"]).await;
    let id = created["id"].as_str().unwrap();
    assert_eq!(created["owner_id"], harness.admin_id.to_string());
    assert_eq!(created["tags"][0]["name"], "plan");

    let response = harness
        .server
        .get(&format!("/documents/{}", id))
        .authorization_bearer(&harness.admin_token)
        .await;
    response.assert_status_ok();

    let response = harness
        .server
        .put(&format!("/documents/{}", id))
        .authorization_bearer(&harness.admin_token)
        .json(&json!({ "status": "published" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["content"]["status"], "published");
    assert_eq!(body["content"]["title"], "Roadmap");

    harness
        .server
        .delete(&format!("/documents/{}", id))
        .authorization_bearer(&harness.admin_token)
        .await
        .assert_status_ok();

    harness
        .server
        .get(&format!("/documents/{}", id))
        .authorization_bearer(&harness.admin_token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_document_is_not_found() {
    let harness = Harness::new().await;
    let id = Uuid::new_v4();

    let response = harness
        .server
        .put(&format!("/documents/{}", id))
        .authorization_bearer(&harness.admin_token)
        .json(&json!({ "title": "Ghost" }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["content"]["id"], id.to_string());

    harness
        .server
        .delete(&format!("/documents/{}", id))
        .authorization_bearer(&harness.admin_token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_path_id_names_the_field() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .get("/documents/not-a-uuid")
        .authorization_bearer(&harness.admin_token)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["id"].is_string());
}

#[tokio::test]
async fn test_invalid_status_is_rejected() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .json(&json!({ "title": "Bad", "status": "deleted" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["status"].as_str().unwrap().contains("draft"));
}

#[tokio::test]
async fn test_tag_union_and_intersection() {
    let harness = Harness::new().await;
    seed(&harness).await;

    assert_eq!(
        list(&harness, "tag=rust&tag=web&order=title").await,
        ["alpha", "bravo", "charlie"]
    );
    assert_eq!(
        list(&harness, "tag=rust&tag=web&tag_mode=UNION&order=title").await,
        ["alpha", "bravo", "charlie"]
    );
    assert_eq!(
        list(&harness, "tag=rust&tag=web&tag_mode=INTERSECTION").await,
        ["alpha"]
    );
    assert_eq!(
        list(&harness, "tag[]=rust&tag[]=rust&tag_mode=INTERSECTION&order=title").await,
        ["alpha", "bravo"]
    );
}

#[tokio::test]
async fn test_value_and_exclusion_filters() {
    let harness = Harness::new().await;
    seed(&harness).await;

    assert_eq!(
        list(&harness, "status=published&order=title").await,
        ["bravo", "charlie"]
    );
    assert_eq!(
        list(&harness, "exclude_status=published&exclude_status=archived").await,
        ["alpha"]
    );
    assert_eq!(list(&harness, "search=HARL").await, ["charlie"]);
    assert_eq!(
        list(&harness, &format!("owner_id={}", Uuid::new_v4())).await,
        Vec::<String>::new()
    );
}

#[tokio::test]
async fn test_pagination_and_ordering() {
    let harness = Harness::new().await;
    seed(&harness).await;

    assert_eq!(
        list(&harness, "order=-title&limit=2").await,
        ["delta", "charlie"]
    );
    assert_eq!(
        list(&harness, "order=title&skip=1&limit=2").await,
        ["bravo", "charlie"]
    );
    assert_eq!(
        list(&harness, "order=-status&order=title").await,
        ["bravo", "charlie", "alpha", "delta"]
    );
}

#[tokio::test]
async fn test_pagination_bounds_are_validated() {
    let harness = Harness::new().await;
    let response = harness
        .server
        .get("/documents?limit=1000&order=secret")
        .authorization_bearer(&harness.admin_token)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["limit"].is_string());
    assert!(body["content"]["order"].is_string());
}

#[tokio::test]
async fn test_count_applies_filters_but_not_pagination() {
    let harness = Harness::new().await;
    seed(&harness).await;

    let response = harness
        .server
        .get("/documents/count?tag=rust")
        .authorization_bearer(&harness.admin_token)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["content"]["count"], 2);

    let response = harness
        .server
        .get("/documents/count")
        .authorization_bearer(&harness.admin_token)
        .await;
    let body: Value = response.json();
    assert_eq!(body["content"]["count"], 4);
}

#[tokio::test]
async fn test_attachment_upload() {
    let harness = Harness::new().await;
    let form = MultipartForm::new()
        .add_text("title", "With attachment")
        .add_text("tag", "files")
        .add_part(
            "attachment",
            Part::bytes(b"quarterly numbers".as_slice())
                .file_name("../report.txt")
                .mime_type("text/plain"),
        );

    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let attachment = &body["content"]["attachment"];
    assert_eq!(attachment["file_name"], "report.txt");
    assert_eq!(attachment["size"], 17);

    let stored = harness
        .attachments
        .path()
        .join(attachment["stored_as"].as_str().unwrap());
    assert_eq!(std::fs::read(stored).unwrap(), b"quarterly numbers");
}

#[tokio::test]
async fn test_undeclared_file_field_is_rejected() {
    let harness = Harness::new().await;
    let form = MultipartForm::new()
        .add_text("title", "Sneaky")
        .add_part("payload", Part::bytes(b"x".as_slice()).file_name("x.bin"));

    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["payload"].is_string());
}

#[tokio::test]
async fn test_too_many_files_are_rejected() {
    let harness = Harness::new().await;
    let form = MultipartForm::new()
        .add_text("title", "Two files")
        .add_part("attachment", Part::bytes(b"a".as_slice()).file_name("a.txt"))
        .add_part("attachment", Part::bytes(b"b".as_slice()).file_name("b.txt"));

    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["attachment"].is_string());
}

#[tokio::test]
async fn test_oversized_file_is_rejected() {
    let mut config = ServerConfig::default();
    config.upload.max_file_size = 8;
    let harness = Harness::with_config(config).await;
    let form = MultipartForm::new()
        .add_text("title", "Too big")
        .add_part(
            "attachment",
            Part::bytes(b"more than eight bytes".as_slice()).file_name("big.txt"),
        );

    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        std::fs::read_dir(harness.attachments.path()).map(|d| d.count()).unwrap_or(0),
        0
    );
}

#[tokio::test]
async fn test_staged_upload_removed_after_success() {
    let (harness, staging) = staged_harness().await;
    let form = MultipartForm::new()
        .add_text("title", "Kept")
        .add_part("attachment", Part::bytes(b"payload".as_slice()).file_name("a.txt"));

    harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await
        .assert_status_ok();
    assert!(drained(staging.path()).await);
}

#[tokio::test]
async fn test_staged_upload_removed_after_binding_failure() {
    let (harness, staging) = staged_harness().await;
    let form = MultipartForm::new()
        .add_part("attachment", Part::bytes(b"payload".as_slice()).file_name("a.txt"));

    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["content"]["title"].is_string());
    assert!(drained(staging.path()).await);
    assert!(drained(harness.attachments.path()).await);
}

#[tokio::test]
async fn test_staged_upload_removed_after_size_rejection() {
    let staging = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.upload.temp_dir = Some(staging.path().to_path_buf());
    config.upload.max_file_size = 4;
    let harness = Harness::with_config(config).await;
    let form = MultipartForm::new()
        .add_text("title", "Too big")
        .add_part("attachment", Part::bytes(b"0123456789".as_slice()).file_name("big.txt"));

    harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert!(drained(staging.path()).await);
}

#[tokio::test]
async fn test_replacing_attachment_keeps_the_new_file() {
    let harness = Harness::new().await;
    let form = MultipartForm::new()
        .add_text("title", "Notes")
        .add_part("attachment", Part::bytes(b"v1".as_slice()).file_name("notes.txt"));
    let response = harness
        .server
        .post("/documents")
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await;
    let created: Value = response.json();
    let id = created["content"]["id"].as_str().unwrap();

    let form = MultipartForm::new()
        .add_part("attachment", Part::bytes(b"v2".as_slice()).file_name("notes.txt"));
    let response = harness
        .server
        .put(&format!("/documents/{}", id))
        .authorization_bearer(&harness.admin_token)
        .multipart(form)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let stored = harness
        .attachments
        .path()
        .join(body["content"]["attachment"]["stored_as"].as_str().unwrap());
    assert_eq!(std::fs::read(stored).unwrap(), b"v2");
}
