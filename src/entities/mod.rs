//! Entity modules built on the registry, the pipeline and the composer
//!
//! - [`user`]: accounts with hashed passwords; the subjects credentials act for
//! - [`api_key`]: bearer credentials and the [`ApiKeyResolver`](api_key::ApiKeyResolver)
//! - [`document`]: full CRUD with tag relations, filters and an attachment upload

#[macro_use]
pub mod macros;

pub mod api_key;
pub mod document;
pub mod user;

pub use api_key::{ApiKey, ApiKeyModule, ApiKeyResolver};
pub use document::{Document, DocumentModule, Tag};
pub use user::{User, UserModule};

use serde_json::{Value, json};

use crate::core::error::ApiError;
use crate::core::validation::Params;
use crate::query::{EntitySchema, Row};
use crate::storage::InMemoryStore;

/// An in-memory store with every table the entity modules use
pub fn in_memory_store() -> InMemoryStore {
    InMemoryStore::new()
        .with_table(User::TABLE, &["email"])
        .with_table(ApiKey::TABLE, &["token_hash"])
        .with_table(Document::TABLE, &[])
        .with_table(Tag::TABLE, &["name"])
        .with_table(document::DOCUMENT_TAGS, &[])
}

/// The `id` path parameter as a store key
pub(crate) fn id_param(params: &Params) -> Result<Value, ApiError> {
    params
        .uuid("id")
        .map(|id| json!(id.to_string()))
        .ok_or_else(|| ApiError::bad_request("missing id"))
}

/// Drop columns that must never leave the server
pub(crate) fn without(mut row: Row, hidden: &[&str]) -> Value {
    for column in hidden {
        row.remove(*column);
    }
    Value::Object(row)
}
