//! API keys: bearer credentials issued to users
//!
//! Only the SHA-256 of a key's token is stored. The plaintext token is
//! returned once, when the key is issued.

use async_trait::async_trait;
use axum::http::Method;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::user::User;
use super::{id_param, without};
use crate::core::alias::Alias;
use crate::core::auth::{Credential, CredentialResolver, Subject};
use crate::core::error::{ApiError, AuthorizationError};
use crate::core::module::Module;
use crate::core::permission::PermissionSet;
use crate::core::pluralize::Pluralizer;
use crate::core::validation::{DateConditions, ParamType, StringConditions};
use crate::query::{EntitySchema, QueryExecutor, Repository, Row, to_row};
use crate::server::context::RequestContext;
use crate::server::registry::{ParamOptions, RegistryError, RouteOptions, RouteRegistry, with_state};

impl_entity_schema!(ApiKey, "api_keys", "api_key");

const HIDDEN: &[&str] = &["token_hash"];
const TOKEN_BYTES: usize = 32;

/// Stored form of an API key
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub name: String,
    pub token_hash: String,
    pub permissions: PermissionSet,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Hex SHA-256 of a token, the form tokens are stored and looked up in
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A freshly issued key: its public row and the one-time plaintext token
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub token: String,
    pub key: Value,
}

/// Issue a key to `subject_id`
pub async fn issue_key(
    keys: &Repository<ApiKey>,
    subject_id: Uuid,
    name: &str,
    permissions: PermissionSet,
    expires_at: Option<DateTime<Utc>>,
) -> Result<IssuedKey, ApiError> {
    let token = generate_token();
    let record = ApiKeyRecord {
        id: Uuid::new_v4(),
        subject_id,
        name: name.to_string(),
        token_hash: hash_token(&token),
        permissions,
        expires_at,
        created_at: Utc::now(),
    };
    let row = keys.perform_insert(to_row(&record)?).await?;
    tracing::info!(key = %record.id, subject = %subject_id, "api key issued");
    Ok(IssuedKey {
        token,
        key: without(row, HIDDEN),
    })
}

fn column<'a>(row: &'a Row, name: &str) -> Result<&'a Value, ApiError> {
    row.get(name)
        .ok_or_else(|| ApiError::internal(format!("api key row has no '{}'", name)))
}

fn uuid_column(row: &Row, name: &str) -> Result<Uuid, ApiError> {
    column(row, name)?
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| ApiError::internal(format!("api key '{}' is not a uuid", name)))
}

/// Read a stored key back into a [`Credential`]
pub fn credential_from_row(row: &Row) -> Result<Credential, ApiError> {
    let permissions = PermissionSet::from_value(column(row, "permissions")?)
        .map_err(|err| ApiError::internal(format!("stored permissions: {}", err)))?;
    let expires_at = match column(row, "expires_at")? {
        Value::Null => None,
        Value::String(text) => Some(
            DateTime::parse_from_rfc3339(text)
                .map_err(|err| ApiError::internal(format!("stored expiry: {}", err)))?
                .with_timezone(&Utc),
        ),
        other => {
            return Err(ApiError::internal(format!("stored expiry: {}", other)));
        }
    };
    Ok(Credential {
        id: uuid_column(row, "id")?,
        subject_id: uuid_column(row, "subject_id")?,
        permissions,
        expires_at,
    })
}

/// [`CredentialResolver`] over the `api_keys` and `users` tables
#[derive(Clone)]
pub struct ApiKeyResolver {
    keys: Repository<ApiKey>,
    users: Repository<User>,
}

impl ApiKeyResolver {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            keys: Repository::new(executor.clone()),
            users: Repository::new(executor),
        }
    }
}

#[async_trait]
impl CredentialResolver for ApiKeyResolver {
    async fn resolve_credential(&self, token: &str) -> Result<Option<Credential>, ApiError> {
        let query = self
            .keys
            .create_select()
            .value_clause("token_hash", vec![hash_token(token)]);
        match self.keys.perform_query(query).await?.first() {
            Some(row) => credential_from_row(row).map(Some),
            None => Ok(None),
        }
    }

    async fn resolve_subject(&self, id: &Uuid) -> Result<Option<Subject>, ApiError> {
        let rows = self.users.perform_select_list(&[json!(id.to_string())]).await?;
        Ok(rows.first().map(|row| Subject {
            id: *id,
            name: row
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }))
    }
}

pub struct ApiKeyModule {
    keys: Repository<ApiKey>,
}

impl ApiKeyModule {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            keys: Repository::new(executor),
        }
    }
}

impl Module for ApiKeyModule {
    fn name(&self) -> &str {
        "api_keys"
    }

    fn entity_types(&self) -> Vec<&str> {
        vec!["api_key"]
    }

    fn register(&self, registry: &mut RouteRegistry) -> Result<(), RegistryError> {
        let state = Arc::new(self.keys.clone());
        let collection = Pluralizer::collection_path("api_key");
        let alias = |method: &str| Alias::new("api_key", method);

        let list = alias("list");
        registry.register(
            &list,
            Method::GET,
            &[collection.as_str()],
            RouteOptions::new().permission("api_key.view"),
            with_state(&state, list_keys),
        )?;
        let max_limit = registry.max_limit();
        registry.register_pagination(&list, max_limit, ["name", "created_at", "expires_at"]);

        let create = alias("create");
        registry.register(
            &create,
            Method::POST,
            &[collection.as_str()],
            RouteOptions::new().permission("api_key.create"),
            with_state(&state, create_key),
        )?;
        registry
            .register_parameter(
                &create,
                "name",
                ParamType::String(StringConditions::length(1, 128)),
                ParamOptions::new(),
            )
            .register_parameter(
                &create,
                "permissions",
                ParamType::enumeration(PermissionSet::known_names()),
                ParamOptions::new().array().optional(true),
            )
            .register_parameter(
                &create,
                "expires_at",
                ParamType::Date(DateConditions::default()),
                ParamOptions::new().optional(true),
            );

        let delete = alias("delete");
        registry.register(
            &delete,
            Method::DELETE,
            &[collection.as_str(), ":id"],
            RouteOptions::new().permission("api_key.delete"),
            with_state(&state, delete_key),
        )?;
        registry.register_parameter(&delete, "id", ParamType::Uuid, ParamOptions::new());

        Ok(())
    }
}

async fn list_keys(keys: Arc<Repository<ApiKey>>, ctx: RequestContext) -> Result<Value, ApiError> {
    let subject = ctx.require_subject()?;
    let query = keys
        .create_select()
        .value_clause("subject_id", vec![subject.to_string()])
        .apply_pagination(&ctx.params.pagination());
    let rows = keys.perform_query(query).await?;
    Ok(Value::Array(rows.into_iter().map(|row| without(row, HIDDEN)).collect()))
}

/// Issue a key to the acting subject, never granting more than the caller holds
async fn create_key(keys: Arc<Repository<ApiKey>>, ctx: RequestContext) -> Result<Value, ApiError> {
    let subject = ctx.require_subject()?;
    let name = ctx
        .params
        .str("name")
        .ok_or_else(|| ApiError::bad_request("name is required"))?;

    let requested: Vec<String> = ctx
        .params
        .json_list("permissions")
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect();
    if let Some(denied) = requested.iter().find(|p| !ctx.auth.has_permission(p)) {
        return Err(AuthorizationError::MissingPermission {
            permission: denied.clone(),
        }
        .into());
    }
    let permissions = PermissionSet::from_names(&requested)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    if let Some(expiry) = ctx.params.date("expires_at") {
        if expiry <= Utc::now() {
            return Err(ApiError::bad_request("expires_at must be in the future"));
        }
    }

    let issued = issue_key(&keys, subject, name, permissions, ctx.params.date("expires_at")).await?;
    let mut content = issued.key;
    if let Value::Object(map) = &mut content {
        map.insert("token".to_string(), json!(issued.token));
    }
    Ok(content)
}

/// Revoke one of the acting subject's keys; other subjects' keys read as absent
async fn delete_key(keys: Arc<Repository<ApiKey>>, ctx: RequestContext) -> Result<Value, ApiError> {
    let subject = ctx.require_subject()?;
    let id = id_param(&ctx.params)?;
    let row = keys.perform_select(&id).await?;
    if uuid_column(&row, "subject_id")? != subject {
        return Err(ApiError::not_found(ApiKey::ALIAS, id_text(&id)));
    }
    let row = keys.perform_delete(&id).await?;
    tracing::info!(key = %id_text(&id), "api key revoked");
    Ok(without(row, HIDDEN))
}

fn id_text(id: &Value) -> String {
    id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::in_memory_store;
    use chrono::Duration;

    fn executor() -> Arc<dyn QueryExecutor> {
        Arc::new(in_memory_store())
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("secret"));
        assert_ne!(hash, hash_token("Secret"));
    }

    #[tokio::test]
    async fn test_issued_key_resolves() {
        let executor = executor();
        let keys = Repository::<ApiKey>::new(executor.clone());
        let subject = Uuid::new_v4();
        let expiry = Utc::now() + Duration::days(1);
        let permissions = PermissionSet::from_names(["document", "api_key.view"]).unwrap();

        let issued = issue_key(&keys, subject, "ci", permissions.clone(), Some(expiry))
            .await
            .unwrap();
        assert!(issued.key.get("token_hash").is_none());

        let resolver = ApiKeyResolver::new(executor);
        let credential = resolver
            .resolve_credential(&issued.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credential.subject_id, subject);
        assert_eq!(credential.permissions, permissions);
        assert_eq!(
            credential.expires_at.map(|e| e.timestamp()),
            Some(expiry.timestamp())
        );
    }

    #[tokio::test]
    async fn test_unknown_token_resolves_to_none() {
        let resolver = ApiKeyResolver::new(executor());
        assert!(resolver.resolve_credential("nope").await.unwrap().is_none());
        assert!(resolver.resolve_subject(&Uuid::new_v4()).await.unwrap().is_none());
    }

    #[test]
    fn test_malformed_row_is_internal() {
        let mut row = Row::new();
        row.insert("permissions".into(), json!(["no.such.permission"]));
        row.insert("expires_at".into(), Value::Null);
        assert!(credential_from_row(&row).unwrap_err().is_internal());
    }
}
