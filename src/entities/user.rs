//! User accounts
//!
//! Users are the subjects API keys are issued to and the targets of
//! impersonation. Passwords arrive through the PASSWORD validator and are
//! stored only as their PBKDF2 hash.

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use super::{id_param, without};
use crate::core::alias::Alias;
use crate::core::error::ApiError;
use crate::core::module::Module;
use crate::core::pluralize::Pluralizer;
use crate::core::validation::{ParamType, PasswordHash, StringConditions};
use crate::query::{QueryExecutor, Repository, to_row};
use crate::server::context::RequestContext;
use crate::server::registry::{ParamOptions, RegistryError, RouteOptions, RouteRegistry, with_state};

impl_entity_schema!(User, "users", "user");

const HIDDEN: &[&str] = &["password"];

/// Stored form of a user
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password: PasswordHash,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: PasswordHash) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            password,
            created_at: Utc::now(),
        }
    }
}

/// Insert a user, returning its public representation
pub async fn create_user(users: &Repository<User>, record: &UserRecord) -> Result<Value, ApiError> {
    let row = users.perform_insert(to_row(record)?).await?;
    Ok(without(row, HIDDEN))
}

pub struct UserModule {
    users: Repository<User>,
}

impl UserModule {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            users: Repository::new(executor),
        }
    }
}

impl Module for UserModule {
    fn name(&self) -> &str {
        "users"
    }

    fn entity_types(&self) -> Vec<&str> {
        vec!["user"]
    }

    fn register(&self, registry: &mut RouteRegistry) -> Result<(), RegistryError> {
        let state = Arc::new(self.users.clone());
        let collection = Pluralizer::collection_path("user");
        let alias = |method: &str| Alias::new("user", method);

        let list = alias("list");
        registry.register(
            &list,
            Method::GET,
            &[collection.as_str()],
            RouteOptions::new().permission("user.view"),
            with_state(&state, list_users),
        )?;
        registry.register_parameter(
            &list,
            "search",
            ParamType::String(StringConditions::length(1, 128)),
            ParamOptions::new(),
        );
        let max_limit = registry.max_limit();
        registry.register_pagination(&list, max_limit, ["name", "email", "created_at"]);

        registry.register(
            &alias("me"),
            Method::GET,
            &[collection.as_str(), "me"],
            RouteOptions::new(),
            with_state(&state, current_user),
        )?;

        let get = alias("get");
        registry.register(
            &get,
            Method::GET,
            &[collection.as_str(), ":id"],
            RouteOptions::new().permission("user.view"),
            with_state(&state, get_user),
        )?;
        registry.register_parameter(&get, "id", ParamType::Uuid, ParamOptions::new().optional(false));

        let create = alias("create");
        registry
            .register_parameter(
                &create,
                "name",
                ParamType::String(StringConditions::length(1, 128)),
                ParamOptions::new(),
            )
            .register_parameter(&create, "email", ParamType::Email, ParamOptions::new())
            .register_parameter(&create, "password", ParamType::Password, ParamOptions::new());
        registry.register(
            &create,
            Method::POST,
            &[collection.as_str()],
            RouteOptions::new().permission("user.create"),
            with_state(&state, create_account),
        )?;

        Ok(())
    }
}

async fn list_users(users: Arc<Repository<User>>, ctx: RequestContext) -> Result<Value, ApiError> {
    let query = users
        .create_select()
        .wildcard_clause("name", ctx.params.str("search"))
        .apply_pagination(&ctx.params.pagination());
    let rows = users.perform_query(query).await?;
    Ok(Value::Array(rows.into_iter().map(|row| without(row, HIDDEN)).collect()))
}

async fn current_user(users: Arc<Repository<User>>, ctx: RequestContext) -> Result<Value, ApiError> {
    let subject = ctx.require_subject()?;
    let row = users.perform_select(&json!(subject.to_string())).await?;
    Ok(without(row, HIDDEN))
}

async fn get_user(users: Arc<Repository<User>>, ctx: RequestContext) -> Result<Value, ApiError> {
    let row = users.perform_select(&id_param(&ctx.params)?).await?;
    Ok(without(row, HIDDEN))
}

async fn create_account(users: Arc<Repository<User>>, ctx: RequestContext) -> Result<Value, ApiError> {
    let (Some(name), Some(email), Some(password)) = (
        ctx.params.str("name"),
        ctx.params.str("email"),
        ctx.params.password("password"),
    ) else {
        return Err(ApiError::bad_request("name, email and password are required"));
    };
    let record = UserRecord::new(name, email.to_lowercase(), password.clone());
    create_user(&users, &record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::in_memory_store;
    use axum::http::StatusCode;

    fn users() -> Repository<User> {
        Repository::new(Arc::new(in_memory_store()))
    }

    #[tokio::test]
    async fn test_password_never_leaves_the_server() {
        let users = users();
        let record = UserRecord::new("Ada", "ada@example.com", PasswordHash::derive("correct horse battery"));
        let user = create_user(&users, &record).await.unwrap();
        assert_eq!(user["email"], "ada@example.com");
        assert!(user.get("password").is_none());

        let stored = users.perform_select(&json!(record.id.to_string())).await.unwrap();
        let hash: PasswordHash = serde_json::from_value(stored["password"].clone()).unwrap();
        assert!(hash.verify("correct horse battery"));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let users = users();
        let first = UserRecord::new("Ada", "ada@example.com", PasswordHash::derive("correct horse battery"));
        let second = UserRecord::new("Eve", "ada@example.com", PasswordHash::derive("correct horse battery"));
        create_user(&users, &first).await.unwrap();
        let err = create_user(&users, &second).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_registers_routes() {
        let mut registry = RouteRegistry::new();
        UserModule::new(Arc::new(in_memory_store()))
            .register(&mut registry)
            .unwrap();
        assert!(registry.validate().is_ok());
        assert!(registry.resolve(&Method::GET, "/users/me").is_some());
        assert!(registry.resolve(&Method::GET, "/users/{id}").is_some());
        assert!(registry.resolve(&Method::POST, "/users").is_some());
    }
}
