//! Shared fixture: a server over the in-memory store with every entity module
//! plus a small probe module exercising the pipeline directly

#![allow(dead_code)]

use axum_test::TestServer;
use chrono::{DateTime, Utc};
use gatehouse::core::validation::PasswordHash;
use gatehouse::entities::api_key::issue_key;
use gatehouse::entities::user::{UserRecord, create_user};
use gatehouse::entities::{ApiKey, User};
use gatehouse::prelude::*;
use gatehouse::server::RegistryError;
use tempfile::TempDir;

pub struct Harness {
    pub server: TestServer,
    pub store: Arc<dyn QueryExecutor>,
    /// Subject every issued key acts for
    pub admin_id: Uuid,
    /// Key holding every permission
    pub admin_token: String,
    pub attachments: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::default()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let store: Arc<dyn QueryExecutor> = Arc::new(in_memory_store());
        let attachments = tempfile::tempdir().unwrap();

        let admin = UserRecord::new(
            "Admin",
            "admin@example.com",
            PasswordHash::derive("correct horse battery"),
        );
        create_user(&Repository::<User>::new(store.clone()), &admin)
            .await
            .unwrap();
        let admin_token = issue_key(
            &Repository::<ApiKey>::new(store.clone()),
            admin.id,
            "root",
            PermissionSet::all(true),
            None,
        )
        .await
        .unwrap()
        .token;

        let app = ServerBuilder::new()
            .with_config(config)
            .with_credential_resolver(ApiKeyResolver::new(store.clone()))
            .register_module(UserModule::new(store.clone()))
            .unwrap()
            .register_module(ApiKeyModule::new(store.clone()))
            .unwrap()
            .register_module(DocumentModule::new(store.clone(), attachments.path()))
            .unwrap()
            .register_module(ProbeModule)
            .unwrap()
            .build()
            .unwrap();

        Self {
            server: TestServer::new(app),
            store,
            admin_id: admin.id,
            admin_token,
            attachments,
        }
    }

    /// Issue a key for the admin subject holding only `permissions`
    pub async fn token(&self, permissions: &[&str]) -> String {
        self.token_expiring(permissions, None).await
    }

    pub async fn token_expiring(
        &self,
        permissions: &[&str],
        expires_at: Option<DateTime<Utc>>,
    ) -> String {
        issue_key(
            &Repository::<ApiKey>::new(self.store.clone()),
            self.admin_id,
            "scoped",
            PermissionSet::from_names(permissions).unwrap(),
            expires_at,
        )
        .await
        .unwrap()
        .token
    }

    /// Create a user directly in the store, returning its id
    pub async fn user(&self, name: &str, email: &str) -> Uuid {
        let record = UserRecord::new(name, email, PasswordHash::derive("correct horse battery"));
        create_user(&Repository::<User>::new(self.store.clone()), &record)
            .await
            .unwrap();
        record.id
    }

    /// Create a document over HTTP, returning its envelope content
    pub async fn document(&self, title: &str, status: &str, tags: &[&str]) -> Value {
        let response = self
            .server
            .post("/documents")
            .authorization_bearer(&self.admin_token)
            .json(&json!({ "title": title, "status": status, "tag": tags }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["content"].clone()
    }
}

/// Routes that exist only to drive the pipeline from the outside
pub struct ProbeModule;

impl Module for ProbeModule {
    fn name(&self) -> &str {
        "probe"
    }

    fn entity_types(&self) -> Vec<&str> {
        vec!["probe"]
    }

    fn register(&self, registry: &mut RouteRegistry) -> std::result::Result<(), RegistryError> {
        let search = Alias::new("probe", "search");
        registry.register(&search, Method::GET, &["probe"], RouteOptions::public(), echo)?;
        registry
            .register_parameter(&search, "q", ParamType::String(StringConditions::length(1, 32)), ParamOptions::new().optional(false))
            .register_parameter(&search, "page", ParamType::integer(Some(1), Some(10)), ParamOptions::new());

        let submit = Alias::new("probe", "submit");
        registry.register(&submit, Method::POST, &["probe"], RouteOptions::public(), echo)?;
        registry
            .register_parameter(&submit, "name", ParamType::string(), ParamOptions::new())
            .register_parameter(&submit, "ref_id", ParamType::Uuid, ParamOptions::new().optional(true))
            .register_parameter(&submit, "flag", ParamType::Boolean, ParamOptions::new().optional(true));

        let item = Alias::new("probe", "item");
        registry.register(&item, Method::PATCH, &["probe", ":slot"], RouteOptions::public(), echo)?;
        registry.register_parameter(&item, "slot", ParamType::integer(Some(0), None), ParamOptions::new());

        registry.register(
            &Alias::new("probe", "crash"),
            Method::POST,
            &["probe", "crash"],
            RouteOptions::public(),
            crash,
        )?;
        Ok(())
    }
}

/// Reply with the bound parameters
async fn echo(ctx: RequestContext) -> std::result::Result<Value, ApiError> {
    let mut bound = serde_json::Map::new();
    for name in ["q", "page", "name", "ref_id", "flag", "slot"] {
        if let Some(value) = ctx.params.get(name) {
            bound.insert(name.to_string(), value.to_json());
        }
    }
    Ok(Value::Object(bound))
}

async fn crash(_ctx: RequestContext) -> std::result::Result<Value, ApiError> {
    panic!("probe handler crashed")
}
