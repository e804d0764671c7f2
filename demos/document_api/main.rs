//! Document API served over the in-memory store
//!
//! Seeds an administrator and prints a bearer token that holds every
//! permission, then serves users, API keys and documents on port 3000.
//!
//! ```text
//! curl -H "Authorization: Bearer <token>" localhost:3000/documents
//! ```

use gatehouse::core::validation::PasswordHash;
use gatehouse::entities::api_key::issue_key;
use gatehouse::entities::user::{UserRecord, create_user};
use gatehouse::entities::{ApiKey, User};
use gatehouse::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_yaml_file(&path)?,
        None => ServerConfig::default(),
    };

    let store: Arc<dyn QueryExecutor> = Arc::new(in_memory_store());

    let admin = UserRecord::new(
        "Administrator",
        "admin@example.com",
        PasswordHash::derive("change me immediately"),
    );
    create_user(&Repository::<User>::new(store.clone()), &admin).await?;
    let issued = issue_key(
        &Repository::<ApiKey>::new(store.clone()),
        admin.id,
        "bootstrap",
        PermissionSet::all(true),
        None,
    )
    .await?;
    println!("Bootstrap token: {}", issued.token);

    ServerBuilder::new()
        .with_config(config)
        .with_credential_resolver(ApiKeyResolver::new(store.clone()))
        .register_module(UserModule::new(store.clone()))?
        .register_module(ApiKeyModule::new(store.clone()))?
        .register_module(DocumentModule::new(store, std::env::temp_dir().join("gatehouse-attachments")))?
        .serve("127.0.0.1:3000")
        .await
}
