//! ServerBuilder for fluent API to build HTTP servers

use super::pipeline::respond::Envelope;
use super::pipeline::{PipelineState, headers, mount};
use super::registry::RouteRegistry;
use crate::config::ServerConfig;
use crate::core::auth::{CredentialResolver, NoCredentials};
use crate::core::module::Module;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::{Json, Router, routing::get};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for creating HTTP servers from module route declarations
///
/// # Example
///
/// ```ignore
/// let store: Arc<dyn QueryExecutor> = Arc::new(in_memory_store());
/// let app = ServerBuilder::new()
///     .with_credential_resolver(ApiKeyResolver::new(store.clone()))
///     .register_module(DocumentModule::new(store, "attachments"))?
///     .build()?;
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    resolver: Option<Arc<dyn CredentialResolver>>,
    registry: RouteRegistry,
    modules: Vec<Arc<dyn Module>>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            resolver: None,
            registry: RouteRegistry::new(),
            modules: Vec::new(),
            custom_routes: Vec::new(),
        }
    }

    /// Replace the configuration
    ///
    /// Call before registering modules: collection routes read the
    /// pagination ceiling when they are declared.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.registry.set_max_limit(config.pagination.max_limit);
        self.config = config;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Set how bearer credentials and impersonated subjects are resolved
    ///
    /// Without one, every route requiring a credential answers 401.
    pub fn with_credential_resolver(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Add routes served outside the pipeline
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Register a module
    ///
    /// The module declares its routes on the registry immediately, so
    /// declaration mistakes surface here rather than at first request.
    pub fn register_module(mut self, module: impl Module + 'static) -> Result<Self> {
        let module = Arc::new(module);
        module
            .register(&mut self.registry)
            .with_context(|| format!("registering module '{}'", module.name()))?;

        tracing::info!(
            module = module.name(),
            version = module.version(),
            entities = ?module.entity_types(),
            "module registered"
        );
        self.modules.push(module);
        Ok(self)
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Build the final router
    ///
    /// The registry is frozen here: after this call it is shared read-only by
    /// every request.
    pub fn build(self) -> Result<Router> {
        self.registry.validate()?;

        let resolver = self.resolver.unwrap_or_else(|| {
            tracing::warn!("no credential resolver configured");
            Arc::new(NoCredentials)
        });
        let modules = self.modules.len();
        let cors = self.config.cors.clone();
        let state = PipelineState {
            registry: Arc::new(self.registry),
            config: Arc::new(self.config),
            resolver,
        };
        tracing::info!(
            modules,
            routes = state.registry.routes().len(),
            "building router"
        );

        let mut app = Router::new()
            .route("/health", get(health_check))
            .merge(mount(state)?);
        for custom in self.custom_routes {
            app = app.merge(custom);
        }

        headers::apply(app.layer(DefaultBodyLimit::disable()), &cors)
    }

    /// Serve the application with graceful shutdown
    ///
    /// This will:
    /// - Bind to the provided address
    /// - Start serving requests
    /// - Handle SIGTERM and SIGINT (Ctrl+C) for graceful shutdown
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn health_check() -> Json<Envelope> {
    Json(Envelope::success(
        json!({ "status": "ok", "service": "gatehouse" }),
        Utc::now(),
    ))
}

/// Wait for a shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alias::Alias;
    use crate::core::error::ApiError;
    use crate::server::context::RequestContext;
    use crate::server::registry::{RegistryError, RouteOptions};
    use axum::http::Method;
    use serde_json::Value;

    struct StubModule {
        path: &'static str,
    }

    async fn ok(_ctx: RequestContext) -> Result<Value, ApiError> {
        Ok(json!({}))
    }

    impl Module for StubModule {
        fn name(&self) -> &str {
            "stub"
        }

        fn entity_types(&self) -> Vec<&str> {
            vec!["order"]
        }

        fn register(&self, registry: &mut RouteRegistry) -> Result<(), RegistryError> {
            registry.register(
                &Alias::new("order", "list"),
                Method::GET,
                &[self.path],
                RouteOptions::public(),
                ok,
            )?;
            Ok(())
        }
    }

    #[test]
    fn test_register_module_declares_routes() {
        let builder = ServerBuilder::new()
            .register_module(StubModule { path: "orders" })
            .unwrap();
        assert_eq!(builder.registry().len(), 1);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_invalid_path_fails_registration() {
        let err = ServerBuilder::new()
            .register_module(StubModule { path: "orders/2" })
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("invalid path part"));
    }

    #[test]
    fn test_conflicting_modules_fail() {
        let result = ServerBuilder::new()
            .register_module(StubModule { path: "orders" })
            .unwrap()
            .register_module(StubModule { path: "orders" });
        assert!(result.is_err());
    }

    #[test]
    fn test_with_config() {
        let mut config = ServerConfig::default();
        config.pagination.max_limit = 5;
        let builder = ServerBuilder::new().with_config(config);
        assert_eq!(builder.config().pagination.max_limit, 5);
        assert_eq!(builder.registry().max_limit(), 5);
    }
}
