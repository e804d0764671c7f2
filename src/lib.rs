//! # Gatehouse
//!
//! Declarative endpoint registration, parameter validation and relational
//! filter composition for multi-entity REST APIs.
//!
//! ## Features
//!
//! - **Alias Registry**: every endpoint is a named `owner.method` alias with its route, permissions and typed parameters
//! - **Request Pipeline**: authorization, multipart intake, binding and validation before any handler runs
//! - **Uniform Envelope**: `{success, message, content, time_started, time_completed}` on every response
//! - **Permission Trees**: leaves, groups and `admin`, with impersonation
//! - **Filter Composer**: value, exclusion, wildcard and relation clauses with UNION / INTERSECTION sets
//! - **CRUD Primitives**: select, insert, update and delete with 404 / 409 semantics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gatehouse::prelude::*;
//!
//! let store: Arc<dyn QueryExecutor> = Arc::new(in_memory_store());
//!
//! let app = ServerBuilder::new()
//!     .with_credential_resolver(ApiKeyResolver::new(store.clone()))
//!     .register_module(UserModule::new(store.clone()))?
//!     .register_module(ApiKeyModule::new(store.clone()))?
//!     .register_module(DocumentModule::new(store, "attachments"))?
//!     .build()?;
//! ```

pub mod config;
pub mod core;
pub mod entities;
pub mod query;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        Alias, ApiError, AuthContext, Credential, CredentialResolver, Module, NoCredentials,
        OrderDirection, Pagination, PermissionSet, Pluralizer, Subject,
        validation::{ParamType, ParamValue, Params, StringConditions},
    };

    // === Macros ===
    pub use crate::impl_entity_schema;

    // === Query ===
    pub use crate::query::{
        EntityQuery, EntitySchema, QueryExecutor, RelationDef, RelationSetOp, Repository, Row,
        to_row,
    };

    // === Entities ===
    pub use crate::entities::{
        ApiKeyModule, ApiKeyResolver, DocumentModule, UserModule, in_memory_store,
    };

    // === Storage ===
    pub use crate::storage::InMemoryStore;
    #[cfg(feature = "postgres")]
    pub use crate::storage::PgExecutor;

    // === Config ===
    pub use crate::config::ServerConfig;

    // === Server ===
    pub use crate::server::{
        Envelope, ParamOptions, RequestContext, RouteOptions, RouteRegistry, ServerBuilder,
        with_state,
    };

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
    pub use uuid::Uuid;

    // === Axum ===
    pub use axum::{Router, http::Method};
}
