//! Core types shared by the registry, the pipeline and the entity modules

pub mod alias;
pub mod auth;
pub mod error;
pub mod module;
pub mod permission;
pub mod pluralize;
pub mod query;
pub mod validation;

pub use alias::Alias;
pub use auth::{AuthContext, Credential, CredentialResolver, NoCredentials, Subject};
pub use error::ApiError;
pub use module::Module;
pub use permission::PermissionSet;
pub use pluralize::Pluralizer;
pub use query::{OrderDirection, OrderMap, Pagination};
