//! Module system
//!
//! A module groups the routes of one or more entities and declares them on
//! the [`RouteRegistry`] when it is registered with the server builder.

use crate::server::registry::{RegistryError, RouteRegistry};

/// A unit of route declarations
pub trait Module: Send + Sync {
    /// Unique module name
    fn name(&self) -> &str;

    /// Module version
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Entity types whose routes this module declares
    fn entity_types(&self) -> Vec<&str>;

    /// Declare routes and parameters
    ///
    /// Called once, before the server starts listening.
    fn register(&self, registry: &mut RouteRegistry) -> Result<(), RegistryError>;
}
