//! HTTP server: route registry, request pipeline and builder
//!
//! Modules declare routes on a [`RouteRegistry`]; the [`ServerBuilder`]
//! freezes the registry and mounts every route on the request pipeline.

pub mod builder;
pub mod context;
pub mod pipeline;
pub mod registry;

pub use builder::ServerBuilder;
pub use context::RequestContext;
pub use pipeline::respond::Envelope;
pub use registry::{
    ParamOptions, ParameterSpec, PathPattern, RegistryError, RouteHandler, RouteOptions,
    RouteRegistry, RouteSpec, UploadSpec, with_state,
};
