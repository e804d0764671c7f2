//! Route registry: alias → route metadata, and method + path → alias
//!
//! Entity modules fill the registry once at startup through explicit
//! registration calls. Every call creates or extends the [`RouteSpec`] of one
//! [`Alias`], so a route, its parameters and its pagination can be declared
//! in any order by independent calls. After [`RouteRegistry::validate`] the
//! registry is only read.

use async_trait::async_trait;
use axum::http::Method;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use super::context::RequestContext;
use crate::config::DEFAULT_MAX_LIMIT;
use crate::core::alias::Alias;
use crate::core::error::ApiError;
use crate::core::validation::{IntegerConditions, ParamType};

static PATH_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/?:?[A-Za-z_-]+$").expect("path part pattern is valid"));

/// Names of the pagination parameters bound by [`RouteRegistry::register_pagination`]
pub const SKIP_PARAM: &str = "skip";
pub const LIMIT_PARAM: &str = "limit";
pub const ORDER_PARAM: &str = "order";

/// Registration mistakes, all fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid path part '{part}' for {alias}")]
    InvalidPathPart { alias: String, part: String },

    #[error("{alias} is already routed to {existing}, cannot route it to {requested}")]
    RouteConflict {
        alias: String,
        existing: String,
        requested: String,
    },

    #[error("{alias} already has a handler")]
    DuplicateHandler { alias: String },

    #[error("{method} {path} is claimed by both {first} and {second}")]
    DuplicateRoute {
        method: Method,
        path: String,
        first: String,
        second: String,
    },

    #[error("{alias} declares parameters but was never routed")]
    MissingRoute { alias: String },
}

/// GET and HEAD read; every other method writes
pub fn is_read_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

// =============================================================================
// Handlers
// =============================================================================

/// The code behind a route
///
/// Implemented for every `Fn(RequestContext) -> impl Future<Output =
/// Result<Value, ApiError>>`, so async closures capturing their state can be
/// registered directly.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, ctx: RequestContext) -> Result<Value, ApiError>;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    async fn handle(&self, ctx: RequestContext) -> Result<Value, ApiError> {
        (self)(ctx).await
    }
}

/// Adapt `f(state, ctx)` into a handler sharing `state` across requests
pub fn with_state<S, F, Fut>(
    state: &Arc<S>,
    f: F,
) -> impl Fn(RequestContext) -> Fut + Send + Sync + 'static
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    let state = Arc::clone(state);
    move |ctx| f(Arc::clone(&state), ctx)
}

// =============================================================================
// Paths
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    /// Literal segments weigh their length, parameters weigh -1
    pub fn weight(&self) -> i64 {
        match self {
            Segment::Literal(text) => text.len() as i64,
            Segment::Param(_) => -1,
        }
    }
}

/// A parsed route path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse path parts such as `["documents", ":id"]`
    ///
    /// Each part is letters, `_` or `-`, with an optional leading `/` and an
    /// optional `:` marking a named parameter.
    pub fn parse<S: AsRef<str>>(alias: &Alias, parts: &[S]) -> Result<Self, RegistryError> {
        let segments = parts
            .iter()
            .map(|part| {
                let part = part.as_ref();
                if !PATH_PART.is_match(part) {
                    return Err(RegistryError::InvalidPathPart {
                        alias: alias.key(),
                        part: part.to_string(),
                    });
                }
                let part = part.trim_start_matches('/');
                Ok(match part.strip_prefix(':') {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(part.to_string()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Prepend literal prefix segments
    fn prefixed(&self, alias: &Alias, prefix: &str) -> Result<Self, RegistryError> {
        let parts: Vec<&str> = prefix.split('/').filter(|p| !p.is_empty()).collect();
        let mut prefixed = Self::parse(alias, &parts)?;
        prefixed.segments.extend(self.segments.iter().cloned());
        Ok(prefixed)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn weights(&self) -> Vec<i64> {
        self.segments.iter().map(Segment::weight).collect()
    }

    pub fn weight(&self) -> i64 {
        self.segments.iter().map(Segment::weight).sum()
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// The axum route path, e.g. `/documents/{id}`
    pub fn axum_path(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => format!("/{}", text),
                Segment::Param(name) => format!("/{{{}}}", name),
            })
            .collect()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.axum_path())
    }
}

// =============================================================================
// Specs
// =============================================================================

/// Access requirements and mounting of a route
#[derive(Debug, Clone)]
pub struct RouteOptions {
    /// Defaults to true; a credential must be sent
    pub requires_auth: bool,
    /// Every listed permission must be granted
    pub permissions: Vec<String>,
    pub path_prefix: Option<String>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            requires_auth: true,
            permissions: Vec::new(),
            path_prefix: None,
        }
    }
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// No credential required
    pub fn public() -> Self {
        Self {
            requires_auth: false,
            ..Self::default()
        }
    }

    pub fn permission(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.permissions.contains(&name) {
            self.permissions.push(name);
        }
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    fn absorb(&mut self, other: RouteOptions) {
        self.requires_auth |= other.requires_auth;
        for permission in other.permissions {
            if !self.permissions.contains(&permission) {
                self.permissions.push(permission);
            }
        }
        if self.path_prefix.is_none() {
            self.path_prefix = other.path_prefix;
        }
    }
}

/// Cardinality and optionality of a parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamOptions {
    pub array_allowed: bool,
    /// `None` leaves the decision to the method (see [`ParameterSpec::is_required`])
    pub optional: Option<bool>,
}

impl ParamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn array(mut self) -> Self {
        self.array_allowed = true;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub ty: ParamType,
    pub array_allowed: bool,
    pub optional: Option<bool>,
}

impl ParameterSpec {
    /// Whether omitting the parameter is an error
    ///
    /// On read methods a parameter is mandatory only if declared
    /// `optional = false`; on write methods it is exempt only if declared
    /// `optional = true`.
    pub fn is_required(&self, method: &Method) -> bool {
        if is_read_method(method) {
            self.optional == Some(false)
        } else {
            self.optional != Some(true)
        }
    }
}

/// A multipart field accepting files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSpec {
    pub field: String,
    pub max_count: usize,
}

/// Everything registered under one alias
#[derive(Clone)]
pub struct RouteSpec {
    pub alias: Alias,
    pub method: Option<Method>,
    /// Full path, prefix included
    pub path: Option<PathPattern>,
    pub options: RouteOptions,
    pub parameters: IndexMap<String, ParameterSpec>,
    pub uploads: Vec<UploadSpec>,
    pub handler: Option<Arc<dyn RouteHandler>>,
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSpec")
            .field("alias", &self.alias)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("options", &self.options)
            .field("parameters", &self.parameters)
            .field("uploads", &self.uploads)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl RouteSpec {
    fn new(alias: Alias) -> Self {
        Self {
            alias,
            method: None,
            path: None,
            options: RouteOptions::default(),
            parameters: IndexMap::new(),
            uploads: Vec::new(),
            handler: None,
        }
    }

    pub fn has_uploads(&self) -> bool {
        !self.uploads.is_empty()
    }

    pub fn upload(&self, field: &str) -> Option<&UploadSpec> {
        self.uploads.iter().find(|u| u.field == field)
    }

    pub fn weight(&self) -> i64 {
        self.path.as_ref().map(PathPattern::weight).unwrap_or_default()
    }
}

// =============================================================================
// Registry
// =============================================================================

pub struct RouteRegistry {
    specs: IndexMap<Alias, RouteSpec>,
    reverse: HashMap<(Method, String), Alias>,
    max_limit: i64,
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self {
            specs: IndexMap::new(),
            reverse: HashMap::new(),
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound modules should give to `limit` on collection routes
    pub fn max_limit(&self) -> i64 {
        self.max_limit
    }

    pub fn set_max_limit(&mut self, max_limit: i64) {
        self.max_limit = max_limit;
    }

    fn spec_mut(&mut self, alias: &Alias) -> &mut RouteSpec {
        self.specs
            .entry(alias.clone())
            .or_insert_with(|| RouteSpec::new(alias.clone()))
    }

    /// Route an alias to `method` + `path_parts` and attach its handler
    ///
    /// Options accumulate across calls: permissions are unioned and a
    /// credential requirement, once declared, stays.
    pub fn register<S, H>(
        &mut self,
        alias: &Alias,
        method: Method,
        path_parts: &[S],
        options: RouteOptions,
        handler: H,
    ) -> Result<&mut Self, RegistryError>
    where
        S: AsRef<str>,
        H: RouteHandler + 'static,
    {
        let mut path = PathPattern::parse(alias, path_parts)?;
        if let Some(prefix) = options.path_prefix.as_deref() {
            path = path.prefixed(alias, prefix)?;
        }
        let key = (method.clone(), path.axum_path());

        if let Some(owner) = self.reverse.get(&key) {
            if owner != alias {
                return Err(RegistryError::DuplicateRoute {
                    method,
                    path: key.1,
                    first: owner.key(),
                    second: alias.key(),
                });
            }
        }

        let spec = self.spec_mut(alias);
        if let (Some(existing_method), Some(existing_path)) = (&spec.method, &spec.path) {
            if *existing_method != method || *existing_path != path {
                return Err(RegistryError::RouteConflict {
                    alias: alias.key(),
                    existing: format!("{} {}", existing_method, existing_path),
                    requested: format!("{} {}", method, path),
                });
            }
        }
        if spec.handler.is_some() {
            return Err(RegistryError::DuplicateHandler { alias: alias.key() });
        }

        if spec.method.is_none() {
            spec.options = options;
        } else {
            spec.options.absorb(options);
        }
        spec.method = Some(method);
        spec.path = Some(path);
        spec.handler = Some(Arc::new(handler));

        self.reverse.insert(key, alias.clone());
        tracing::debug!(alias = %alias, "route registered");
        Ok(self)
    }

    /// Declare or extend a parameter of an alias
    ///
    /// A FILE parameter also declares an upload field of the same name.
    pub fn register_parameter(
        &mut self,
        alias: &Alias,
        name: &str,
        ty: ParamType,
        options: ParamOptions,
    ) -> &mut Self {
        let spec = self.spec_mut(alias);

        if let ParamType::File { max_count } = ty {
            match spec.uploads.iter_mut().find(|u| u.field == name) {
                Some(upload) => upload.max_count = max_count,
                None => spec.uploads.push(UploadSpec {
                    field: name.to_string(),
                    max_count,
                }),
            }
        }

        match spec.parameters.get_mut(name) {
            Some(existing) => {
                existing.ty = ty;
                existing.array_allowed |= options.array_allowed;
                existing.optional = options.optional.or(existing.optional);
            }
            None => {
                spec.parameters.insert(
                    name.to_string(),
                    ParameterSpec {
                        ty,
                        array_allowed: options.array_allowed,
                        optional: options.optional,
                    },
                );
            }
        }
        self
    }

    /// Declare `skip`, `limit` and `order` on a collection route
    pub fn register_pagination<I, S>(&mut self, alias: &Alias, max_limit: i64, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register_parameter(
            alias,
            SKIP_PARAM,
            ParamType::Integer(IntegerConditions {
                min: Some(0),
                max: None,
            }),
            ParamOptions::new().optional(true),
        )
        .register_parameter(
            alias,
            LIMIT_PARAM,
            ParamType::Integer(IntegerConditions {
                min: Some(1),
                max: Some(max_limit),
            }),
            ParamOptions::new().optional(true),
        )
        .register_parameter(
            alias,
            ORDER_PARAM,
            ParamType::order(columns),
            ParamOptions::new().array().optional(true),
        )
    }

    pub fn get(&self, alias: &Alias) -> Option<&RouteSpec> {
        self.specs.get(alias)
    }

    /// The alias routed to `method` + an axum path pattern
    pub fn resolve(&self, method: &Method, path: &str) -> Option<&Alias> {
        self.reverse.get(&(method.clone(), path.to_string()))
    }

    /// Routed specs, most specific path first
    pub fn routes(&self) -> Vec<&RouteSpec> {
        let mut routes: Vec<&RouteSpec> = self
            .specs
            .values()
            .filter(|s| s.path.is_some() && s.handler.is_some())
            .collect();
        routes.sort_by(|a, b| b.weight().cmp(&a.weight()).then_with(|| a.alias.cmp(&b.alias)));
        routes
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Every alias must be routed with a handler
    pub fn validate(&self) -> Result<(), RegistryError> {
        match self
            .specs
            .values()
            .find(|s| s.path.is_none() || s.handler.is_none())
        {
            Some(spec) => Err(RegistryError::MissingRoute {
                alias: spec.alias.key(),
            }),
            None => Ok(()),
        }
    }
}
