//! The request pipeline
//!
//! Every registered route is served by [`dispatch`], which runs the same
//! ordered steps and short-circuits to the responder on the first failure:
//!
//! 1. headers (tower layers, see [`headers`])
//! 2. request locals: request id, alias and spec, start time
//! 3. authorization
//! 4. body and file intake
//! 5. parameter binding
//! 6. handler invocation, panics included
//! 7. response emission and upload release

pub mod binding;
pub mod headers;
pub mod intake;
pub mod respond;

use axum::Router;
use axum::body::Body;
use axum::extract::{FromRequestParts, MatchedPath, RawPathParams, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter, on};
use chrono::Utc;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::auth::{AccessRule, CredentialResolver, authorize};
use crate::core::error::{ApiError, NotFoundError};
use crate::core::validation::RawValue;
use crate::server::context::RequestContext;
use crate::server::registry::{RouteHandler, RouteRegistry, RouteSpec, is_read_method};
use binding::Sources;
use intake::Uploads;

/// Shared, read-only state of the pipeline
#[derive(Clone)]
pub struct PipelineState {
    pub registry: Arc<RouteRegistry>,
    pub config: Arc<ServerConfig>,
    pub resolver: Arc<dyn CredentialResolver>,
}

/// Mount every registered route on a router served by [`dispatch`]
///
/// Methods a path does not declare fall through to [`fallback`].
pub fn mount(state: PipelineState) -> anyhow::Result<Router> {
    let mut paths: IndexMap<String, MethodRouter<PipelineState>> = IndexMap::new();

    for spec in state.registry.routes() {
        let (Some(method), Some(path)) = (&spec.method, &spec.path) else {
            continue;
        };
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|err| anyhow::anyhow!("{} cannot be routed: {}", spec.alias, err))?;
        let path = path.axum_path();
        let method_router = match paths.shift_remove(&path) {
            Some(existing) => existing.on(filter, dispatch),
            None => on(filter, dispatch),
        };
        paths.insert(path, method_router);
    }

    let mut router = Router::new();
    for (path, method_router) in paths {
        tracing::debug!(path = %path, "mounting route");
        router = router.route(&path, method_router.fallback(fallback));
    }
    Ok(router.fallback(fallback).with_state(state))
}

/// Serve one routed request
pub async fn dispatch(State(state): State<PipelineState>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();

    // axum serves HEAD through the GET route of a path
    let spec = parts
        .extensions
        .get::<MatchedPath>()
        .and_then(|matched| {
            state
                .registry
                .resolve(&parts.method, matched.as_str())
                .or_else(|| {
                    (parts.method == Method::HEAD)
                        .then(|| state.registry.resolve(&Method::GET, matched.as_str()))
                        .flatten()
                })
        })
        .and_then(|alias| state.registry.get(alias));
    let Some(spec) = spec else {
        return fallback(parts.method, parts.uri).await;
    };

    let mut ctx = RequestContext::new(spec.alias.clone());
    let mut uploads = Uploads::default();
    let outcome = run(&state, spec, &mut ctx, &mut parts, body, &mut uploads).await;
    respond::respond(&ctx, outcome, uploads)
}

async fn run(
    state: &PipelineState,
    spec: &RouteSpec,
    ctx: &mut RequestContext,
    parts: &mut Parts,
    body: Body,
    uploads: &mut Uploads,
) -> Result<Value, ApiError> {
    let auth = &state.config.auth;
    ctx.auth = authorize(
        state.resolver.as_ref(),
        AccessRule {
            requires_auth: spec.options.requires_auth,
            permissions: &spec.options.permissions,
        },
        header(&parts.headers, &auth.credential_header).as_deref(),
        header(&parts.headers, &auth.impersonation_header).as_deref(),
        Utc::now(),
    )
    .await?;

    let path = RawPathParams::from_request_parts(parts, state)
        .await
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?
        .iter()
        .map(|(key, value)| (key.to_string(), RawValue::Single(value.to_string())))
        .collect();
    let query = binding::parse_query(parts.uri.query());
    let body = if is_read_method(&parts.method) {
        Default::default()
    } else {
        intake::read_body(parts, body, spec, &state.config.upload, uploads).await?
    };

    let sources = Sources { path, body, query };
    ctx.params = binding::bind(spec, &parts.method, &sources, uploads)?;

    let handler = spec
        .handler
        .as_ref()
        .ok_or_else(|| ApiError::internal(format!("{} has no handler", spec.alias)))?;
    invoke(handler.as_ref(), ctx.clone()).await
}

/// A header's text; bytes outside visible ASCII are decoded lossily so the
/// value still reaches authorization and fails there
fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<Cow<'a, str>> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
}

/// Run a handler, turning a panic into an internal failure
async fn invoke(handler: &dyn RouteHandler, ctx: RequestContext) -> Result<Value, ApiError> {
    match AssertUnwindSafe(handler.handle(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ApiError::internal(format!(
            "handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Catch-all for requests no route claimed
///
/// Write verbs get a 404 envelope; reads get a bare 404.
pub async fn fallback(method: Method, uri: Uri) -> Response {
    if is_read_method(&method) || method == Method::OPTIONS {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    }
    ApiError::from(NotFoundError::Route {
        method: method.to_string(),
        path: uri.path().to_string(),
    })
    .into_response()
}
