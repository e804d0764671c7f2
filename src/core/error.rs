//! Typed error handling for request processing
//!
//! Every request terminates either in a payload or in an [`ApiError`]. The
//! error categories map one-to-one to HTTP status classes:
//!
//! - [`ValidationError`]: per-field parameter failures, aggregated (400)
//! - [`AuthenticationError`]: missing / malformed / expired / unknown credential (401)
//! - [`AuthorizationError`]: insufficient permission or disallowed impersonation (403)
//! - [`NotFoundError`]: absent entity, subject or route (404)
//! - `Conflict`: store-reported uniqueness violation (409)
//! - `BadRequest`: a request the handler cannot act on (400)
//! - `Internal`: anything unanticipated (500)
//!
//! 500-class errors never expose their detail to the client: the message is
//! replaced by a generic phrase and the content is empty. The detail is kept
//! on the value so the responder can log it.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

use crate::query::StoreError;

/// Message sent to clients in place of any 500-class detail
pub const GENERIC_INTERNAL_MESSAGE: &str = "An internal error occurred";

/// The error type returned by pipeline steps, handlers and CRUD primitives
#[derive(Debug)]
pub enum ApiError {
    /// Parameter or body validation failures
    Validation(ValidationError),

    /// Credential could not be established
    Authentication(AuthenticationError),

    /// Credential lacks a capability
    Authorization(AuthorizationError),

    /// Something addressed by the request does not exist
    NotFound(NotFoundError),

    /// The store rejected a write because of a uniqueness constraint
    Conflict { message: String },

    /// A request the handler cannot act on
    BadRequest { message: String },

    /// Unanticipated failure; the message is for logs only
    Internal { message: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(e) => write!(f, "{}", e),
            ApiError::Authentication(e) => write!(f, "{}", e),
            ApiError::Authorization(e) => write!(f, "{}", e),
            ApiError::NotFound(e) => write!(f, "{}", e),
            ApiError::Conflict { message } => write!(f, "Conflict: {}", message),
            ApiError::BadRequest { message } => write!(f, "Bad request: {}", message),
            ApiError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Validation(e) => Some(e),
            ApiError::Authentication(e) => Some(e),
            ApiError::Authorization(e) => Some(e),
            ApiError::NotFound(e) => Some(e),
            _ => None,
        }
    }
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        ApiError::NotFound(NotFoundError::Entity {
            entity_type: entity_type.into(),
            id: id.to_string(),
        })
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(e) => e.error_code(),
            ApiError::Authentication(e) => e.error_code(),
            ApiError::Authorization(e) => e.error_code(),
            ApiError::NotFound(e) => e.error_code(),
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::BadRequest { .. } => "BAD_REQUEST",
            ApiError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// The message that may cross the wire
    pub fn client_message(&self) -> String {
        if self.is_internal() {
            GENERIC_INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }

    /// The structured content that may cross the wire
    pub fn client_content(&self) -> Value {
        match self {
            ApiError::Validation(ValidationError::Fields(fields)) => json!(fields),
            ApiError::Validation(ValidationError::Upload { field, message }) => {
                json!({ field.as_str(): message })
            }
            ApiError::NotFound(NotFoundError::Entity { entity_type, id }) => {
                json!({ "entity_type": entity_type, "id": id })
            }
            _ => json!({}),
        }
    }
}

impl IntoResponse for ApiError {
    /// Envelope for errors raised outside the request pipeline
    fn into_response(self) -> Response {
        let now = chrono::Utc::now();
        let status = self.status_code();
        if self.is_internal() {
            tracing::error!(error = %self, "request failed outside the pipeline");
        }
        let body = json!({
            "success": false,
            "message": self.client_message(),
            "content": self.client_content(),
            "time_started": now.to_rfc3339(),
            "time_completed": now.to_rfc3339(),
        });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to request input
#[derive(Debug)]
pub enum ValidationError {
    /// Per-field failures collected during parameter binding, keyed by field
    Fields(BTreeMap<String, String>),

    /// A multipart upload violated its declaration
    Upload { field: String, message: String },

    /// The request body could not be read as the expected format
    Body { message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Fields(fields) => {
                let names: Vec<&str> = fields.keys().map(|k| k.as_str()).collect();
                write!(f, "Invalid parameters: {}", names.join(", "))
            }
            ValidationError::Upload { field, message } => {
                write!(f, "Invalid upload for field '{}': {}", field, message)
            }
            ValidationError::Body { message } => write!(f, "Invalid request body: {}", message),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::Fields(_) => "VALIDATION_ERROR",
            ValidationError::Upload { .. } => "INVALID_UPLOAD",
            ValidationError::Body { .. } => "INVALID_BODY",
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

// =============================================================================
// Authentication Errors
// =============================================================================

/// Reasons a credential could not be established
///
/// All variants are 401; the message tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The route requires a credential and none was sent
    Missing,
    /// The credential header could not be parsed
    Malformed,
    /// The credential exists but is past its expiry
    Expired,
    /// The credential is well-formed but unknown
    Unknown,
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationError::Missing => write!(f, "An authorization credential is required"),
            AuthenticationError::Malformed => write!(f, "The authorization credential is malformed"),
            AuthenticationError::Expired => write!(f, "The authorization credential has expired"),
            AuthenticationError::Unknown => write!(f, "The authorization credential was not found"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

impl AuthenticationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthenticationError::Missing => "CREDENTIAL_MISSING",
            AuthenticationError::Malformed => "CREDENTIAL_MALFORMED",
            AuthenticationError::Expired => "CREDENTIAL_EXPIRED",
            AuthenticationError::Unknown => "CREDENTIAL_UNKNOWN",
        }
    }
}

impl From<AuthenticationError> for ApiError {
    fn from(err: AuthenticationError) -> Self {
        ApiError::Authentication(err)
    }
}

// =============================================================================
// Authorization Errors
// =============================================================================

/// Reasons an established credential may not perform the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// A permission declared on the route is not granted
    MissingPermission { permission: String },
    /// The impersonation header was sent without the impersonation capability
    ImpersonationDenied,
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorizationError::MissingPermission { permission } => {
                write!(f, "Missing required permission '{}'", permission)
            }
            AuthorizationError::ImpersonationDenied => {
                write!(f, "The credential is not allowed to impersonate")
            }
        }
    }
}

impl std::error::Error for AuthorizationError {}

impl AuthorizationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthorizationError::MissingPermission { .. } => "PERMISSION_DENIED",
            AuthorizationError::ImpersonationDenied => "IMPERSONATION_DENIED",
        }
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(err: AuthorizationError) -> Self {
        ApiError::Authorization(err)
    }
}

// =============================================================================
// Not Found Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    /// An entity addressed by id is absent, or a write touched no row
    Entity { entity_type: String, id: String },
    /// The impersonated subject does not exist
    Subject { id: String },
    /// No route is registered for the method and path
    Route { method: String, path: String },
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundError::Entity { entity_type, id } => {
                write!(f, "{} with id '{}' not found", entity_type, id)
            }
            NotFoundError::Subject { id } => write!(f, "Subject '{}' not found", id),
            NotFoundError::Route { method, path } => {
                write!(f, "No route for {} {}", method, path)
            }
        }
    }
}

impl std::error::Error for NotFoundError {}

impl NotFoundError {
    pub fn error_code(&self) -> &'static str {
        match self {
            NotFoundError::Entity { .. } => "ENTITY_NOT_FOUND",
            NotFoundError::Subject { .. } => "SUBJECT_NOT_FOUND",
            NotFoundError::Route { .. } => "ROUTE_NOT_FOUND",
        }
    }
}

impl From<NotFoundError> for ApiError {
    fn from(err: NotFoundError) -> Self {
        ApiError::NotFound(err)
    }
}

// =============================================================================
// Conversions from foreign errors
// =============================================================================

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { table, column } => ApiError::Conflict {
                message: format!("A {} with this {} already exists", table, column),
            },
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal {
            message: format!("{:#}", err),
        }
    }
}
