//! Per-request state handed to route handlers

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::alias::Alias;
use crate::core::auth::AuthContext;
use crate::core::error::{ApiError, AuthenticationError};
use crate::core::validation::Params;

/// What a handler receives once authorization and binding succeeded
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub alias: Alias,
    pub started_at: DateTime<Utc>,
    /// Validated parameters; omitted optional ones are absent
    pub params: Params,
    pub auth: AuthContext,
}

impl RequestContext {
    pub fn new(alias: Alias) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            alias,
            started_at: Utc::now(),
            params: Params::new(),
            auth: AuthContext::anonymous(),
        }
    }

    /// The acting subject, failing 401 on anonymous requests
    pub fn require_subject(&self) -> Result<Uuid, ApiError> {
        self.auth
            .subject_id()
            .ok_or_else(|| AuthenticationError::Missing.into())
    }
}
