//! Credential resolution and request authorization
//!
//! A request may carry a bearer credential and an impersonation header. The
//! credential is looked up through a [`CredentialResolver`] and checked for
//! expiry and for the permissions the route declares. The impersonation header
//! swaps the acting subject, provided the credential carries
//! `user.impersonate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use uuid::Uuid;

use super::error::{ApiError, AuthenticationError, AuthorizationError, NotFoundError};
use super::permission::PermissionSet;

/// Permission required to act as another subject
pub const IMPERSONATE_PERMISSION: &str = "user.impersonate";

const BEARER_SCHEME: &str = "Bearer";

static TOKEN_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\-._~+/]+=*$").expect("token pattern is valid")
});

/// A resolved API credential
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: Uuid,
    /// Subject the credential was issued to
    pub subject_id: Uuid,
    pub permissions: PermissionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// The party a request acts on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
}

/// Lookup of credentials and subjects
///
/// Implemented by the application over its store. Both lookups return
/// `Ok(None)` when nothing matches; `Err` is reserved for store failures.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Find the credential identified by a bearer token
    async fn resolve_credential(&self, token: &str) -> Result<Option<Credential>, ApiError>;

    /// Find a subject by id
    async fn resolve_subject(&self, id: &Uuid) -> Result<Option<Subject>, ApiError>;
}

/// Resolver that knows no credentials; every protected route answers 401
pub struct NoCredentials;

#[async_trait]
impl CredentialResolver for NoCredentials {
    async fn resolve_credential(&self, _token: &str) -> Result<Option<Credential>, ApiError> {
        Ok(None)
    }

    async fn resolve_subject(&self, _id: &Uuid) -> Result<Option<Subject>, ApiError> {
        Ok(None)
    }
}

/// Who is making a request, as established by the authorization step
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthContext {
    pub credential: Option<Credential>,
    /// Present only when impersonation was requested and allowed
    pub impersonated: Option<Subject>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    /// The acting subject: the impersonated one if any, else the credential's
    pub fn subject_id(&self) -> Option<Uuid> {
        self.impersonated
            .as_ref()
            .map(|s| s.id)
            .or_else(|| self.credential.as_ref().map(|c| c.subject_id))
    }

    /// Permission check against the credential; anonymous requests hold none
    pub fn has_permission(&self, name: &str) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|c| c.permissions.has_permission(name))
    }
}

/// What a route demands of the caller
#[derive(Debug, Clone, Copy)]
pub struct AccessRule<'a> {
    pub requires_auth: bool,
    pub permissions: &'a [String],
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn parse_bearer(header: &str) -> Result<&str, AuthenticationError> {
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthenticationError::Malformed)?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(AuthenticationError::Malformed);
    }
    let token = token.trim();
    if !TOKEN_SYNTAX.is_match(token) {
        return Err(AuthenticationError::Malformed);
    }
    Ok(token)
}

/// Establish the [`AuthContext`] of a request
///
/// A credential that is sent is always resolved, even on public routes, so a
/// bad credential never silently degrades to anonymous access.
pub async fn authorize(
    resolver: &dyn CredentialResolver,
    rule: AccessRule<'_>,
    credential_header: Option<&str>,
    impersonation_header: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthContext, ApiError> {
    let credential = match credential_header {
        None if rule.requires_auth => return Err(AuthenticationError::Missing.into()),
        None => None,
        Some(header) => {
            let token = parse_bearer(header)?;
            let credential = resolver
                .resolve_credential(token)
                .await?
                .ok_or(AuthenticationError::Unknown)?;
            if credential.is_expired_at(now) {
                return Err(AuthenticationError::Expired.into());
            }
            Some(credential)
        }
    };

    let mut context = AuthContext {
        credential,
        impersonated: None,
    };

    if let Some(missing) = rule
        .permissions
        .iter()
        .find(|p| !context.has_permission(p))
    {
        return Err(AuthorizationError::MissingPermission {
            permission: missing.clone(),
        }
        .into());
    }

    if let Some(target) = impersonation_header.map(str::trim).filter(|s| !s.is_empty()) {
        if !context.has_permission(IMPERSONATE_PERMISSION) {
            return Err(AuthorizationError::ImpersonationDenied.into());
        }
        let subject_not_found = || {
            ApiError::from(NotFoundError::Subject {
                id: target.to_string(),
            })
        };
        let id = Uuid::parse_str(target).map_err(|_| subject_not_found())?;
        let subject = resolver
            .resolve_subject(&id)
            .await?
            .ok_or_else(subject_not_found)?;
        tracing::debug!(subject = %subject.id, "request impersonates subject");
        context.impersonated = Some(subject);
    }

    Ok(context)
}
