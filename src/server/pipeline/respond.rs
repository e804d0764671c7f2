//! The terminal responder: every routed request ends here

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::intake::Uploads;
use crate::core::error::ApiError;
use crate::server::context::RequestContext;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const SUCCESS_MESSAGE: &str = "OK";

/// The wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub content: Value,
    pub time_started: DateTime<Utc>,
    pub time_completed: DateTime<Utc>,
}

impl Envelope {
    pub fn success(content: Value, time_started: DateTime<Utc>) -> Self {
        Self {
            success: true,
            message: SUCCESS_MESSAGE.to_string(),
            content,
            time_started,
            time_completed: Utc::now(),
        }
    }

    /// Client-safe envelope for an error; 500-class detail is scrubbed
    pub fn failure(error: &ApiError, time_started: DateTime<Utc>) -> Self {
        Self {
            success: false,
            message: error.client_message(),
            content: error.client_content(),
            time_started,
            time_completed: Utc::now(),
        }
    }
}

/// Emit the envelope for `outcome`, then release the request's uploads
pub fn respond(ctx: &RequestContext, outcome: Result<Value, ApiError>, uploads: Uploads) -> Response {
    let (status, envelope) = match &outcome {
        Ok(content) => (StatusCode::OK, Envelope::success(content.clone(), ctx.started_at)),
        Err(error) => {
            if error.is_internal() {
                tracing::error!(
                    request_id = %ctx.request_id,
                    alias = %ctx.alias,
                    error = %error,
                    "request failed"
                );
            }
            (error.status_code(), Envelope::failure(error, ctx.started_at))
        }
    };

    let elapsed_ms = (envelope.time_completed - envelope.time_started).num_milliseconds();
    tracing::info!(
        request_id = %ctx.request_id,
        alias = %ctx.alias,
        status = status.as_u16(),
        elapsed_ms,
        "request completed"
    );

    let mut response = (status, Json(envelope)).into_response();
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    uploads.release();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alias::Alias;
    use crate::core::error::GENERIC_INTERNAL_MESSAGE;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new(Alias::new("document", "get"))
    }

    #[tokio::test]
    async fn test_success_sets_request_id() {
        let ctx = ctx();
        let response = respond(&ctx, Ok(json!({"id": 1})), Uploads::default());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            &ctx.request_id.to_string()
        );
    }

    #[test]
    fn test_internal_failure_is_scrubbed() {
        let err = ApiError::internal("connection refused at 10.0.0.3:5432");
        let envelope = Envelope::failure(&err, Utc::now());
        assert!(!envelope.success);
        assert_eq!(envelope.message, GENERIC_INTERNAL_MESSAGE);
        assert_eq!(envelope.content, json!({}));
    }

    #[test]
    fn test_client_failure_keeps_content() {
        let err = ApiError::not_found("document", "d1");
        let envelope = Envelope::failure(&err, Utc::now());
        assert_eq!(envelope.content["id"], "d1");
        assert!(envelope.message.contains("d1"));
    }

    #[test]
    fn test_envelope_timestamps_are_rfc3339() {
        let envelope = Envelope::success(json!({}), Utc::now());
        let wire = serde_json::to_value(&envelope).unwrap();
        let started = wire["time_started"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(started).is_ok());
    }
}
