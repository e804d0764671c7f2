//! Request body intake: multipart files and fields, JSON, url-encoded forms
//!
//! Uploaded files are streamed into temporary files owned by [`Uploads`].
//! The responder releases them once the envelope is built; should a request
//! never reach it, dropping [`Uploads`] still removes the files.

use axum::body::{Body, to_bytes};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;
use axum::http::request::Parts;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;

use crate::config::UploadConfig;
use crate::core::error::{ApiError, ValidationError};
use crate::core::validation::{RawValue, UploadedFile};
use crate::server::registry::RouteSpec;

/// Ceiling for JSON and url-encoded bodies
pub const FORM_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Raw body values by field name, in arrival order
pub type BodyFields = IndexMap<String, RawValue>;

/// Files staged for one request
#[derive(Debug, Default)]
pub struct Uploads {
    files: Vec<UploadedFile>,
    staged: Vec<TempPath>,
}

impl Uploads {
    /// Files received on `field`, in arrival order
    pub fn files_for(&self, field: &str) -> Vec<&UploadedFile> {
        self.files.iter().filter(|f| f.field == field).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Remove every staged file in the background
    ///
    /// Failures are logged and otherwise ignored.
    pub fn release(self) {
        if self.staged.is_empty() {
            return;
        }
        let staged = self.staged;
        tokio::task::spawn_blocking(move || {
            for path in staged {
                let shown = path.display().to_string();
                if let Err(err) = path.close() {
                    tracing::warn!(path = %shown, error = %err, "failed to remove uploaded file");
                }
            }
        });
    }
}

fn upload_error(field: &str, message: impl Into<String>) -> ApiError {
    ValidationError::Upload {
        field: field.to_string(),
        message: message.into(),
    }
    .into()
}

fn body_error(message: impl Into<String>) -> ApiError {
    ValidationError::Body {
        message: message.into(),
    }
    .into()
}

fn push_field(fields: &mut BodyFields, name: String, value: String) {
    match fields.shift_remove(&name) {
        Some(existing) => {
            fields.insert(name, existing.push(value));
        }
        None => {
            fields.insert(name, RawValue::Single(value));
        }
    }
}

/// Read the body of a write request into raw fields, staging any files
pub async fn read_body(
    parts: &Parts,
    body: Body,
    spec: &RouteSpec,
    config: &UploadConfig,
    uploads: &mut Uploads,
) -> Result<BodyFields, ApiError> {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut request = Request::new(body);
        *request.headers_mut() = parts.headers.clone();
        *request.extensions_mut() = parts.extensions.clone();
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| body_error(rejection.body_text()))?;
        return read_multipart(multipart, spec, config, uploads).await;
    }

    let bytes = to_bytes(body, FORM_BODY_LIMIT)
        .await
        .map_err(|err| body_error(err.to_string()))?;
    if bytes.is_empty() {
        return Ok(BodyFields::new());
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let mut fields = BodyFields::new();
        for (key, value) in form_urlencoded::parse(&bytes) {
            push_field(&mut fields, normalize_key(&key), value.into_owned());
        }
        return Ok(fields);
    }

    let value: Value =
        serde_json::from_slice(&bytes).map_err(|err| body_error(err.to_string()))?;
    json_fields(value)
}

/// Flatten a JSON object body into raw fields
///
/// Scalars keep their text form, arrays become multiple values, nested
/// objects are passed as JSON text and `null` counts as absent.
pub fn json_fields(value: Value) -> Result<BodyFields, ApiError> {
    let Value::Object(object) = value else {
        return Err(body_error("expected a JSON object"));
    };
    let mut fields = BodyFields::new();
    for (key, value) in object {
        let raw = match value {
            Value::Null => continue,
            Value::Array(items) => RawValue::Many(
                items
                    .into_iter()
                    .filter(|item| !item.is_null())
                    .map(scalar_text)
                    .collect(),
            ),
            other => RawValue::Single(scalar_text(other)),
        };
        fields.insert(key, raw);
    }
    Ok(fields)
}

fn scalar_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// `tag[]` and `tag` name the same parameter
pub fn normalize_key(key: &str) -> String {
    key.strip_suffix("[]").unwrap_or(key).to_string()
}

async fn read_multipart(
    mut multipart: Multipart,
    spec: &RouteSpec,
    config: &UploadConfig,
    uploads: &mut Uploads,
) -> Result<BodyFields, ApiError> {
    let mut fields = BodyFields::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| body_error(err.body_text()))?
    {
        let name = normalize_key(field.name().unwrap_or_default());

        if field.file_name().is_none() {
            let text = field.text().await.map_err(|err| body_error(err.body_text()))?;
            push_field(&mut fields, name, text);
            continue;
        }

        let upload = spec
            .upload(&name)
            .ok_or_else(|| upload_error(&name, "field does not accept files"))?;
        let count = counts.entry(name.clone()).or_default();
        *count += 1;
        if *count > upload.max_count {
            return Err(upload_error(
                &name,
                format!("at most {} file(s) accepted", upload.max_count),
            ));
        }

        let (file, temp_path) = NamedTempFile::new_in(config.staging_dir())
            .map_err(|err| ApiError::internal(format!("staging upload: {}", err)))?
            .into_parts();
        let path = temp_path.to_path_buf();
        uploads.staged.push(temp_path);

        let mut file = tokio::fs::File::from_std(file);
        let mut size: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| body_error(err.body_text()))?
        {
            size += chunk.len() as u64;
            if size > config.max_file_size {
                return Err(upload_error(
                    &name,
                    format!("file exceeds {} bytes", config.max_file_size),
                ));
            }
            file.write_all(&chunk)
                .await
                .map_err(|err| ApiError::internal(format!("writing upload: {}", err)))?;
        }
        file.flush()
            .await
            .map_err(|err| ApiError::internal(format!("writing upload: {}", err)))?;

        uploads.files.push(UploadedFile {
            field: name,
            file_name: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
            size,
            path,
        });
    }

    Ok(fields)
}
