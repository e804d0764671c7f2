//! Parameter binding: raw request values → validated [`Params`]

use axum::http::Method;
use indexmap::IndexMap;
use std::collections::BTreeMap;

use super::intake::{BodyFields, Uploads, normalize_key};
use crate::core::error::{ApiError, ValidationError};
use crate::core::validation::{ParamType, ParamValue, Params, RawValue, parse};
use crate::server::registry::RouteSpec;

/// Raw values found in one request
///
/// A name present in several sources binds from the first of: path, body,
/// query string.
#[derive(Debug, Default)]
pub struct Sources {
    pub path: IndexMap<String, RawValue>,
    pub body: BodyFields,
    pub query: IndexMap<String, RawValue>,
}

impl Sources {
    pub fn lookup(&self, name: &str) -> Option<&RawValue> {
        self.path
            .get(name)
            .or_else(|| self.body.get(name))
            .or_else(|| self.query.get(name))
    }
}

/// Split a query string into raw values, repeated keys accumulating
pub fn parse_query(query: Option<&str>) -> IndexMap<String, RawValue> {
    let mut values: IndexMap<String, RawValue> = IndexMap::new();
    let Some(query) = query else {
        return values;
    };
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let key = normalize_key(&key);
        let value = value.into_owned();
        let raw = match values.shift_remove(&key) {
            Some(existing) => existing.push(value),
            None => RawValue::Single(value),
        };
        values.insert(key, raw);
    }
    values
}

/// Bind every declared parameter, collecting all failures
///
/// The handler only runs on `Ok`; an `Err` names each offending field.
pub fn bind(
    spec: &RouteSpec,
    method: &Method,
    sources: &Sources,
    uploads: &Uploads,
) -> Result<Params, ApiError> {
    let mut params = Params::new();
    let mut failures: BTreeMap<String, String> = BTreeMap::new();

    for (name, param) in &spec.parameters {
        if let ParamType::File { max_count } = param.ty {
            let files = uploads.files_for(name);
            match files.as_slice() {
                [] => {
                    if param.is_required(method) {
                        failures.insert(name.clone(), "is required".to_string());
                    }
                }
                [single] if max_count <= 1 && !param.array_allowed => {
                    params.insert(name.clone(), ParamValue::File((*single).clone()));
                }
                many => {
                    let items = many
                        .iter()
                        .map(|file| ParamValue::File((*file).clone()))
                        .collect();
                    params.insert(name.clone(), ParamValue::List(items));
                }
            }
            continue;
        }

        let Some(raw) = sources.lookup(name) else {
            if param.is_required(method) {
                failures.insert(name.clone(), "is required".to_string());
            }
            continue;
        };

        let raw = match raw {
            RawValue::Many(items) if !param.array_allowed => match items.as_slice() {
                [only] => RawValue::Single(only.clone()),
                _ => {
                    failures.insert(
                        name.clone(),
                        "does not accept multiple values".to_string(),
                    );
                    continue;
                }
            },
            other => other.clone(),
        };

        match parse(&param.ty, &raw) {
            Ok(value) => params.insert(name.clone(), value),
            Err(failure) => {
                failures.insert(name.clone(), failure.to_string());
            }
        }
    }

    if failures.is_empty() {
        Ok(params)
    } else {
        Err(ValidationError::Fields(failures).into())
    }
}
