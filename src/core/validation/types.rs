//! Parameter type tags, conditions and parsed values

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use super::password::PasswordHash;
use crate::core::query::{OrderMap, Pagination};

/// A parameter's type tag together with the conditions that apply to it
///
/// Each variant carries only the conditions meaningful for that type, so one
/// registration call covers every type.
#[derive(Debug, Clone)]
pub enum ParamType {
    Boolean,
    Email,
    Password,
    Uuid,
    Date(DateConditions),
    /// Raw value must be one of the listed members
    Enum(Vec<String>),
    Float(FloatConditions),
    Integer(IntegerConditions),
    /// Allow-listed columns, `-column` for descending
    Order(Vec<String>),
    String(StringConditions),
    /// A multipart file field accepting up to `max_count` files
    File { max_count: usize },
}

impl ParamType {
    /// Short tag used in messages
    pub fn tag(&self) -> &'static str {
        match self {
            ParamType::Boolean => "boolean",
            ParamType::Email => "email",
            ParamType::Password => "password",
            ParamType::Uuid => "uuid",
            ParamType::Date(_) => "date",
            ParamType::Enum(_) => "enum",
            ParamType::Float(_) => "float",
            ParamType::Integer(_) => "integer",
            ParamType::Order(_) => "order",
            ParamType::String(_) => "string",
            ParamType::File { .. } => "file",
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ParamType::File { .. })
    }

    pub fn enumeration<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParamType::Enum(members.into_iter().map(Into::into).collect())
    }

    pub fn order<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParamType::Order(columns.into_iter().map(Into::into).collect())
    }

    pub fn integer(min: Option<i64>, max: Option<i64>) -> Self {
        ParamType::Integer(IntegerConditions { min, max })
    }

    pub fn string() -> Self {
        ParamType::String(StringConditions::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DateConditions {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct FloatConditions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Maximum number of digits after the decimal point
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct IntegerConditions {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct StringConditions {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

impl StringConditions {
    pub fn length(min: usize, max: usize) -> Self {
        Self {
            min_length: Some(min),
            max_length: Some(max),
            pattern: None,
        }
    }

    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }
}

/// An unparsed request value, as found in the path, query string or body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Single(String),
    Many(Vec<String>),
}

impl RawValue {
    pub fn is_many(&self) -> bool {
        matches!(self, RawValue::Many(items) if items.len() > 1)
    }

    /// Every fragment, whether one or many were sent
    pub fn fragments(&self) -> Vec<&str> {
        match self {
            RawValue::Single(s) => vec![s.as_str()],
            RawValue::Many(items) => items.iter().map(|s| s.as_str()).collect(),
        }
    }

    /// Append another occurrence of the same key
    pub fn push(self, value: String) -> Self {
        match self {
            RawValue::Single(first) => RawValue::Many(vec![first, value]),
            RawValue::Many(mut items) => {
                items.push(value);
                RawValue::Many(items)
            }
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Single(s) => f.write_str(s),
            RawValue::Many(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// A file received through multipart intake, stored in a temporary file
///
/// The temporary file is removed when the response is emitted; handlers that
/// keep the upload must copy it elsewhere first.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: u64,
    #[serde(skip)]
    pub path: PathBuf,
}

/// A validated parameter value
#[derive(Debug, Clone)]
pub enum ParamValue {
    Bool(bool),
    Text(String),
    Password(PasswordHash),
    Uuid(Uuid),
    Date(DateTime<Utc>),
    Integer(i64),
    Float(f64),
    Order(OrderMap),
    File(UploadedFile),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            ParamValue::Uuid(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// View a scalar as a one-element list, a list as itself
    pub fn items(&self) -> Vec<&ParamValue> {
        match self {
            ParamValue::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// JSON form, suitable as a filter value or a row column
    ///
    /// Passwords and files have no column form and map to `null`.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Bool(b) => json!(b),
            ParamValue::Text(s) => json!(s),
            ParamValue::Uuid(id) => json!(id.to_string()),
            ParamValue::Date(d) => json!(d.to_rfc3339()),
            ParamValue::Integer(n) => json!(n),
            ParamValue::Float(x) => json!(x),
            ParamValue::Order(map) => json!(map),
            ParamValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            ParamValue::Password(_) | ParamValue::File(_) => Value::Null,
        }
    }
}

/// The bound parameters of one request
///
/// Only parameters that were present and valid are bound; an omitted
/// optional parameter is simply absent.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    pub fn uuid(&self, name: &str) -> Option<Uuid> {
        self.get(name).and_then(|v| v.as_uuid())
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.as_i64())
    }

    pub fn password(&self, name: &str) -> Option<&PasswordHash> {
        match self.get(name) {
            Some(ParamValue::Password(hash)) => Some(hash),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name) {
            Some(ParamValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn files(&self, name: &str) -> Vec<&UploadedFile> {
        self.get(name)
            .map(|v| {
                v.items()
                    .into_iter()
                    .filter_map(|item| match item {
                        ParamValue::File(file) => Some(file),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// JSON values of a scalar-or-array parameter; `None` when absent
    pub fn json_list(&self, name: &str) -> Option<Vec<Value>> {
        self.get(name)
            .map(|v| v.items().into_iter().map(|item| item.to_json()).collect())
    }

    /// Skip / limit / order as bound by [`crate::server::RouteRegistry::register_pagination`]
    pub fn pagination(&self) -> Pagination {
        Pagination {
            skip: self.integer("skip").and_then(|n| u64::try_from(n).ok()),
            limit: self.integer("limit").and_then(|n| u64::try_from(n).ok()),
            order: match self.get("order") {
                Some(ParamValue::Order(map)) => map.clone(),
                _ => OrderMap::new(),
            },
        }
    }
}
