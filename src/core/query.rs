//! Pagination and ordering

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort direction of one ordering column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => f.write_str("ASC"),
            OrderDirection::Desc => f.write_str("DESC"),
        }
    }
}

/// Column → direction map, in the order the columns were requested
pub type OrderMap = IndexMap<String, OrderDirection>;

/// Skip / limit / order for a collection read
///
/// The bounds (`skip >= 0`, `limit` in `[1, max]`, order columns in an
/// allow-list) are enforced when the request parameters are validated; this
/// type only carries the result.
///
/// # Example
/// ```rust,ignore
/// // GET /documents?skip=20&limit=10&order=-created_at&order=title
/// let pagination = ctx.params.pagination();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub order: OrderMap,
}

impl Pagination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order.insert(column.into(), direction);
        self
    }

    /// True when nothing narrows or reorders the result
    pub fn is_empty(&self) -> bool {
        self.skip.is_none() && self.limit.is_none() && self.order.is_empty()
    }
}
