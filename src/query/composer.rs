//! Filter composition over an entity's base select
//!
//! [`EntityQuery`] is an owned accumulator: every clause consumes the query
//! and returns the extended one, so clauses can be applied conditionally
//! without aliasing. A clause given no values leaves the query untouched.
//!
//! # Example
//! ```rust,ignore
//! let query = EntityQuery::<Document>::create_select()
//!     .value_clause("status", params.json_list("status"))
//!     .wildcard_clause("title", params.str("search"))
//!     .relation_set_clause(mode, "tag", "name", params.json_list("tag"))?
//!     .apply_pagination(&params.pagination());
//! ```

use serde_json::Value;
use std::marker::PhantomData;
use std::str::FromStr;

use super::select::{ColumnRef, Having, Predicate, RelationDef, SelectQuery, escape_like};
use crate::core::error::ApiError;
use crate::core::query::Pagination;

/// Static description of an entity's table and relations
pub trait EntitySchema: Send + Sync + 'static {
    /// Backing table
    const TABLE: &'static str;

    /// Alias of the base table in composed queries, also the entity type name
    const ALIAS: &'static str;

    const PRIMARY_KEY: &'static str = "id";

    /// Relations available to relation clauses and eager hydration
    fn relations() -> Vec<RelationDef> {
        Vec::new()
    }
}

/// Relation set operation of [`EntityQuery::relation_set_clause`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationSetOp {
    /// Match entities related to any requested value
    Union,
    /// Match entities related to every requested value
    Intersection,
}

impl FromStr for RelationSetOp {
    type Err = ApiError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.to_ascii_uppercase().as_str() {
            "UNION" => Ok(RelationSetOp::Union),
            "INTERSECTION" => Ok(RelationSetOp::Intersection),
            _ => Err(ApiError::bad_request(format!(
                "Unknown relation set operation '{}'",
                tag
            ))),
        }
    }
}

/// Anything a filter clause accepts as its value set
///
/// `None` and empty collections both mean "no filter".
pub trait FilterValues {
    fn into_filter_values(self) -> Vec<Value>;
}

impl<T: Into<Value>> FilterValues for Vec<T> {
    fn into_filter_values(self) -> Vec<Value> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Value> + Clone> FilterValues for &[T] {
    fn into_filter_values(self) -> Vec<Value> {
        self.iter().cloned().map(Into::into).collect()
    }
}

impl<T: FilterValues> FilterValues for Option<T> {
    fn into_filter_values(self) -> Vec<Value> {
        self.map(FilterValues::into_filter_values).unwrap_or_default()
    }
}

/// An entity read under construction
pub struct EntityQuery<E> {
    select: SelectQuery,
    _entity: PhantomData<fn() -> E>,
}

impl<E> std::fmt::Debug for EntityQuery<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityQuery").field(&self.select).finish()
    }
}

impl<E> Clone for EntityQuery<E> {
    fn clone(&self) -> Self {
        Self {
            select: self.select.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: EntitySchema> EntityQuery<E> {
    /// The base select: every row of the entity, with its relations hydrated
    pub fn create_select() -> Self {
        let mut select = SelectQuery::new(E::TABLE, E::ALIAS, E::PRIMARY_KEY);
        select.hydrate = E::relations();
        Self {
            select,
            _entity: PhantomData,
        }
    }

    pub fn select(&self) -> &SelectQuery {
        &self.select
    }

    pub fn into_select(self) -> SelectQuery {
        self.select
    }

    /// `key` is a base column, or `alias.column` for a joined one
    fn column(key: &str) -> ColumnRef {
        match key.split_once('.') {
            Some((alias, column)) => ColumnRef::new(alias, column),
            None => ColumnRef::new(E::ALIAS, key),
        }
    }

    /// Keep rows whose `key` is one of `values`
    pub fn value_clause(mut self, key: &str, values: impl FilterValues) -> Self {
        let values = values.into_filter_values();
        if !values.is_empty() {
            self.select.predicates.push(Predicate::In {
                column: Self::column(key),
                values,
            });
        }
        self
    }

    /// Drop rows whose `key` is one of `values`
    pub fn exclusion_clause(mut self, key: &str, values: impl FilterValues) -> Self {
        let values = values.into_filter_values();
        if !values.is_empty() {
            self.select.predicates.push(Predicate::NotIn {
                column: Self::column(key),
                values,
            });
        }
        self
    }

    /// Keep rows whose `key` contains `substring`, ignoring case
    pub fn wildcard_clause(mut self, key: &str, substring: Option<&str>) -> Self {
        if let Some(substring) = substring.filter(|s| !s.is_empty()) {
            self.select.predicates.push(Predicate::Like {
                column: Self::column(key),
                pattern: format!("%{}%", escape_like(substring)),
            });
        }
        self
    }

    fn join_relation(&mut self, name: &str) -> Result<(), ApiError> {
        if self.select.has_join(name) {
            return Ok(());
        }
        let relation = E::relations()
            .into_iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| {
                ApiError::internal(format!("{} has no relation named '{}'", E::ALIAS, name))
            })?;
        let joins = relation.joins(E::ALIAS, E::PRIMARY_KEY);
        self.select.joins.extend(joins);
        Ok(())
    }

    /// Keep rows related through `own_key` to a row whose `related_key` is
    /// one of `values`
    pub fn relation_clause(
        mut self,
        own_key: &str,
        related_key: &str,
        values: impl FilterValues,
    ) -> Result<Self, ApiError> {
        let values = values.into_filter_values();
        if values.is_empty() {
            return Ok(self);
        }
        self.join_relation(own_key)?;
        self.select.predicates.push(Predicate::In {
            column: ColumnRef::new(own_key, related_key),
            values,
        });
        Ok(self)
    }

    /// Relation filter with set semantics over the requested values
    ///
    /// With [`RelationSetOp::Intersection`] the rows are grouped by primary
    /// key and only those related to every distinct requested value remain.
    pub fn relation_set_clause(
        self,
        op: RelationSetOp,
        own_key: &str,
        related_key: &str,
        values: impl FilterValues,
    ) -> Result<Self, ApiError> {
        let values = values.into_filter_values();
        let mut distinct: Vec<Value> = Vec::with_capacity(values.len());
        for value in values {
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        let count = distinct.len();

        let mut query = self.relation_clause(own_key, related_key, distinct)?;
        if op == RelationSetOp::Intersection && count > 0 {
            query.select.group_by_primary = true;
            query.select.having.push(Having {
                column: ColumnRef::new(own_key, related_key),
                count,
            });
        }
        Ok(query)
    }

    /// Apply skip, limit and ordering; ordering columns are base columns
    pub fn apply_pagination(mut self, pagination: &Pagination) -> Self {
        self.select.skip = pagination.skip;
        self.select.take = pagination.limit;
        self.select.order = pagination
            .order
            .iter()
            .map(|(column, direction)| (Self::column(column), *direction))
            .collect();
        self
    }

    /// Restrict to the given primary keys
    pub fn with_ids(self, ids: impl FilterValues) -> Self {
        self.value_clause(E::PRIMARY_KEY, ids)
    }
}
