//! In-memory implementation of QueryExecutor for testing and development
//!
//! Evaluates a [`SelectQuery`] directly over rows held in memory, with the
//! same semantics the SQL backend gets from the database: LEFT JOINs, NULL
//! never matching `IN`, `NOT IN` or `LIKE`, grouping by primary key with
//! `COUNT(DISTINCT ..)` filters, and each base row returned once. Values are
//! compared by their text form, as the SQL backend compares `column::text`.

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::core::query::OrderDirection;
use crate::query::{ColumnRef, Predicate, QueryExecutor, RelationDef, Row, SelectQuery, StoreError};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    unique: Vec<String>,
}

#[derive(Debug, Default)]
struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    fn table(&self, name: &str) -> Result<&Table, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }
}

/// In-memory relational store
///
/// Tables must be declared before use; writes to an undeclared table fail
/// with [`StoreError::UnknownTable`]. Uses RwLock for thread-safe access.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table; `unique` columns reject duplicate non-null values
    pub fn with_table(self, name: &str, unique: &[&str]) -> Self {
        if let Ok(mut tables) = self.inner.write() {
            tables.tables.insert(
                name.to_string(),
                Table {
                    rows: Vec::new(),
                    unique: unique.iter().map(|c| c.to_string()).collect(),
                },
            );
        }
        self
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        let tables = self.read()?;
        Ok(tables.table(table)?.rows.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::Backend(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::Backend(format!("Failed to acquire write lock: {}", e)))
    }
}

#[async_trait]
impl QueryExecutor for InMemoryStore {
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        let tables = self.read()?;
        let mut rows = matching_rows(&tables, query)?;

        if !query.order.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &query.order));
        }

        let skip = query.skip.unwrap_or(0) as usize;
        let take = query.take.map(|t| t as usize).unwrap_or(usize::MAX);

        rows.into_iter()
            .skip(skip)
            .take(take)
            .map(|row| hydrate(&tables, query, row))
            .collect()
    }

    async fn count(&self, query: &SelectQuery) -> Result<u64, StoreError> {
        let tables = self.read()?;
        Ok(matching_rows(&tables, query)?.len() as u64)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let target = tables.table_mut(table)?;
        check_unique(table, target, &row, None)?;
        target.rows.push(row);
        Ok(1)
    }

    async fn update(
        &self,
        table: &str,
        key: &str,
        id: &Value,
        changes: Row,
    ) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let target = tables.table_mut(table)?;
        let id = text(id);
        let positions: Vec<usize> = target
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.get(key).map(text) == Some(id.clone()))
            .map(|(index, _)| index)
            .collect();

        // all matching rows change together or not at all
        let mut staged = Table {
            rows: target.rows.clone(),
            unique: target.unique.clone(),
        };
        for &index in &positions {
            staged.rows[index].extend(changes.clone());
        }
        for &index in &positions {
            check_unique(table, &staged, &staged.rows[index], Some(index))?;
        }
        target.rows = staged.rows;
        Ok(positions.len() as u64)
    }

    async fn delete(&self, table: &str, key: &str, id: &Value) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let target = tables.table_mut(table)?;
        let id = text(id);
        let before = target.rows.len();
        target
            .rows
            .retain(|row| row.get(key).map(text) != Some(id.clone()));
        Ok((before - target.rows.len()) as u64)
    }
}

fn check_unique(
    table: &str,
    target: &Table,
    row: &Row,
    skip_index: Option<usize>,
) -> Result<(), StoreError> {
    for column in &target.unique {
        let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
            continue;
        };
        let value = text(value);
        let taken = target.rows.iter().enumerate().any(|(index, existing)| {
            Some(index) != skip_index && existing.get(column).map(text) == Some(value.clone())
        });
        if taken {
            return Err(StoreError::UniqueViolation {
                table: table.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// Text form used for every comparison
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_null_text(value: Option<&Value>) -> Option<String> {
    value.filter(|v| !v.is_null()).map(text)
}

type Binding<'a> = HashMap<&'a str, Option<&'a Row>>;

fn lookup<'a>(binding: &Binding<'a>, column: &ColumnRef) -> Result<Option<&'a Value>, StoreError> {
    match binding.get(column.alias.as_str()) {
        None => Err(StoreError::UnknownAlias(column.alias.clone())),
        Some(None) => Ok(None),
        Some(Some(row)) => {
            let row: &'a Row = row;
            Ok(row.get(&column.column))
        }
    }
}

/// Base rows that satisfy the joins, predicates and HAVING filters, once each
fn matching_rows(tables: &Tables, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
    let base = tables.table(&query.table)?;
    let mut bindings: Vec<Binding<'_>> = base
        .rows
        .iter()
        .map(|row| HashMap::from([(query.alias.as_str(), Some(row))]))
        .collect();

    for join in &query.joins {
        let joined = tables.table(&join.table)?;
        let mut expanded = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let left = non_null_text(lookup(&binding, &join.left)?);
            let matches: Vec<&Row> = match &left {
                Some(left) => joined
                    .rows
                    .iter()
                    .filter(|row| non_null_text(row.get(&join.right_column)).as_ref() == Some(left))
                    .collect(),
                None => Vec::new(),
            };
            if matches.is_empty() {
                let mut next = binding.clone();
                next.insert(join.alias.as_str(), None);
                expanded.push(next);
            } else {
                for row in matches {
                    let mut next = binding.clone();
                    next.insert(join.alias.as_str(), Some(row));
                    expanded.push(next);
                }
            }
        }
        bindings = expanded;
    }

    let mut kept = Vec::with_capacity(bindings.len());
    for binding in bindings {
        if satisfies_all(&binding, &query.predicates)? {
            kept.push(binding);
        }
    }

    let primary = query.primary_column();
    let mut groups: IndexMap<String, Vec<Binding<'_>>> = IndexMap::new();
    for binding in kept {
        let key = lookup(&binding, &primary)?.map(text).unwrap_or_default();
        groups.entry(key).or_default().push(binding);
    }

    let mut rows = Vec::with_capacity(groups.len());
    for members in groups.values() {
        if query.group_by_primary && !satisfies_having(members, query)? {
            continue;
        }
        if let Some(Some(row)) = members.first().and_then(|b| b.get(query.alias.as_str())) {
            rows.push((*row).clone());
        }
    }
    Ok(rows)
}

fn satisfies_all(binding: &Binding<'_>, predicates: &[Predicate]) -> Result<bool, StoreError> {
    for predicate in predicates {
        let value = non_null_text(lookup(binding, predicate.column())?);
        let holds = match (predicate, value) {
            (_, None) => false,
            (Predicate::In { values, .. }, Some(value)) => values.iter().any(|v| text(v) == value),
            (Predicate::NotIn { values, .. }, Some(value)) => {
                values.iter().all(|v| text(v) != value)
            }
            (Predicate::Like { pattern, .. }, Some(value)) => like_regex(pattern)?.is_match(&value),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn satisfies_having(members: &[Binding<'_>], query: &SelectQuery) -> Result<bool, StoreError> {
    for having in &query.having {
        let mut distinct = HashSet::new();
        for binding in members {
            if let Some(value) = non_null_text(lookup(binding, &having.column)?) {
                distinct.insert(value);
            }
        }
        if distinct.len() != having.count {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Translate a LIKE pattern to an anchored, case-insensitive regex
fn like_regex(pattern: &str) -> Result<Regex, StoreError> {
    let mut source = String::from("(?is)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    source.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| StoreError::Backend(e.to_string()))
}

/// NULL sorts after every value in ascending order, as in PostgreSQL
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => text(x).cmp(&text(y)),
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[(ColumnRef, OrderDirection)]) -> Ordering {
    for (column, direction) in order {
        let ordering = compare_values(a.get(&column.column), b.get(&column.column));
        let ordering = match direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn rows_where<'a>(table: &'a Table, column: &str, value: &Option<String>) -> Vec<&'a Row> {
    match value {
        Some(value) => table
            .rows
            .iter()
            .filter(|row| non_null_text(row.get(column)).as_ref() == Some(value))
            .collect(),
        None => Vec::new(),
    }
}

/// Attach every eagerly loaded relation to a base row
fn hydrate(tables: &Tables, query: &SelectQuery, mut row: Row) -> Result<Row, StoreError> {
    for relation in &query.hydrate {
        let related = match relation {
            RelationDef::Direct {
                name: _,
                table,
                local_column,
                foreign_column,
                many,
            } => {
                let local = non_null_text(row.get(*local_column));
                let matches = rows_where(tables.table(table)?, foreign_column, &local);
                if *many {
                    Value::Array(matches.into_iter().cloned().map(Value::Object).collect())
                } else {
                    matches
                        .first()
                        .map(|r| Value::Object((*r).clone()))
                        .unwrap_or(Value::Null)
                }
            }
            RelationDef::Junction {
                name: _,
                junction_table,
                local_key,
                foreign_key,
                target_table,
                target_key,
            } => {
                let id = non_null_text(row.get(&query.primary_key));
                let links = rows_where(tables.table(junction_table)?, local_key, &id);
                let targets = tables.table(target_table)?;
                let mut related = Vec::new();
                for link in links {
                    let foreign = non_null_text(link.get(*foreign_key));
                    related.extend(
                        rows_where(targets, target_key, &foreign)
                            .into_iter()
                            .cloned()
                            .map(Value::Object),
                    );
                }
                Value::Array(related)
            }
        };
        row.insert(relation.name().to_string(), related);
    }
    Ok(row)
}
