//! PostgreSQL storage backend using sqlx.
//!
//! Renders a composed [`SelectQuery`] to SQL with `sqlx::QueryBuilder` and
//! runs it against a `PgPool`.
//!
//! # Feature flag
//!
//! This module is gated behind the `postgres` feature flag:
//! ```toml
//! [dependencies]
//! gatehouse = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Rendering
//!
//! The filter (joins, predicates, GROUP BY / HAVING) runs in an id subquery,
//! so each entity is returned once and ordering / pagination apply to whole
//! entities:
//!
//! ```sql
//! SELECT to_jsonb(b) FROM "documents" AS b
//! WHERE b."id" IN (
//!     SELECT "document"."id" FROM "documents" AS "document"
//!     LEFT JOIN "document_tags" AS "tags_link" ON ...
//!     LEFT JOIN "tags" AS "tags" ON ...
//!     WHERE "tags"."id"::text IN ($1, $2)
//!     GROUP BY "document"."id"
//!     HAVING COUNT(DISTINCT "tags"."id") = 2
//! )
//! ORDER BY b."title" DESC OFFSET 0 LIMIT 10
//! ```
//!
//! Values are bound as text and compared with `column::text`, which keeps the
//! executor independent of each column's SQL type.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::LazyLock;

use crate::core::query::OrderDirection;
use crate::query::{ColumnRef, Predicate, QueryExecutor, RelationDef, Row, SelectQuery, StoreError};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Validate and double-quote an identifier
fn ident(name: &str) -> Result<String, StoreError> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn column(column: &ColumnRef) -> Result<String, StoreError> {
    Ok(format!("{}.{}", ident(&column.alias)?, ident(&column.column)?))
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn store_error(table: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::UniqueViolation {
                table: table.to_string(),
                column: db.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    StoreError::Backend(err.to_string())
}

fn into_row(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(format!("expected a row object, got {}", other))),
    }
}

/// [`QueryExecutor`] backed by PostgreSQL
#[derive(Clone, Debug)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    /// Create a new `PgExecutor` with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn hydrate(&self, query: &SelectQuery, mut row: Row) -> Result<Row, StoreError> {
        for relation in &query.hydrate {
            let related = match relation {
                RelationDef::Direct {
                    table,
                    local_column,
                    foreign_column,
                    many,
                    ..
                } => {
                    let Some(local) = row.get(*local_column).filter(|v| !v.is_null()) else {
                        row.insert(
                            relation.name().to_string(),
                            if *many { Value::Array(Vec::new()) } else { Value::Null },
                        );
                        continue;
                    };
                    let mut builder = QueryBuilder::<Postgres>::new(format!(
                        "SELECT to_jsonb(r) FROM {} AS r WHERE r.{}::text = ",
                        ident(table)?,
                        ident(foreign_column)?
                    ));
                    builder.push_bind(text(local));
                    let rows = builder
                        .build_query_scalar::<Value>()
                        .fetch_all(&self.pool)
                        .await
                        .map_err(|e| store_error(table, e))?;
                    if *many {
                        Value::Array(rows)
                    } else {
                        rows.into_iter().next().unwrap_or(Value::Null)
                    }
                }
                RelationDef::Junction {
                    junction_table,
                    local_key,
                    foreign_key,
                    target_table,
                    target_key,
                    ..
                } => {
                    let id = row.get(&query.primary_key).map(text).unwrap_or_default();
                    let mut builder = QueryBuilder::<Postgres>::new(format!(
                        "SELECT to_jsonb(t) FROM {} AS t JOIN {} AS l ON t.{}::text = l.{}::text \
                         WHERE l.{}::text = ",
                        ident(target_table)?,
                        ident(junction_table)?,
                        ident(target_key)?,
                        ident(foreign_key)?,
                        ident(local_key)?
                    ));
                    builder.push_bind(id);
                    let rows = builder
                        .build_query_scalar::<Value>()
                        .fetch_all(&self.pool)
                        .await
                        .map_err(|e| store_error(target_table, e))?;
                    Value::Array(rows)
                }
            };
            row.insert(relation.name().to_string(), related);
        }
        Ok(row)
    }
}

/// Push `b.pk IN (<filter subquery>)`
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, query: &SelectQuery) -> Result<(), StoreError> {
    let alias = ident(&query.alias)?;
    let primary = column(&query.primary_column())?;

    builder.push(format!(
        "b.{} IN (SELECT {} FROM {} AS {}",
        ident(&query.primary_key)?,
        primary,
        ident(&query.table)?,
        alias
    ));

    for join in &query.joins {
        builder.push(format!(
            " LEFT JOIN {} AS {} ON {}.{}::text = {}::text",
            ident(&join.table)?,
            ident(&join.alias)?,
            ident(&join.alias)?,
            ident(&join.right_column)?,
            column(&join.left)?
        ));
    }

    for (index, predicate) in query.predicates.iter().enumerate() {
        builder.push(if index == 0 { " WHERE " } else { " AND " });
        let target = column(predicate.column())?;
        match predicate {
            Predicate::In { values, .. } | Predicate::NotIn { values, .. } => {
                let keyword = if matches!(predicate, Predicate::In { .. }) {
                    "IN"
                } else {
                    "NOT IN"
                };
                builder.push(format!("{}::text {} (", target, keyword));
                let mut separated = builder.separated(", ");
                for value in values {
                    separated.push_bind(text(value));
                }
                separated.push_unseparated(")");
            }
            Predicate::Like { pattern, .. } => {
                builder.push(format!("{}::text ILIKE ", target));
                builder.push_bind(pattern.clone());
            }
        }
    }

    if query.group_by_primary {
        builder.push(format!(" GROUP BY {}", primary));
        for (index, having) in query.having.iter().enumerate() {
            builder.push(if index == 0 { " HAVING " } else { " AND " });
            builder.push(format!("COUNT(DISTINCT {}) = ", column(&having.column)?));
            builder.push_bind(having.count as i64);
        }
    }

    builder.push(")");
    Ok(())
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT to_jsonb(b) FROM {} AS b WHERE ",
            ident(&query.table)?
        ));
        push_filter(&mut builder, query)?;

        for (index, (column, direction)) in query.order.iter().enumerate() {
            builder.push(if index == 0 { " ORDER BY " } else { ", " });
            let direction = match direction {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
            };
            builder.push(format!("b.{} {}", ident(&column.column)?, direction));
        }
        if let Some(skip) = query.skip {
            builder.push(" OFFSET ");
            builder.push_bind(skip as i64);
        }
        if let Some(take) = query.take {
            builder.push(" LIMIT ");
            builder.push_bind(take as i64);
        }

        let values = builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(&query.table, e))?;

        let mut rows = Vec::with_capacity(values.len());
        for value in values {
            rows.push(self.hydrate(query, into_row(value)?).await?);
        }
        Ok(rows)
    }

    async fn count(&self, query: &SelectQuery) -> Result<u64, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT COUNT(*) FROM {} AS b WHERE ",
            ident(&query.table)?
        ));
        push_filter(&mut builder, query)?;
        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error(&query.table, e))?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<u64, StoreError> {
        let quoted = ident(table)?;
        let columns = row
            .keys()
            .map(|c| ident(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {quoted} ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{quoted}, "
        ));
        builder.push_bind(Value::Object(row));
        builder.push(")");
        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(table, e))?;
        Ok(result.rows_affected())
    }

    async fn update(
        &self,
        table: &str,
        key: &str,
        id: &Value,
        changes: Row,
    ) -> Result<u64, StoreError> {
        let quoted = ident(table)?;
        let key = ident(key)?;
        let mut builder = QueryBuilder::<Postgres>::new(format!("UPDATE {quoted} SET "));
        if changes.is_empty() {
            builder.push(format!("{key} = {key}"));
        } else {
            let columns = changes
                .keys()
                .map(|c| ident(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            builder.push(format!(
                "({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{quoted}, "
            ));
            builder.push_bind(Value::Object(changes));
            builder.push("))");
        }
        builder.push(format!(" WHERE {key}::text = "));
        builder.push_bind(text(id));
        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(table, e))?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, key: &str, id: &Value) -> Result<u64, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "DELETE FROM {} WHERE {}::text = ",
            ident(table)?,
            ident(key)?
        ));
        builder.push_bind(text(id));
        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(table, e))?;
        Ok(result.rows_affected())
    }
}
