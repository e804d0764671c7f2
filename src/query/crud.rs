//! Store capability and the CRUD primitives built on it

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

use super::composer::{EntityQuery, EntitySchema};
use super::select::SelectQuery;
use crate::core::error::ApiError;

/// A row as a column → value map
pub type Row = Map<String, Value>;

/// Failures reported by a [`QueryExecutor`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated on {table}.{column}")]
    UniqueViolation { table: String, column: String },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("query refers to unknown alias '{0}'")]
    UnknownAlias(String),

    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// The relational store, as seen by the CRUD primitives
///
/// `insert`, `update` and `delete` report the number of affected rows and
/// leave interpreting it to the caller.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Rows matching a composed select, hydrated relations included
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError>;

    /// Number of distinct base rows matching a composed select
    async fn count(&self, query: &SelectQuery) -> Result<u64, StoreError>;

    async fn insert(&self, table: &str, row: Row) -> Result<u64, StoreError>;

    /// Apply `changes` to rows where `key = id`
    async fn update(
        &self,
        table: &str,
        key: &str,
        id: &Value,
        changes: Row,
    ) -> Result<u64, StoreError>;

    /// Delete rows where `key = id`
    async fn delete(&self, table: &str, key: &str, id: &Value) -> Result<u64, StoreError>;
}

/// CRUD primitives for one entity
pub struct Repository<E> {
    executor: Arc<dyn QueryExecutor>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: EntitySchema> Repository<E> {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            _entity: PhantomData,
        }
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    /// The entity's base select
    pub fn create_select(&self) -> EntityQuery<E> {
        EntityQuery::create_select()
    }

    /// Fetch one entity by id; absent is NotFound
    pub async fn perform_select(&self, id: &Value) -> Result<Row, ApiError> {
        let query = EntityQuery::<E>::create_select().with_ids(vec![id.clone()]);
        self.executor
            .fetch(query.select())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found(E::ALIAS, display_id(id)))
    }

    /// Fetch every entity among `ids` that exists, in store order
    pub async fn perform_select_list(&self, ids: &[Value]) -> Result<Vec<Row>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = EntityQuery::<E>::create_select().with_ids(ids);
        Ok(self.executor.fetch(query.select()).await?)
    }

    /// Run a composed query
    pub async fn perform_query(&self, query: EntityQuery<E>) -> Result<Vec<Row>, ApiError> {
        Ok(self.executor.fetch(query.select()).await?)
    }

    /// Count the entities a composed query matches, ignoring pagination
    pub async fn perform_count(&self, query: EntityQuery<E>) -> Result<u64, ApiError> {
        let select = query.into_select().without_pagination();
        Ok(self.executor.count(&select).await?)
    }

    /// Insert a row and return it as stored
    ///
    /// The row must carry its primary key. A write that affects nothing is an
    /// internal failure: the caller addressed no existing row, so there is
    /// nothing to be "not found".
    pub async fn perform_insert(&self, row: Row) -> Result<Row, ApiError> {
        let id = row
            .get(E::PRIMARY_KEY)
            .cloned()
            .ok_or_else(|| ApiError::internal(format!("{} row has no primary key", E::ALIAS)))?;
        let affected = self.executor.insert(E::TABLE, row).await?;
        if affected == 0 {
            return Err(ApiError::internal(format!(
                "insert into {} affected no rows",
                E::TABLE
            )));
        }
        self.perform_select(&id).await
    }

    /// Apply `changes` to one entity and return its new state
    pub async fn perform_update(&self, id: &Value, changes: Row) -> Result<Row, ApiError> {
        let affected = self
            .executor
            .update(E::TABLE, E::PRIMARY_KEY, id, changes)
            .await?;
        if affected != 1 {
            return Err(ApiError::not_found(E::ALIAS, display_id(id)));
        }
        self.perform_select(id).await
    }

    /// Delete one entity and return the representation it had
    pub async fn perform_delete(&self, id: &Value) -> Result<Row, ApiError> {
        let row = self.perform_select(id).await?;
        let affected = self.executor.delete(E::TABLE, E::PRIMARY_KEY, id).await?;
        if affected != 1 {
            return Err(ApiError::not_found(E::ALIAS, display_id(id)));
        }
        Ok(row)
    }
}

fn display_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Serialize a value into a [`Row`]
pub fn to_row<T: serde::Serialize>(value: &T) -> Result<Row, ApiError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::internal(format!(
            "expected an object to store, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Note;

    impl EntitySchema for Note {
        const TABLE: &'static str = "notes";
        const ALIAS: &'static str = "note";
    }

    /// Executor whose writes report a fixed affected-row count
    struct FixedExecutor {
        rows: Vec<Row>,
        affected: u64,
        deletes: AtomicU64,
    }

    impl FixedExecutor {
        fn new(rows: Vec<Value>, affected: u64) -> Arc<Self> {
            Arc::new(Self {
                rows: rows
                    .into_iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect(),
                affected,
                deletes: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl QueryExecutor for FixedExecutor {
        async fn fetch(&self, _query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
            Ok(self.rows.clone())
        }

        async fn count(&self, _query: &SelectQuery) -> Result<u64, StoreError> {
            Ok(self.rows.len() as u64)
        }

        async fn insert(&self, _table: &str, _row: Row) -> Result<u64, StoreError> {
            Ok(self.affected)
        }

        async fn update(
            &self,
            _table: &str,
            _key: &str,
            _id: &Value,
            _changes: Row,
        ) -> Result<u64, StoreError> {
            Ok(self.affected)
        }

        async fn delete(&self, _table: &str, _key: &str, _id: &Value) -> Result<u64, StoreError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(self.affected)
        }
    }

    fn repo(executor: Arc<FixedExecutor>) -> Repository<Note> {
        Repository::new(executor)
    }

    #[tokio::test]
    async fn test_update_with_no_matching_row_is_not_found() {
        let err = repo(FixedExecutor::new(vec![], 0))
            .perform_update(&json!("missing"), Row::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_insert_with_no_affected_rows_is_internal() {
        let mut row = Row::new();
        row.insert("id".into(), json!("n1"));
        let err = repo(FixedExecutor::new(vec![], 0))
            .perform_insert(row)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_select_single_absent_is_not_found() {
        let err = repo(FixedExecutor::new(vec![], 1))
            .perform_select(&json!("n1"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ENTITY_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_select_list_tolerates_empty() {
        let rows = repo(FixedExecutor::new(vec![], 1))
            .perform_select_list(&[json!("n1"), json!("n2")])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_delete_returns_prior_row() {
        let executor = FixedExecutor::new(vec![json!({"id": "n1", "body": "hi"})], 1);
        let row = repo(executor.clone())
            .perform_delete(&json!("n1"))
            .await
            .unwrap();
        assert_eq!(row.get("body"), Some(&json!("hi")));
        assert_eq!(executor.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_of_absent_row_never_deletes() {
        let executor = FixedExecutor::new(vec![], 1);
        let err = repo(executor.clone())
            .perform_delete(&json!("n1"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(executor.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_with_mismatched_count_is_not_found() {
        let executor = FixedExecutor::new(vec![json!({"id": "n1"})], 2);
        let err = repo(executor).perform_delete(&json!("n1")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_to_row_requires_object() {
        assert!(to_row(&json!({"id": 1})).is_ok());
        assert!(to_row(&json!([1, 2])).is_err());
    }
}
