//! Relational query composition
//!
//! - [`select`]: the store-neutral select AST
//! - [`composer`]: per-entity filter clauses over that AST
//! - [`crud`]: the store capability and the CRUD primitives

pub mod composer;
pub mod crud;
pub mod select;

pub use composer::{EntityQuery, EntitySchema, FilterValues, RelationSetOp};
pub use crud::{QueryExecutor, Repository, Row, StoreError, to_row};
pub use select::{ColumnRef, Having, Join, Predicate, RelationDef, SelectQuery};
