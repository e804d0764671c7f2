//! Select query AST
//!
//! A [`SelectQuery`] is the store-neutral description of a filtered entity
//! read: the base table, the joins needed by filters, the predicates, an
//! optional group-by-primary-key with HAVING counts, and pagination. Each
//! [`QueryExecutor`](super::crud::QueryExecutor) renders or evaluates it in
//! its own way; the semantics are those of SQL with LEFT JOINs and three-valued
//! NULL logic, returning each matching base row once.

use serde_json::Value;
use std::fmt;

use crate::core::query::OrderDirection;

/// A column qualified by the alias of the table it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

/// `LEFT JOIN table AS alias ON alias.right_column = left`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub alias: String,
    pub table: String,
    pub left: ColumnRef,
    pub right_column: String,
}

/// One WHERE conjunct
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column IN (values)`
    In { column: ColumnRef, values: Vec<Value> },
    /// `column NOT IN (values)`
    NotIn { column: ColumnRef, values: Vec<Value> },
    /// Case-insensitive `column LIKE pattern`; `%` and `_` are wildcards and
    /// `\` escapes them
    Like { column: ColumnRef, pattern: String },
}

impl Predicate {
    pub fn column(&self) -> &ColumnRef {
        match self {
            Predicate::In { column, .. }
            | Predicate::NotIn { column, .. }
            | Predicate::Like { column, .. } => column,
        }
    }
}

/// `HAVING COUNT(DISTINCT column) = count`
#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    pub column: ColumnRef,
    pub count: usize,
}

/// How an entity reaches a related table
#[derive(Debug, Clone, PartialEq)]
pub enum RelationDef {
    /// The related table holds (or is referenced by) a plain column:
    /// `related.foreign_column = base.local_column`
    Direct {
        name: &'static str,
        table: &'static str,
        local_column: &'static str,
        foreign_column: &'static str,
        /// Many related rows per entity, hydrated as an array
        many: bool,
    },
    /// Many-to-many through a junction table:
    /// `junction.local_key = base.pk` and `target.target_key = junction.foreign_key`
    Junction {
        name: &'static str,
        junction_table: &'static str,
        local_key: &'static str,
        foreign_key: &'static str,
        target_table: &'static str,
        target_key: &'static str,
    },
}

impl RelationDef {
    pub fn name(&self) -> &'static str {
        match self {
            RelationDef::Direct { name, .. } | RelationDef::Junction { name, .. } => name,
        }
    }

    /// Joins that make the related table addressable as `alias = name`
    pub fn joins(&self, base_alias: &str, primary_key: &str) -> Vec<Join> {
        match self {
            RelationDef::Direct {
                name,
                table,
                local_column,
                foreign_column,
                ..
            } => vec![Join {
                alias: name.to_string(),
                table: table.to_string(),
                left: ColumnRef::new(base_alias, *local_column),
                right_column: foreign_column.to_string(),
            }],
            RelationDef::Junction {
                name,
                junction_table,
                local_key,
                foreign_key,
                target_table,
                target_key,
            } => {
                let link = format!("{}_link", name);
                vec![
                    Join {
                        alias: link.clone(),
                        table: junction_table.to_string(),
                        left: ColumnRef::new(base_alias, primary_key),
                        right_column: local_key.to_string(),
                    },
                    Join {
                        alias: name.to_string(),
                        table: target_table.to_string(),
                        left: ColumnRef::new(link, *foreign_key),
                        right_column: target_key.to_string(),
                    },
                ]
            }
        }
    }
}

/// A composed entity read
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub alias: String,
    pub primary_key: String,
    pub joins: Vec<Join>,
    pub predicates: Vec<Predicate>,
    pub group_by_primary: bool,
    pub having: Vec<Having>,
    pub order: Vec<(ColumnRef, OrderDirection)>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    /// Relations attached to every returned row, independent of filter joins
    pub hydrate: Vec<RelationDef>,
}

impl SelectQuery {
    pub fn new(
        table: impl Into<String>,
        alias: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            primary_key: primary_key.into(),
            joins: Vec::new(),
            predicates: Vec::new(),
            group_by_primary: false,
            having: Vec::new(),
            order: Vec::new(),
            skip: None,
            take: None,
            hydrate: Vec::new(),
        }
    }

    pub fn primary_column(&self) -> ColumnRef {
        ColumnRef::new(&self.alias, &self.primary_key)
    }

    pub fn has_join(&self, alias: &str) -> bool {
        self.joins.iter().any(|j| j.alias == alias)
    }

    /// Every alias a column may refer to
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.alias.as_str()).chain(self.joins.iter().map(|j| j.alias.as_str()))
    }

    /// The same filter without pagination, as used for counting
    pub fn without_pagination(&self) -> Self {
        Self {
            order: Vec::new(),
            skip: None,
            take: None,
            hydrate: Vec::new(),
            ..self.clone()
        }
    }
}

/// Escape `%`, `_` and `\` so `text` matches literally inside a LIKE pattern
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
