//! Macros for reducing boilerplate when defining entity schemas

/// Declare a marker type implementing [`EntitySchema`](crate::query::EntitySchema)
///
/// # Example
/// ```rust,ignore
/// impl_entity_schema!(Tag, "tags", "tag");
///
/// impl_entity_schema!(Document, "documents", "document", relations: [
///     RelationDef::Junction {
///         name: "tags",
///         junction_table: "document_tags",
///         local_key: "document_id",
///         foreign_key: "tag_id",
///         target_table: "tags",
///         target_key: "id",
///     },
/// ]);
/// ```
#[macro_export]
macro_rules! impl_entity_schema {
    ($type:ident, $table:literal, $alias:literal) => {
        $crate::impl_entity_schema!($type, $table, $alias, relations: []);
    };
    ($type:ident, $table:literal, $alias:literal, relations: [$($relation:expr),* $(,)?]) => {
        #[doc = concat!("Schema of the `", $table, "` table")]
        #[derive(Debug, Clone, Copy)]
        pub struct $type;

        impl $crate::query::EntitySchema for $type {
            const TABLE: &'static str = $table;
            const ALIAS: &'static str = $alias;

            fn relations() -> Vec<$crate::query::RelationDef> {
                vec![$($relation),*]
            }
        }
    };
}
