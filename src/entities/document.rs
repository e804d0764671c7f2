//! Documents: the full CRUD surface
//!
//! Documents carry tags through the `document_tags` junction and an optional
//! attachment received as a multipart upload. Listing and counting share one
//! set of filters, including a tag filter with UNION / INTERSECTION semantics.

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::id_param;
use crate::core::alias::Alias;
use crate::core::error::ApiError;
use crate::core::module::Module;
use crate::core::pluralize::Pluralizer;
use crate::core::validation::{ParamType, Params, StringConditions, UploadedFile};
use crate::query::{
    EntityQuery, EntitySchema, QueryExecutor, RelationDef, RelationSetOp, Repository, Row,
    to_row,
};
use crate::server::context::RequestContext;
use crate::server::registry::{ParamOptions, RegistryError, RouteOptions, RouteRegistry, with_state};

/// Junction table linking documents to tags
pub const DOCUMENT_TAGS: &str = "document_tags";

/// Accepted values of `status`
pub const STATUSES: [&str; 3] = ["draft", "published", "archived"];

impl_entity_schema!(Tag, "tags", "tag");

impl_entity_schema!(Document, "documents", "document", relations: [
    RelationDef::Junction {
        name: "tags",
        junction_table: DOCUMENT_TAGS,
        local_key: "document_id",
        foreign_key: "tag_id",
        target_table: "tags",
        target_key: "id",
    },
]);

/// Stored description of an attachment
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    /// File name under the attachment directory
    pub stored_as: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub title: String,
    pub body: Option<String>,
    pub status: String,
    pub owner_id: Uuid,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct DocumentState {
    documents: Repository<Document>,
    tags: Repository<Tag>,
    attachment_dir: PathBuf,
}

pub struct DocumentModule {
    state: Arc<DocumentState>,
}

impl DocumentModule {
    /// Attachments are copied into `attachment_dir`, created on first use
    pub fn new(executor: Arc<dyn QueryExecutor>, attachment_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(DocumentState {
                documents: Repository::new(executor.clone()),
                tags: Repository::new(executor),
                attachment_dir: attachment_dir.into(),
            }),
        }
    }
}

/// Filters shared by `document.list` and `document.count`
fn register_filters(registry: &mut RouteRegistry, alias: &Alias) {
    registry
        .register_parameter(
            alias,
            "status",
            ParamType::enumeration(STATUSES),
            ParamOptions::new().array(),
        )
        .register_parameter(
            alias,
            "exclude_status",
            ParamType::enumeration(STATUSES),
            ParamOptions::new().array(),
        )
        .register_parameter(alias, "owner_id", ParamType::Uuid, ParamOptions::new().array())
        .register_parameter(
            alias,
            "search",
            ParamType::String(StringConditions::length(1, 128)),
            ParamOptions::new(),
        )
        .register_parameter(
            alias,
            "tag",
            ParamType::String(StringConditions::length(1, 64)),
            ParamOptions::new().array(),
        )
        .register_parameter(
            alias,
            "tag_mode",
            ParamType::enumeration(["UNION", "INTERSECTION"]),
            ParamOptions::new(),
        );
}

/// Document fields accepted by create and update
fn register_fields(registry: &mut RouteRegistry, alias: &Alias, title_optional: bool) {
    let title = if title_optional {
        ParamOptions::new().optional(true)
    } else {
        ParamOptions::new()
    };
    registry
        .register_parameter(
            alias,
            "title",
            ParamType::String(StringConditions::length(1, 256)),
            title,
        )
        .register_parameter(
            alias,
            "body",
            ParamType::String(StringConditions::length(0, 65_536)),
            ParamOptions::new().optional(true),
        )
        .register_parameter(
            alias,
            "status",
            ParamType::enumeration(STATUSES),
            ParamOptions::new().optional(true),
        )
        .register_parameter(
            alias,
            "owner_id",
            ParamType::Uuid,
            ParamOptions::new().optional(true),
        )
        .register_parameter(
            alias,
            "tag",
            ParamType::String(StringConditions::length(1, 64)),
            ParamOptions::new().array().optional(true),
        )
        .register_parameter(
            alias,
            "attachment",
            ParamType::File { max_count: 1 },
            ParamOptions::new().optional(true),
        );
}

impl Module for DocumentModule {
    fn name(&self) -> &str {
        "documents"
    }

    fn entity_types(&self) -> Vec<&str> {
        vec!["document", "tag"]
    }

    fn register(&self, registry: &mut RouteRegistry) -> Result<(), RegistryError> {
        let state = &self.state;
        let collection = Pluralizer::collection_path("document");
        let alias = |method: &str| Alias::new("document", method);
        let max_limit = registry.max_limit();

        let list = alias("list");
        registry.register(
            &list,
            Method::GET,
            &[collection.as_str()],
            RouteOptions::new().permission("document.view"),
            with_state(state, list_documents),
        )?;
        register_filters(registry, &list);
        registry.register_pagination(&list, max_limit, ["title", "status", "created_at", "updated_at"]);

        let count = alias("count");
        registry.register(
            &count,
            Method::GET,
            &[collection.as_str(), "count"],
            RouteOptions::new().permission("document.view"),
            with_state(state, count_documents),
        )?;
        register_filters(registry, &count);

        let get = alias("get");
        registry.register(
            &get,
            Method::GET,
            &[collection.as_str(), ":id"],
            RouteOptions::new().permission("document.view"),
            with_state(state, get_document),
        )?;
        registry.register_parameter(&get, "id", ParamType::Uuid, ParamOptions::new().optional(false));

        let create = alias("create");
        registry.register(
            &create,
            Method::POST,
            &[collection.as_str()],
            RouteOptions::new().permission("document.create"),
            with_state(state, create_document),
        )?;
        register_fields(registry, &create, false);

        let update = alias("update");
        registry.register(
            &update,
            Method::PUT,
            &[collection.as_str(), ":id"],
            RouteOptions::new().permission("document.update"),
            with_state(state, update_document),
        )?;
        registry.register_parameter(&update, "id", ParamType::Uuid, ParamOptions::new());
        register_fields(registry, &update, true);

        let delete = alias("delete");
        registry.register(
            &delete,
            Method::DELETE,
            &[collection.as_str(), ":id"],
            RouteOptions::new().permission("document.delete"),
            with_state(state, delete_document),
        )?;
        registry.register_parameter(&delete, "id", ParamType::Uuid, ParamOptions::new());

        Ok(())
    }
}

fn filtered(state: &DocumentState, params: &Params) -> Result<EntityQuery<Document>, ApiError> {
    let mode: RelationSetOp = match params.str("tag_mode") {
        Some(tag) => tag.parse()?,
        None => RelationSetOp::Union,
    };
    state
        .documents
        .create_select()
        .value_clause("status", params.json_list("status"))
        .exclusion_clause("status", params.json_list("exclude_status"))
        .value_clause("owner_id", params.json_list("owner_id"))
        .wildcard_clause("title", params.str("search"))
        .relation_set_clause(mode, "tags", "name", params.json_list("tag"))
}

async fn list_documents(state: Arc<DocumentState>, ctx: RequestContext) -> Result<Value, ApiError> {
    let query = filtered(&state, &ctx.params)?.apply_pagination(&ctx.params.pagination());
    let rows = state.documents.perform_query(query).await?;
    Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
}

async fn count_documents(state: Arc<DocumentState>, ctx: RequestContext) -> Result<Value, ApiError> {
    let count = state.documents.perform_count(filtered(&state, &ctx.params)?).await?;
    Ok(json!({ "count": count }))
}

async fn get_document(state: Arc<DocumentState>, ctx: RequestContext) -> Result<Value, ApiError> {
    let row = state.documents.perform_select(&id_param(&ctx.params)?).await?;
    Ok(Value::Object(row))
}

async fn create_document(state: Arc<DocumentState>, ctx: RequestContext) -> Result<Value, ApiError> {
    let params = &ctx.params;
    let title = params
        .str("title")
        .ok_or_else(|| ApiError::bad_request("title is required"))?;
    let owner_id = match params.uuid("owner_id") {
        Some(owner) => owner,
        None => ctx.require_subject()?,
    };

    let id = Uuid::new_v4();
    let attachment = match params.files("attachment").first() {
        Some(file) => Some(store_attachment(&state.attachment_dir, id, file).await?),
        None => None,
    };
    let now = Utc::now();
    let record = DocumentRecord {
        id,
        title: title.to_string(),
        body: params.str("body").map(str::to_string),
        status: params.str("status").unwrap_or(STATUSES[0]).to_string(),
        owner_id,
        attachment,
        created_at: now,
        updated_at: now,
    };
    if let Err(err) = insert_record(&state, &record).await {
        if let Some(stored) = &record.attachment {
            remove_attachment(&state.attachment_dir, &stored.stored_as).await;
        }
        return Err(err);
    }

    let key = json!(id.to_string());
    if let Some(tags) = tag_names(params) {
        link_tags(&state, &key, &tags).await?;
    }
    tracing::debug!(document = %id, "document created");
    Ok(Value::Object(state.documents.perform_select(&key).await?))
}

async fn update_document(state: Arc<DocumentState>, ctx: RequestContext) -> Result<Value, ApiError> {
    let params = &ctx.params;
    let key = id_param(params)?;
    let existing = state.documents.perform_select(&key).await?;

    let mut changes = Row::new();
    for column in ["title", "body", "status"] {
        if let Some(value) = params.str(column) {
            changes.insert(column.to_string(), json!(value));
        }
    }
    if let Some(owner) = params.uuid("owner_id") {
        changes.insert("owner_id".to_string(), json!(owner.to_string()));
    }
    let attachment = match params.files("attachment").first() {
        Some(file) => {
            let id = params.uuid("id").unwrap_or_else(Uuid::new_v4);
            Some(store_attachment(&state.attachment_dir, id, file).await?)
        }
        None => None,
    };
    let replaced = attachment.as_ref().and_then(|_| stored_attachment(&existing));
    changes.insert("updated_at".to_string(), json!(Utc::now()));

    if let Err(err) = update_record(&state, &key, changes, attachment.as_ref()).await {
        if let Some(stored) = &attachment {
            remove_attachment(&state.attachment_dir, &stored.stored_as).await;
        }
        return Err(err);
    }
    if let Some(tags) = tag_names(params) {
        state
            .documents
            .executor()
            .delete(DOCUMENT_TAGS, "document_id", &key)
            .await?;
        link_tags(&state, &key, &tags).await?;
    }
    if let Some(previous) = replaced {
        remove_attachment(&state.attachment_dir, &previous).await;
    }
    Ok(Value::Object(state.documents.perform_select(&key).await?))
}

async fn delete_document(state: Arc<DocumentState>, ctx: RequestContext) -> Result<Value, ApiError> {
    let key = id_param(&ctx.params)?;
    let row = state.documents.perform_delete(&key).await?;
    state
        .documents
        .executor()
        .delete(DOCUMENT_TAGS, "document_id", &key)
        .await?;
    if let Some(stored) = stored_attachment(&row) {
        remove_attachment(&state.attachment_dir, &stored).await;
    }
    Ok(Value::Object(row))
}

async fn insert_record(state: &DocumentState, record: &DocumentRecord) -> Result<(), ApiError> {
    state.documents.perform_insert(to_row(record)?).await?;
    Ok(())
}

async fn update_record(
    state: &DocumentState,
    key: &Value,
    mut changes: Row,
    attachment: Option<&Attachment>,
) -> Result<(), ApiError> {
    if let Some(attachment) = attachment {
        changes.insert("attachment".to_string(), serde_json::to_value(attachment)?);
    }
    state.documents.perform_update(key, changes).await?;
    Ok(())
}

/// Distinct tag names, `None` when the parameter was not sent
fn tag_names(params: &Params) -> Option<Vec<String>> {
    let values = params.json_list("tag")?;
    let mut names: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if let Some(name) = value.as_str() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    Some(names)
}

/// Link `document` to each named tag, creating missing tags
async fn link_tags(state: &DocumentState, document: &Value, names: &[String]) -> Result<(), ApiError> {
    for name in names {
        let query = state.tags.create_select().value_clause("name", vec![name.clone()]);
        let tag_id = match state.tags.perform_query(query).await?.first() {
            Some(tag) => tag
                .get(Tag::PRIMARY_KEY)
                .cloned()
                .ok_or_else(|| ApiError::internal("tag row has no id"))?,
            None => {
                let mut tag = Row::new();
                tag.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
                tag.insert("name".to_string(), json!(name));
                let created = state.tags.perform_insert(tag).await?;
                created
                    .get(Tag::PRIMARY_KEY)
                    .cloned()
                    .ok_or_else(|| ApiError::internal("tag row has no id"))?
            }
        };

        let mut link = Row::new();
        link.insert("document_id".to_string(), document.clone());
        link.insert("tag_id".to_string(), tag_id);
        state.documents.executor().insert(DOCUMENT_TAGS, link).await?;
    }
    Ok(())
}

/// Reduce an upload's client file name to a safe single path component
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

async fn store_attachment(
    dir: &Path,
    document: Uuid,
    file: &UploadedFile,
) -> Result<Attachment, ApiError> {
    let file_name = sanitize_file_name(file.file_name.as_deref().unwrap_or_default());
    // unique per upload, so a replacement never lands on the file it replaces
    let stored_as = format!("{}-{}-{}", document, Uuid::new_v4().simple(), file_name);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create {}: {}", dir.display(), e)))?;
    tokio::fs::copy(&file.path, dir.join(&stored_as))
        .await
        .map_err(|e| ApiError::internal(format!("Failed to store attachment: {}", e)))?;

    Ok(Attachment {
        file_name,
        content_type: file.content_type.clone(),
        size: file.size,
        stored_as,
    })
}

fn stored_attachment(row: &Row) -> Option<String> {
    row.get("attachment")?
        .get("stored_as")?
        .as_str()
        .map(str::to_string)
}

async fn remove_attachment(dir: &Path, stored_as: &str) {
    let path = dir.join(stored_as);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove attachment");
    }
}
