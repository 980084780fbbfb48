use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::ownership::{assert_owned_lease, assert_owned_property, db_pool};
use crate::repository::table_service::{create_row, delete_row, get_row, list_rows};
use crate::schemas::{
    clamp_limit_in_range, json_map, non_empty_opt, remove_nulls, serialize_to_map, validate_input,
    value_str, CreateDocumentInput, DocumentPath, DocumentsQuery,
};
use crate::services::audit::write_audit_log;
use crate::state::AppState;

/// Document *metadata* only — the files themselves live in external storage
/// and are referenced by URL.
pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/documents",
            axum::routing::get(list_documents).post(create_document),
        )
        .route(
            "/documents/{document_id}",
            axum::routing::delete(delete_document),
        )
}

async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = json_map(&[("user_id", Value::String(user_id))]);
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(lease_id) = non_empty_opt(query.lease_id.as_deref()) {
        filters.insert("lease_id".to_string(), Value::String(lease_id));
    }
    if let Some(doc_type) = non_empty_opt(query.doc_type.as_deref()) {
        filters.insert("doc_type".to_string(), Value::String(doc_type));
    }

    let rows = list_rows(
        pool,
        "documents",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateDocumentInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    if let Some(property_id) = non_empty_opt(payload.property_id.as_deref()) {
        assert_owned_property(pool, &property_id, &user_id).await?;
    }
    if let Some(lease_id) = non_empty_opt(payload.lease_id.as_deref()) {
        assert_owned_lease(pool, &lease_id, &user_id).await?;
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("user_id".to_string(), Value::String(user_id.clone()));

    let created = create_row(pool, "documents", &record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "documents",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "documents", &path.document_id).await?;
    if value_str(&record, "user_id") != user_id {
        return Err(AppError::NotFound("documents record not found.".to_string()));
    }

    let deleted = delete_row(pool, "documents", &path.document_id).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "documents",
        Some(&path.document_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(json!({ "deleted": deleted })))
}
