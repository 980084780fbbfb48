use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::ownership::{assert_owned_property, assert_owned_unit, db_pool};
use crate::repository::table_service::{create_row, delete_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, json_map, non_empty_opt, remove_nulls, serialize_to_map, validate_input,
    value_str, CreateUnitInput, UnitPath, UnitsQuery, UpdateUnitInput,
};
use crate::services::audit::write_audit_log;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/units", axum::routing::get(list_units).post(create_unit))
        .route(
            "/units/{unit_id}",
            axum::routing::get(get_unit)
                .patch(update_unit)
                .delete(delete_unit),
        )
}

async fn list_units(
    State(state): State<AppState>,
    Query(query): Query<UnitsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = json_map(&[("user_id", Value::String(user_id))]);
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }

    let rows = list_rows(
        pool,
        "units",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "unit_identifier",
        true,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUnitInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    assert_owned_property(pool, &payload.property_id, &user_id).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("user_id".to_string(), Value::String(user_id.clone()));

    let created = create_row(pool, "units", &record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "units",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let record = assert_owned_unit(pool, &path.unit_id, &user_id).await?;
    Ok(Json(record))
}

async fn update_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUnitInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = assert_owned_unit(pool, &path.unit_id, &user_id).await?;
    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "units", &path.unit_id, &patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "units",
        Some(&path.unit_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    assert_owned_unit(pool, &path.unit_id, &user_id).await?;

    // An active lease pins the unit.
    let active_leases = list_rows(
        pool,
        "leases",
        Some(&json_map(&[
            ("unit_id", Value::String(path.unit_id.clone())),
            ("status", Value::String("active".to_string())),
        ])),
        1,
        0,
        "created_at",
        false,
    )
    .await?;
    if !active_leases.is_empty() {
        return Err(AppError::Conflict(
            "Unit has an active lease and cannot be deleted.".to_string(),
        ));
    }

    let deleted = delete_row(pool, "units", &path.unit_id).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "units",
        Some(&path.unit_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(json!({ "deleted": deleted })))
}
