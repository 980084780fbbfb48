use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::ownership::{assert_owned_lease, assert_owned_property, assert_owned_unit, db_pool};
use crate::repository::table_service::{create_row, delete_row, delete_rows, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, json_map, non_empty_opt, remove_nulls, serialize_to_map, validate_input,
    value_opt_str, value_str, CreateLeaseInput, LeasePath, LeasesQuery, UpdateLeaseInput,
};
use crate::services::audit::write_audit_log;
use crate::state::AppState;

const LEASE_STATUSES: &[&str] = &["active", "expired", "pending"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/leases", axum::routing::get(list_leases).post(create_lease))
        .route(
            "/leases/{lease_id}",
            axum::routing::get(get_lease)
                .patch(update_lease)
                .delete(delete_lease),
        )
}

async fn list_leases(
    State(state): State<AppState>,
    Query(query): Query<LeasesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = json_map(&[("user_id", Value::String(user_id))]);
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert(
            "status".to_string(),
            Value::String(status.to_ascii_lowercase()),
        );
    }

    let rows = list_rows(
        pool,
        "leases",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    let enriched = enrich_leases(pool, rows).await?;
    Ok(Json(json!({ "data": enriched })))
}

async fn create_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateLeaseInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    assert_owned_property(pool, &payload.property_id, &user_id).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    normalize_status(&mut record);
    validate_lease_fields(&record)?;

    if let Some(unit_id) = non_empty_opt(payload.unit_id.as_deref()) {
        let unit = assert_owned_unit(pool, &unit_id, &user_id).await?;
        if value_str(&unit, "property_id") != payload.property_id {
            return Err(AppError::BadRequest(
                "unit_id does not belong to the provided property_id.".to_string(),
            ));
        }
    }

    record.insert("user_id".to_string(), Value::String(user_id.clone()));
    let created = create_row(pool, "leases", &record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "leases",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    let mut enriched = enrich_leases(pool, vec![created]).await?;
    let lease = enriched.pop().unwrap_or_else(|| Value::Object(Map::new()));
    Ok((axum::http::StatusCode::CREATED, Json(lease)))
}

async fn get_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = assert_owned_lease(pool, &path.lease_id, &user_id).await?;

    let settings = list_rows(
        pool,
        "lease_utility_settings",
        Some(&json_map(&[(
            "lease_id",
            Value::String(path.lease_id.clone()),
        )])),
        500,
        0,
        "utility_type",
        true,
    )
    .await?;

    let mut enriched = enrich_leases(pool, vec![record]).await?;
    let mut lease = enriched.pop().unwrap_or_else(|| Value::Object(Map::new()));
    if let Some(obj) = lease.as_object_mut() {
        obj.insert("utility_settings".to_string(), Value::Array(settings));
    }

    Ok(Json(lease))
}

async fn update_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateLeaseInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = assert_owned_lease(pool, &path.lease_id, &user_id).await?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    normalize_status(&mut patch);

    // Validate against the merged view so a date patch cannot invert an
    // existing range.
    let mut merged = record.as_object().cloned().unwrap_or_default();
    for (key, value) in &patch {
        merged.insert(key.clone(), value.clone());
    }
    validate_lease_fields(&merged)?;

    if let Some(unit_id) = patch.get("unit_id").and_then(Value::as_str) {
        let unit = assert_owned_unit(pool, unit_id, &user_id).await?;
        if value_str(&unit, "property_id") != value_str(&record, "property_id") {
            return Err(AppError::BadRequest(
                "unit_id does not belong to the lease's property.".to_string(),
            ));
        }
    }

    let updated = update_row(pool, "leases", &path.lease_id, &patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "leases",
        Some(&path.lease_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    let mut enriched = enrich_leases(pool, vec![updated]).await?;
    Ok(Json(
        enriched.pop().unwrap_or_else(|| Value::Object(Map::new())),
    ))
}

async fn delete_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    assert_owned_lease(pool, &path.lease_id, &user_id).await?;

    // Responsibility settings die with the lease; the payment ledger stays.
    let removed_settings = delete_rows(
        pool,
        "lease_utility_settings",
        &json_map(&[("lease_id", Value::String(path.lease_id.clone()))]),
    )
    .await?;

    let deleted = delete_row(pool, "leases", &path.lease_id).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "leases",
        Some(&path.lease_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(json!({
        "deleted": deleted,
        "removed_settings": removed_settings
    })))
}

fn normalize_status(payload: &mut Map<String, Value>) {
    let value = payload
        .get("status")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_ascii_lowercase);
    if let Some(value) = value {
        payload.insert("status".to_string(), Value::String(value));
    }
}

fn validate_lease_fields(record: &Map<String, Value>) -> AppResult<()> {
    if let Some(status) = record.get("status").and_then(Value::as_str) {
        if !LEASE_STATUSES.contains(&status) {
            return Err(AppError::UnprocessableEntity(format!(
                "Invalid lease status '{status}'. Expected one of: active, expired, pending."
            )));
        }
    }

    let starts_on = record.get("starts_on").and_then(Value::as_str);
    let ends_on = record.get("ends_on").and_then(Value::as_str);
    if let (Some(starts_on), Some(ends_on)) = (starts_on, ends_on) {
        let start = parse_date(starts_on)?;
        let end = parse_date(ends_on)?;
        if end < start {
            return Err(AppError::BadRequest(
                "ends_on must be on or after starts_on.".to_string(),
            ));
        }
    }

    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("Invalid date '{raw}'. Expected YYYY-MM-DD.")))
}

/// Attach property names and unit identifiers for display.
async fn enrich_leases(pool: &sqlx::PgPool, rows: Vec<Value>) -> AppResult<Vec<Value>> {
    if rows.is_empty() {
        return Ok(rows);
    }

    let property_ids = extract_ids(&rows, "property_id");
    let unit_ids = extract_ids(&rows, "unit_id");

    let properties = fetch_by_ids(pool, "properties", &property_ids).await?;
    let units = fetch_by_ids(pool, "units", &unit_ids).await?;

    let property_names = map_by_id_field(&properties, "name");
    let unit_identifiers = map_by_id_field(&units, "unit_identifier");

    let mut enriched = Vec::with_capacity(rows.len());
    for mut row in rows {
        if let Some(obj) = row.as_object_mut() {
            let property_name = obj
                .get("property_id")
                .and_then(Value::as_str)
                .and_then(|id| property_names.get(id))
                .cloned();
            obj.insert(
                "property_name".to_string(),
                property_name.map(Value::String).unwrap_or(Value::Null),
            );

            let unit_identifier = obj
                .get("unit_id")
                .and_then(Value::as_str)
                .and_then(|id| unit_identifiers.get(id))
                .cloned();
            obj.insert(
                "unit_identifier".to_string(),
                unit_identifier.map(Value::String).unwrap_or(Value::Null),
            );
        }
        enriched.push(row);
    }

    Ok(enriched)
}

async fn fetch_by_ids(
    pool: &sqlx::PgPool,
    table: &str,
    ids: &HashSet<String>,
) -> AppResult<Vec<Value>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    list_rows(
        pool,
        table,
        Some(&json_map(&[(
            "id",
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        )])),
        std::cmp::max(200, ids.len() as i64),
        0,
        "created_at",
        false,
    )
    .await
}

fn extract_ids(rows: &[Value], key: &str) -> HashSet<String> {
    rows.iter()
        .filter_map(|row| value_opt_str(row, key))
        .collect()
}

fn map_by_id_field(rows: &[Value], field: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for row in rows {
        let Some(id) = value_opt_str(row, "id") else {
            continue;
        };
        let Some(value) = value_opt_str(row, field) else {
            continue;
        };
        values.insert(id, value);
    }
    values
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{normalize_status, validate_lease_fields};

    fn record(entries: &[(&str, Value)]) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        map
    }

    #[test]
    fn rejects_unknown_statuses() {
        let ok = record(&[("status", json!("active"))]);
        assert!(validate_lease_fields(&ok).is_ok());

        let bad = record(&[("status", json!("terminated"))]);
        assert!(validate_lease_fields(&bad).is_err());
    }

    #[test]
    fn normalizes_status_case() {
        let mut payload = record(&[("status", json!("  Active "))]);
        normalize_status(&mut payload);
        assert_eq!(payload.get("status"), Some(&json!("active")));
    }

    #[test]
    fn rejects_inverted_date_ranges() {
        let ok = record(&[
            ("starts_on", json!("2026-01-01")),
            ("ends_on", json!("2026-12-31")),
        ]);
        assert!(validate_lease_fields(&ok).is_ok());

        let same_day = record(&[
            ("starts_on", json!("2026-01-01")),
            ("ends_on", json!("2026-01-01")),
        ]);
        assert!(validate_lease_fields(&same_day).is_ok());

        let inverted = record(&[
            ("starts_on", json!("2026-12-31")),
            ("ends_on", json!("2026-01-01")),
        ]);
        assert!(validate_lease_fields(&inverted).is_err());

        let malformed = record(&[
            ("starts_on", json!("01/01/2026")),
            ("ends_on", json!("2026-12-31")),
        ]);
        assert!(validate_lease_fields(&malformed).is_err());
    }
}
