use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::ownership::{assert_owned_lease, db_pool, get_owned_lease, user_owns_property};
use crate::repository::table_service::{create_row, delete_rows, list_rows, update_row};
use crate::routes::ensure_utility_billing_enabled;
use crate::schemas::{
    json_map, validate_input, value_f64, value_opt_str, value_str, CopyLeaseUtilitiesInput,
    LeasePath, PropertyPath, SetLeaseUtilitiesInput, UtilitySettingInput,
};
use crate::services::audit::write_audit_log;
use crate::services::charges::COMMON_UTILITY_TYPES;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/leases/{lease_id}/utilities",
            axum::routing::get(list_settings)
                .put(replace_settings)
                .post(upsert_setting),
        )
        .route(
            "/leases/{lease_id}/utilities/copy",
            axum::routing::post(copy_settings),
        )
        .route(
            "/properties/{property_id}/utilities/settings",
            axum::routing::get(property_settings),
        )
        .route(
            "/properties/{property_id}/utilities/allocation",
            axum::routing::get(property_allocation),
        )
}

async fn list_settings(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    // Reads soft-fail to an empty list for unknown/foreign leases.
    if get_owned_lease(pool, &path.lease_id, &user_id).await?.is_none() {
        return Ok(Json(json!({ "data": [] })));
    }

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

    Ok(Json(json!({ "data": settings })))
}

/// Replace the lease's full set of responsibility settings. Entries with a
/// zero percentage are omitted from storage rather than written.
async fn replace_settings(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<SetLeaseUtilitiesInput>,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    assert_owned_lease(pool, &path.lease_id, &user_id).await?;

    delete_rows(
        pool,
        "lease_utility_settings",
        &json_map(&[("lease_id", Value::String(path.lease_id.clone()))]),
    )
    .await?;

    let mut created = Vec::new();
    for utility in &payload.utilities {
        if utility.responsibility_percentage <= 0.0 {
            continue;
        }
        created.push(create_setting_row(pool, &path.lease_id, utility).await?);
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "replace",
        "lease_utility_settings",
        Some(&path.lease_id),
        None,
        Some(Value::Array(created.clone())),
    )
    .await;

    Ok(Json(json!({ "data": created })))
}

/// Upsert a single (lease, utility type) setting; percentage 0 removes it.
async fn upsert_setting(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<UtilitySettingInput>,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    assert_owned_lease(pool, &path.lease_id, &user_id).await?;

    let pair_filter = json_map(&[
        ("lease_id", Value::String(path.lease_id.clone())),
        ("utility_type", Value::String(payload.utility_type.clone())),
    ]);

    if payload.responsibility_percentage <= 0.0 {
        let removed = delete_rows(pool, "lease_utility_settings", &pair_filter).await?;
        write_audit_log(
            state.db_pool.as_ref(),
            Some(&user_id),
            "remove",
            "lease_utility_settings",
            Some(&path.lease_id),
            None,
            Some(json!({ "utility_type": payload.utility_type, "removed": removed })),
        )
        .await;
        return Ok(Json(json!({ "removed": removed > 0 })));
    }

    let existing = list_rows(pool, "lease_utility_settings", Some(&pair_filter), 1, 0, "created_at", true).await?;

    let saved = if let Some(current) = existing.first() {
        let mut patch = Map::new();
        patch.insert(
            "responsibility_percentage".to_string(),
            json!(payload.responsibility_percentage),
        );
        if let Some(notes) = &payload.notes {
            patch.insert("notes".to_string(), Value::String(notes.clone()));
        }
        update_row(
            pool,
            "lease_utility_settings",
            &value_str(current, "id"),
            &patch,
        )
        .await?
    } else {
        create_setting_row(pool, &path.lease_id, &payload).await?
    };

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "upsert",
        "lease_utility_settings",
        Some(&value_str(&saved, "id")),
        None,
        Some(saved.clone()),
    )
    .await;

    Ok(Json(saved))
}

async fn copy_settings(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<CopyLeaseUtilitiesInput>,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    assert_owned_lease(pool, &path.lease_id, &user_id).await?;
    assert_owned_lease(pool, &payload.from_lease_id, &user_id).await?;

    let source_settings = list_rows(
        pool,
        "lease_utility_settings",
        Some(&json_map(&[(
            "lease_id",
            Value::String(payload.from_lease_id.clone()),
        )])),
        500,
        0,
        "utility_type",
        true,
    )
    .await?;
    if source_settings.is_empty() {
        return Err(AppError::NotFound(
            "No utility settings found in source lease.".to_string(),
        ));
    }

    delete_rows(
        pool,
        "lease_utility_settings",
        &json_map(&[("lease_id", Value::String(path.lease_id.clone()))]),
    )
    .await?;

    let mut created = Vec::new();
    for setting in &source_settings {
        let mut record = Map::new();
        record.insert("lease_id".to_string(), Value::String(path.lease_id.clone()));
        record.insert(
            "utility_type".to_string(),
            Value::String(value_str(setting, "utility_type")),
        );
        record.insert(
            "responsibility_percentage".to_string(),
            json!(value_f64(setting, "responsibility_percentage")),
        );
        if let Some(notes) = value_opt_str(setting, "notes") {
            record.insert("notes".to_string(), Value::String(notes));
        }
        created.push(create_row(pool, "lease_utility_settings", &record).await?);
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "copy",
        "lease_utility_settings",
        Some(&path.lease_id),
        None,
        Some(json!({ "from_lease_id": payload.from_lease_id, "copied": created.len() })),
    )
    .await;

    Ok(Json(json!({ "data": created })))
}

async fn property_settings(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;

    if !user_owns_property(&state, &user_id, &path.property_id).await? {
        return Ok(Json(json!({ "data": [] })));
    }
    let pool = db_pool(&state)?;

    let leases = property_leases(pool, &path.property_id, None).await?;
    if leases.is_empty() {
        return Ok(Json(json!({ "data": [] })));
    }

    let lease_ids: Vec<Value> = leases
        .iter()
        .map(|lease| Value::String(value_str(lease, "id")))
        .collect();
    let settings = list_rows(
        pool,
        "lease_utility_settings",
        Some(&json_map(&[("lease_id", Value::Array(lease_ids))])),
        2000,
        0,
        "utility_type",
        true,
    )
    .await?;

    let lease_info: HashMap<String, &Value> = leases
        .iter()
        .map(|lease| (value_str(lease, "id"), lease))
        .collect();

    let mut annotated = Vec::with_capacity(settings.len());
    for mut setting in settings {
        let lease_id = value_str(&setting, "lease_id");
        if let (Some(obj), Some(lease)) = (setting.as_object_mut(), lease_info.get(&lease_id)) {
            obj.insert(
                "tenant_name".to_string(),
                Value::String(value_str(lease, "tenant_name")),
            );
            obj.insert(
                "lease_status".to_string(),
                Value::String(value_str(lease, "status")),
            );
            obj.insert(
                "unit_id".to_string(),
                value_opt_str(lease, "unit_id")
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            );
        }
        annotated.push(setting);
    }

    annotated.sort_by(|a, b| {
        value_str(a, "utility_type")
            .cmp(&value_str(b, "utility_type"))
            .then_with(|| value_str(a, "tenant_name").cmp(&value_str(b, "tenant_name")))
    });

    Ok(Json(json!({ "data": annotated })))
}

/// Advisory per-utility-type allocation health for a property. Nothing here
/// blocks saving an over-allocated configuration; the UI shows a badge.
async fn property_allocation(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;

    if !user_owns_property(&state, &user_id, &path.property_id).await? {
        return Ok(Json(json!({ "data": [] })));
    }
    let pool = db_pool(&state)?;

    let active_leases = property_leases(pool, &path.property_id, Some("active")).await?;
    let settings = if active_leases.is_empty() {
        Vec::new()
    } else {
        let lease_ids: Vec<Value> = active_leases
            .iter()
            .map(|lease| Value::String(value_str(lease, "id")))
            .collect();
        list_rows(
            pool,
            "lease_utility_settings",
            Some(&json_map(&[("lease_id", Value::Array(lease_ids))])),
            2000,
            0,
            "utility_type",
            true,
        )
        .await?
    };

    let overview = allocation_overview(&settings, &active_leases);
    Ok(Json(json!({ "data": overview })))
}

async fn property_leases(
    pool: &sqlx::PgPool,
    property_id: &str,
    status: Option<&str>,
) -> AppResult<Vec<Value>> {
    let mut filters = json_map(&[("property_id", Value::String(property_id.to_string()))]);
    if let Some(status) = status {
        filters.insert("status".to_string(), Value::String(status.to_string()));
    }
    list_rows(pool, "leases", Some(&filters), 1000, 0, "created_at", true).await
}

async fn create_setting_row(
    pool: &sqlx::PgPool,
    lease_id: &str,
    utility: &UtilitySettingInput,
) -> AppResult<Value> {
    let mut record = Map::new();
    record.insert("lease_id".to_string(), Value::String(lease_id.to_string()));
    record.insert(
        "utility_type".to_string(),
        Value::String(utility.utility_type.clone()),
    );
    record.insert(
        "responsibility_percentage".to_string(),
        json!(utility.responsibility_percentage),
    );
    if let Some(notes) = &utility.notes {
        record.insert("notes".to_string(), Value::String(notes.clone()));
    }
    create_row(pool, "lease_utility_settings", &record).await
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
struct LeaseAllocation {
    lease_id: String,
    tenant_name: String,
    responsibility_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
struct UtilityAllocation {
    utility_type: String,
    total_assigned: f64,
    owner_percentage: f64,
    is_complete: bool,
    is_over_allocated: bool,
    leases: Vec<LeaseAllocation>,
}

/// Partial assignment counts as complete (the owner implicitly covers the
/// remainder); only over-allocation is flagged.
fn allocation_overview(settings: &[Value], active_leases: &[Value]) -> Vec<UtilityAllocation> {
    let tenant_names: HashMap<String, String> = active_leases
        .iter()
        .map(|lease| (value_str(lease, "id"), value_str(lease, "tenant_name")))
        .collect();

    let mut utility_types: Vec<String> = COMMON_UTILITY_TYPES
        .iter()
        .map(|name| name.to_string())
        .collect();
    for setting in settings {
        let utility_type = value_str(setting, "utility_type");
        if !utility_type.is_empty() && !utility_types.contains(&utility_type) {
            utility_types.push(utility_type);
        }
    }

    utility_types
        .into_iter()
        .map(|utility_type| {
            let mut leases = Vec::new();
            let mut total_assigned = 0.0;
            for setting in settings {
                if value_str(setting, "utility_type") != utility_type {
                    continue;
                }
                let lease_id = value_str(setting, "lease_id");
                let Some(tenant_name) = tenant_names.get(&lease_id) else {
                    continue;
                };
                let percentage = value_f64(setting, "responsibility_percentage");
                total_assigned += percentage;
                leases.push(LeaseAllocation {
                    lease_id,
                    tenant_name: tenant_name.clone(),
                    responsibility_percentage: percentage,
                });
            }

            UtilityAllocation {
                utility_type,
                total_assigned,
                owner_percentage: (100.0 - total_assigned).max(0.0),
                is_complete: total_assigned <= 100.0,
                is_over_allocated: total_assigned > 100.0,
                leases,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::allocation_overview;

    fn lease(id: &str, tenant_name: &str) -> Value {
        json!({ "id": id, "tenant_name": tenant_name, "status": "active" })
    }

    fn setting(lease_id: &str, utility_type: &str, percentage: f64) -> Value {
        json!({
            "lease_id": lease_id,
            "utility_type": utility_type,
            "responsibility_percentage": percentage,
        })
    }

    #[test]
    fn covers_common_types_even_without_settings() {
        let overview = allocation_overview(&[], &[lease("l1", "Ana")]);
        assert_eq!(overview.len(), 7);
        assert!(overview.iter().all(|entry| entry.total_assigned == 0.0));
        assert!(overview.iter().all(|entry| entry.owner_percentage == 100.0));
        assert!(overview.iter().all(|entry| entry.is_complete));
    }

    #[test]
    fn classifies_full_partial_and_over_allocation() {
        let leases = [lease("l1", "Ana"), lease("l2", "Bruno")];
        let settings = [
            setting("l1", "Electric", 60.0),
            setting("l2", "Electric", 40.0),
            setting("l1", "Water", 30.0),
            setting("l1", "Gas", 70.0),
            setting("l2", "Gas", 50.0),
        ];
        let overview = allocation_overview(&settings, &leases);

        let electric = overview
            .iter()
            .find(|e| e.utility_type == "Electric")
            .expect("Electric present");
        assert_eq!(electric.total_assigned, 100.0);
        assert_eq!(electric.owner_percentage, 0.0);
        assert!(electric.is_complete);
        assert!(!electric.is_over_allocated);

        let water = overview
            .iter()
            .find(|e| e.utility_type == "Water")
            .expect("Water present");
        assert_eq!(water.total_assigned, 30.0);
        assert_eq!(water.owner_percentage, 70.0);
        assert!(water.is_complete);

        let gas = overview
            .iter()
            .find(|e| e.utility_type == "Gas")
            .expect("Gas present");
        assert_eq!(gas.total_assigned, 120.0);
        assert_eq!(gas.owner_percentage, 0.0);
        assert!(!gas.is_complete);
        assert!(gas.is_over_allocated);
    }

    #[test]
    fn includes_custom_utility_types_from_settings() {
        let overview = allocation_overview(
            &[setting("l1", "HOA", 100.0)],
            &[lease("l1", "Ana")],
        );
        let hoa = overview
            .iter()
            .find(|e| e.utility_type == "HOA")
            .expect("custom type present");
        assert_eq!(hoa.total_assigned, 100.0);
        assert_eq!(hoa.leases.len(), 1);
    }

    #[test]
    fn ignores_settings_for_inactive_leases() {
        // Only l1 is in the active set; l2's setting must not count.
        let overview = allocation_overview(
            &[
                setting("l1", "Electric", 50.0),
                setting("l2", "Electric", 50.0),
            ],
            &[lease("l1", "Ana")],
        );
        let electric = overview
            .iter()
            .find(|e| e.utility_type == "Electric")
            .expect("Electric present");
        assert_eq!(electric.total_assigned, 50.0);
        assert_eq!(electric.leases.len(), 1);
    }
}
