use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::ownership::{assert_owned_bill, assert_owned_property, db_pool, user_owns_property};
use crate::repository::table_service::{create_row, delete_row, list_rows, update_row};
use crate::routes::ensure_utility_billing_enabled;
use crate::schemas::{
    clamp_limit_in_range, is_valid_bill_month, json_map, non_empty_opt, remove_nulls,
    serialize_to_map, validate_input, value_opt_str, value_str, BillPath, BillsQuery,
    BulkAddBillsInput, CreateBillInput, PropertyPath, SplitPreviewQuery, UnpaidBillsQuery,
    UpdateBillInput,
};
use crate::services::audit::write_audit_log;
use crate::services::charges::{
    build_split_preview, charges_for_bill_id, owner_share, sort_charges_by_unit,
};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/utility-bills",
            axum::routing::get(list_bills).post(create_bill),
        )
        .route("/utility-bills/bulk", axum::routing::post(bulk_add_bills))
        .route("/utility-bills/unpaid", axum::routing::get(unpaid_bills))
        .route(
            "/utility-bills/{bill_id}",
            axum::routing::get(get_bill)
                .patch(update_bill)
                .delete(delete_bill),
        )
        .route(
            "/properties/{property_id}/utilities/split-preview",
            axum::routing::get(split_preview),
        )
}

async fn list_bills(
    State(state): State<AppState>,
    Query(query): Query<BillsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = json_map(&[("user_id", Value::String(user_id))]);
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(bill_month) = non_empty_opt(query.bill_month.as_deref()) {
        filters.insert("bill_month".to_string(), Value::String(bill_month));
    }
    if let Some(utility_type) = non_empty_opt(query.utility_type.as_deref()) {
        filters.insert("utility_type".to_string(), Value::String(utility_type));
    }
    if let Some(landlord_paid) = query.landlord_paid {
        filters.insert(
            "landlord_paid_utility_company".to_string(),
            Value::Bool(landlord_paid),
        );
    }

    let mut bills = list_rows(
        pool,
        "utility_bills",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "bill_month",
        false,
    )
    .await?;

    sort_bills(&mut bills);
    Ok(Json(json!({ "data": bills })))
}

async fn create_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBillInput>,
) -> AppResult<impl IntoResponse> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    validate_bill_amount(payload.total_amount)?;
    validate_bill_month(&payload.bill_month)?;
    assert_owned_property(pool, &payload.property_id, &user_id).await?;
    ensure_no_duplicate_bill(
        pool,
        &payload.property_id,
        &payload.utility_type,
        &payload.bill_month,
    )
    .await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("user_id".to_string(), Value::String(user_id.clone()));
    record.insert(
        "landlord_paid_utility_company".to_string(),
        Value::Bool(false),
    );

    let created = create_row(pool, "utility_bills", &record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "utility_bills",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

/// Bulk entry for one property and month. Items are independent: failures
/// are collected per utility type and do not roll back earlier inserts.
async fn bulk_add_bills(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BulkAddBillsInput>,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    validate_bill_month(&payload.bill_month)?;
    assert_owned_property(pool, &payload.property_id, &user_id).await?;

    let mut created_bill_ids = Vec::new();
    let mut errors = Vec::new();

    for item in &payload.bills {
        if item.total_amount <= 0.0 {
            errors.push(json!({
                "utility_type": item.utility_type,
                "error": "Bill amount must be greater than 0."
            }));
            continue;
        }
        if let Err(error) = ensure_no_duplicate_bill(
            pool,
            &payload.property_id,
            &item.utility_type,
            &payload.bill_month,
        )
        .await
        {
            errors.push(json!({
                "utility_type": item.utility_type,
                "error": error.to_string()
            }));
            continue;
        }

        let mut record = remove_nulls(serialize_to_map(item));
        record.insert("user_id".to_string(), Value::String(user_id.clone()));
        record.insert(
            "property_id".to_string(),
            Value::String(payload.property_id.clone()),
        );
        record.insert(
            "bill_month".to_string(),
            Value::String(payload.bill_month.clone()),
        );
        record.insert(
            "landlord_paid_utility_company".to_string(),
            Value::Bool(false),
        );

        match create_row(pool, "utility_bills", &record).await {
            Ok(created) => created_bill_ids.push(Value::String(value_str(&created, "id"))),
            Err(error) => errors.push(json!({
                "utility_type": item.utility_type,
                "error": error.to_string()
            })),
        }
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "bulk_create",
        "utility_bills",
        Some(&payload.property_id),
        None,
        Some(json!({
            "bill_month": payload.bill_month,
            "created": created_bill_ids.len(),
            "errors": errors.len()
        })),
    )
    .await;

    let success = errors.is_empty();
    Ok(Json(json!({
        "created_bill_ids": created_bill_ids,
        "errors": errors,
        "success": success
    })))
}

async fn unpaid_bills(
    State(state): State<AppState>,
    Query(query): Query<UnpaidBillsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = json_map(&[
        ("user_id", Value::String(user_id)),
        ("landlord_paid_utility_company", Value::Bool(false)),
    ]);
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }

    let bills = list_rows(
        pool,
        "utility_bills",
        Some(&filters),
        2000,
        0,
        "due_date",
        true,
    )
    .await?;

    let property_ids: HashSet<String> = bills
        .iter()
        .filter_map(|bill| value_opt_str(bill, "property_id"))
        .collect();
    let property_names = fetch_property_names(pool, &property_ids).await?;

    let annotated = bills
        .into_iter()
        .map(|mut bill| {
            let property_name = value_opt_str(&bill, "property_id")
                .and_then(|id| property_names.get(&id))
                .cloned();
            if let Some(obj) = bill.as_object_mut() {
                obj.insert(
                    "property_name".to_string(),
                    property_name.map(Value::String).unwrap_or(Value::Null),
                );
            }
            bill
        })
        .collect::<Vec<_>>();

    Ok(Json(json!({ "data": annotated })))
}

async fn get_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let bill = assert_owned_bill(pool, &path.bill_id, &user_id).await?;

    let mut charges = charges_for_bill_id(pool, &path.bill_id, &user_id)
        .await?
        .unwrap_or_default();
    sort_charges_by_unit(&mut charges);

    let total_amount = crate::schemas::value_f64(&bill, "total_amount");
    let (owner_amount, owner_percentage) = owner_share(total_amount, &charges);

    let mut response = bill.as_object().cloned().unwrap_or_default();
    response.insert(
        "charges".to_string(),
        serde_json::to_value(&charges).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
    response.insert("owner_amount".to_string(), json!(owner_amount));
    response.insert("owner_percentage".to_string(), json!(owner_percentage));

    Ok(Json(Value::Object(response)))
}

async fn update_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBillInput>,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = assert_owned_bill(pool, &path.bill_id, &user_id).await?;

    if let Some(total_amount) = payload.total_amount {
        validate_bill_amount(total_amount)?;
    }
    if let Some(bill_month) = payload.bill_month.as_deref() {
        validate_bill_month(bill_month)?;
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "utility_bills", &path.bill_id, &patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "utility_bills",
        Some(&path.bill_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    assert_owned_bill(pool, &path.bill_id, &user_id).await?;

    // Charges are derived, so deleting the bill is all the cleanup there is.
    let deleted = delete_row(pool, "utility_bills", &path.bill_id).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "utility_bills",
        Some(&path.bill_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(json!({ "deleted": deleted })))
}

/// What-if split of a hypothetical bill amount against the property's
/// current settings, for the bill-entry form.
async fn split_preview(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    Query(query): Query<SplitPreviewQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;

    if !user_owns_property(&state, &user_id, &path.property_id).await? {
        return Err(AppError::NotFound("properties record not found.".to_string()));
    }
    let pool = db_pool(&state)?;

    let leases = list_rows(
        pool,
        "leases",
        Some(&json_map(&[
            ("property_id", Value::String(path.property_id.clone())),
            ("status", Value::String("active".to_string())),
        ])),
        1000,
        0,
        "created_at",
        true,
    )
    .await?;

    let lease_ids: Vec<Value> = leases
        .iter()
        .map(|lease| Value::String(value_str(lease, "id")))
        .collect();
    let settings = if lease_ids.is_empty() {
        Vec::new()
    } else {
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

    let unit_ids: HashSet<String> = leases
        .iter()
        .filter_map(|lease| value_opt_str(lease, "unit_id"))
        .collect();
    let unit_identifiers = fetch_unit_identifiers(pool, &unit_ids).await?;

    let preview = build_split_preview(
        query.total_amount,
        &query.utility_type,
        &leases,
        &settings,
        &unit_identifiers,
    );

    Ok(Json(serde_json::to_value(&preview).unwrap_or_default()))
}

fn validate_bill_amount(total_amount: f64) -> AppResult<()> {
    if total_amount <= 0.0 {
        return Err(AppError::BadRequest(
            "Bill amount must be greater than 0.".to_string(),
        ));
    }
    Ok(())
}

fn validate_bill_month(bill_month: &str) -> AppResult<()> {
    if !is_valid_bill_month(bill_month) {
        return Err(AppError::BadRequest(
            "Bill month must be in YYYY-MM format.".to_string(),
        ));
    }
    Ok(())
}

async fn ensure_no_duplicate_bill(
    pool: &sqlx::PgPool,
    property_id: &str,
    utility_type: &str,
    bill_month: &str,
) -> AppResult<()> {
    let existing = list_rows(
        pool,
        "utility_bills",
        Some(&json_map(&[
            ("property_id", Value::String(property_id.to_string())),
            ("utility_type", Value::String(utility_type.to_string())),
            ("bill_month", Value::String(bill_month.to_string())),
        ])),
        1,
        0,
        "created_at",
        false,
    )
    .await?;

    if existing.is_empty() {
        return Ok(());
    }
    Err(AppError::Conflict(format!(
        "A {utility_type} bill for {bill_month} already exists."
    )))
}

fn sort_bills(bills: &mut [Value]) {
    bills.sort_by(|a, b| {
        value_str(b, "bill_month")
            .cmp(&value_str(a, "bill_month"))
            .then_with(|| value_str(a, "utility_type").cmp(&value_str(b, "utility_type")))
    });
}

async fn fetch_property_names(
    pool: &sqlx::PgPool,
    ids: &HashSet<String>,
) -> AppResult<HashMap<String, String>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let properties = list_rows(
        pool,
        "properties",
        Some(&json_map(&[(
            "id",
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        )])),
        std::cmp::max(200, ids.len() as i64),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(properties
        .iter()
        .filter_map(|property| {
            let id = value_opt_str(property, "id")?;
            let name = value_opt_str(property, "name")?;
            Some((id, name))
        })
        .collect())
}

async fn fetch_unit_identifiers(
    pool: &sqlx::PgPool,
    ids: &HashSet<String>,
) -> AppResult<HashMap<String, String>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let units = list_rows(
        pool,
        "units",
        Some(&json_map(&[(
            "id",
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        )])),
        std::cmp::max(200, ids.len() as i64),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(units
        .iter()
        .filter_map(|unit| {
            let id = value_opt_str(unit, "id")?;
            let identifier = value_opt_str(unit, "unit_identifier")?;
            Some((id, identifier))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{sort_bills, validate_bill_amount, validate_bill_month};

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(validate_bill_amount(0.01).is_ok());
        assert!(validate_bill_amount(0.0).is_err());
        assert!(validate_bill_amount(-5.0).is_err());
    }

    #[test]
    fn rejects_malformed_months() {
        assert!(validate_bill_month("2026-02").is_ok());
        assert!(validate_bill_month("2026-2").is_err());
        assert!(validate_bill_month("February").is_err());
    }

    #[test]
    fn sorts_month_desc_then_type_asc() {
        let mut bills = vec![
            json!({ "bill_month": "2026-01", "utility_type": "Water" }),
            json!({ "bill_month": "2026-02", "utility_type": "Electric" }),
            json!({ "bill_month": "2026-01", "utility_type": "Electric" }),
        ];
        sort_bills(&mut bills);
        let order: Vec<(String, String)> = bills
            .iter()
            .map(|b| {
                (
                    b["bill_month"].as_str().unwrap().to_string(),
                    b["utility_type"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("2026-02".to_string(), "Electric".to_string()),
                ("2026-01".to_string(), "Electric".to_string()),
                ("2026-01".to_string(), "Water".to_string()),
            ]
        );
    }
}
