use std::collections::{BTreeMap, HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::ownership::{assert_owned_bill, assert_owned_lease, db_pool, get_owned_lease};
use crate::repository::table_service::{create_row, list_rows};
use crate::routes::ensure_utility_billing_enabled;
use crate::schemas::{
    clamp_limit_in_range, json_map, non_empty_opt, remove_nulls, serialize_to_map, validate_input,
    value_f64, value_opt_str, value_str, LeasePath, PaymentSummaryQuery, PaymentsQuery,
    RecordPaymentInput,
};
use crate::services::audit::write_audit_log;
use crate::services::charges::{from_cents, to_cents};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/utility-payments",
            axum::routing::get(payment_history).post(record_payment),
        )
        .route(
            "/utility-payments/summary",
            axum::routing::get(payment_summary),
        )
        .route(
            "/leases/{lease_id}/utility-payments",
            axum::routing::get(lease_payments),
        )
}

/// Append a payment to the ledger. The ledger is append-only; there is no
/// update or delete. Overpayments are accepted — the calculated charge
/// clamps its remaining amount at zero on read.
async fn record_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RecordPaymentInput>,
) -> AppResult<impl IntoResponse> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    if payload.amount_paid <= 0.0 {
        return Err(AppError::BadRequest(
            "Payment amount must be greater than 0.".to_string(),
        ));
    }

    let bill = assert_owned_bill(pool, &payload.utility_bill_id, &user_id).await?;
    let lease = assert_owned_lease(pool, &payload.lease_id, &user_id).await?;
    if value_str(&lease, "property_id") != value_str(&bill, "property_id") {
        return Err(AppError::BadRequest(
            "Lease does not belong to the bill's property.".to_string(),
        ));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "tenant_name".to_string(),
        Value::String(value_str(&lease, "tenant_name")),
    );

    let created = create_row(pool, "utility_payments", &record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "utility_payments",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn payment_history(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let payments = fetch_user_payments(
        pool,
        &user_id,
        non_empty_opt(query.property_id.as_deref()).as_deref(),
        non_empty_opt(query.lease_id.as_deref()).as_deref(),
        non_empty_opt(query.start_date.as_deref()).as_deref(),
        non_empty_opt(query.end_date.as_deref()).as_deref(),
        clamp_limit_in_range(query.limit, 1, 2000),
    )
    .await?;

    Ok(Json(json!({ "data": payments })))
}

async fn payment_summary(
    State(state): State<AppState>,
    Query(query): Query<PaymentSummaryQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let payments = fetch_user_payments(
        pool,
        &user_id,
        non_empty_opt(query.property_id.as_deref()).as_deref(),
        non_empty_opt(query.lease_id.as_deref()).as_deref(),
        None,
        None,
        2000,
    )
    .await?;

    let current_month = Utc::now().format("%Y-%m").to_string();
    let summary = summarize_payments(&payments, &current_month);
    Ok(Json(serde_json::to_value(&summary).unwrap_or_default()))
}

async fn lease_payments(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    if get_owned_lease(pool, &path.lease_id, &user_id).await?.is_none() {
        return Ok(Json(json!({ "data": [] })));
    }

    let payments = list_rows(
        pool,
        "utility_payments",
        Some(&json_map(&[(
            "lease_id",
            Value::String(path.lease_id.clone()),
        )])),
        2000,
        0,
        "payment_date",
        false,
    )
    .await?;

    let bill_ids: HashSet<String> = payments
        .iter()
        .filter_map(|payment| value_opt_str(payment, "utility_bill_id"))
        .collect();
    let bills = fetch_bills_by_ids(pool, &bill_ids).await?;

    let annotated = payments
        .into_iter()
        .map(|payment| annotate_payment(payment, &bills, &HashMap::new()))
        .collect::<Vec<_>>();

    Ok(Json(json!({ "data": annotated })))
}

/// Payments carry no owner column; ownership flows through the bill. Fetch
/// the user's bills first, then the payments recorded against them.
async fn fetch_user_payments(
    pool: &sqlx::PgPool,
    user_id: &str,
    property_id: Option<&str>,
    lease_id: Option<&str>,
    start_date: Option<&str>,
    end_date: Option<&str>,
    limit: i64,
) -> AppResult<Vec<Value>> {
    let mut bill_filters = json_map(&[("user_id", Value::String(user_id.to_string()))]);
    if let Some(property_id) = property_id {
        bill_filters.insert(
            "property_id".to_string(),
            Value::String(property_id.to_string()),
        );
    }
    let bill_rows = list_rows(
        pool,
        "utility_bills",
        Some(&bill_filters),
        5000,
        0,
        "bill_month",
        false,
    )
    .await?;
    if bill_rows.is_empty() {
        return Ok(Vec::new());
    }

    let bills: HashMap<String, Value> = bill_rows
        .into_iter()
        .filter_map(|bill| value_opt_str(&bill, "id").map(|id| (id, bill)))
        .collect();

    let mut filters = json_map(&[(
        "utility_bill_id",
        Value::Array(bills.keys().cloned().map(Value::String).collect()),
    )]);
    if let Some(lease_id) = lease_id {
        filters.insert("lease_id".to_string(), Value::String(lease_id.to_string()));
    }
    if let Some(start_date) = start_date {
        filters.insert(
            "payment_date__gte".to_string(),
            Value::String(start_date.to_string()),
        );
    }
    if let Some(end_date) = end_date {
        filters.insert(
            "payment_date__lte".to_string(),
            Value::String(end_date.to_string()),
        );
    }

    let payments = list_rows(
        pool,
        "utility_payments",
        Some(&filters),
        limit,
        0,
        "payment_date",
        false,
    )
    .await?;

    let property_ids: HashSet<String> = bills
        .values()
        .filter_map(|bill| value_opt_str(bill, "property_id"))
        .collect();
    let property_names = fetch_property_names(pool, &property_ids).await?;

    Ok(payments
        .into_iter()
        .map(|payment| annotate_payment(payment, &bills, &property_names))
        .collect())
}

fn annotate_payment(
    mut payment: Value,
    bills: &HashMap<String, Value>,
    property_names: &HashMap<String, String>,
) -> Value {
    let bill = value_opt_str(&payment, "utility_bill_id").and_then(|id| bills.get(&id));
    if let Some(obj) = payment.as_object_mut() {
        if let Some(bill) = bill {
            obj.insert(
                "utility_type".to_string(),
                Value::String(value_str(bill, "utility_type")),
            );
            obj.insert(
                "bill_month".to_string(),
                Value::String(value_str(bill, "bill_month")),
            );
            let property_name = value_opt_str(bill, "property_id")
                .and_then(|id| property_names.get(&id))
                .cloned();
            if let Some(property_name) = property_name {
                obj.insert("property_name".to_string(), Value::String(property_name));
            }
        }
    }
    payment
}

async fn fetch_bills_by_ids(
    pool: &sqlx::PgPool,
    ids: &HashSet<String>,
) -> AppResult<HashMap<String, Value>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let bills = list_rows(
        pool,
        "utility_bills",
        Some(&json_map(&[(
            "id",
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        )])),
        std::cmp::max(200, ids.len() as i64),
        0,
        "bill_month",
        false,
    )
    .await?;
    Ok(bills
        .into_iter()
        .filter_map(|bill| value_opt_str(&bill, "id").map(|id| (id, bill)))
        .collect())
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

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
struct MethodBreakdown {
    total: f64,
    count: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
struct PaymentSummary {
    total_collected: f64,
    payment_count: usize,
    this_month_total: f64,
    this_month_count: usize,
    average_payment: f64,
    last_payment_date: Option<String>,
    last_payment_amount: Option<f64>,
    by_method: BTreeMap<String, MethodBreakdown>,
}

fn summarize_payments(payments: &[Value], current_month: &str) -> PaymentSummary {
    let mut total_cents = 0i64;
    let mut this_month_cents = 0i64;
    let mut this_month_count = 0usize;
    let mut by_method_cents: BTreeMap<String, (i64, usize)> = BTreeMap::new();
    let mut last: Option<(&str, i64)> = None;

    for payment in payments {
        let cents = to_cents(value_f64(payment, "amount_paid"));
        total_cents += cents;

        let payment_date = payment
            .as_object()
            .and_then(|obj| obj.get("payment_date"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if payment_date.starts_with(current_month) {
            this_month_cents += cents;
            this_month_count += 1;
        }

        let method = value_str(payment, "payment_method");
        let entry = by_method_cents.entry(method).or_insert((0, 0));
        entry.0 += cents;
        entry.1 += 1;

        if last.is_none_or(|(date, _)| payment_date > date) {
            last = Some((payment_date, cents));
        }
    }

    let payment_count = payments.len();
    let average_cents = if payment_count > 0 {
        ((total_cents as f64) / (payment_count as f64)).round() as i64
    } else {
        0
    };

    PaymentSummary {
        total_collected: from_cents(total_cents),
        payment_count,
        this_month_total: from_cents(this_month_cents),
        this_month_count,
        average_payment: from_cents(average_cents),
        last_payment_date: last
            .map(|(date, _)| date.to_string())
            .filter(|date| !date.is_empty()),
        last_payment_amount: last.map(|(_, cents)| from_cents(cents)),
        by_method: by_method_cents
            .into_iter()
            .map(|(method, (cents, count))| {
                (
                    method,
                    MethodBreakdown {
                        total: from_cents(cents),
                        count,
                    },
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::summarize_payments;

    fn payment(amount: f64, date: &str, method: &str) -> Value {
        json!({
            "amount_paid": amount,
            "payment_date": date,
            "payment_method": method,
        })
    }

    #[test]
    fn summarizes_totals_and_method_breakdown() {
        let payments = vec![
            payment(50.0, "2026-03-02", "transfer"),
            payment(25.5, "2026-03-15", "cash"),
            payment(100.0, "2026-02-28", "transfer"),
        ];
        let summary = summarize_payments(&payments, "2026-03");

        assert_eq!(summary.total_collected, 175.5);
        assert_eq!(summary.payment_count, 3);
        assert_eq!(summary.this_month_total, 75.5);
        assert_eq!(summary.this_month_count, 2);
        assert_eq!(summary.average_payment, 58.5);
        assert_eq!(summary.last_payment_date.as_deref(), Some("2026-03-15"));
        assert_eq!(summary.last_payment_amount, Some(25.5));
        assert_eq!(summary.by_method["transfer"].total, 150.0);
        assert_eq!(summary.by_method["transfer"].count, 2);
        assert_eq!(summary.by_method["cash"].count, 1);
    }

    #[test]
    fn summarizes_empty_ledger() {
        let summary = summarize_payments(&[], "2026-03");
        assert_eq!(summary.total_collected, 0.0);
        assert_eq!(summary.payment_count, 0);
        assert_eq!(summary.average_payment, 0.0);
        assert!(summary.last_payment_date.is_none());
        assert!(summary.by_method.is_empty());
    }
}
