use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::ownership::db_pool;
use crate::routes::ensure_utility_billing_enabled;
use crate::schemas::{
    is_valid_bill_month, non_empty_opt, BillPath, ChargesQuery, LeasePath, MonthRangeQuery,
    OutstandingSummaryQuery, PropertyPath,
};
use crate::services::charges::{
    charges_for_bill_id, charges_for_lease, charges_for_property, charges_for_user,
    outstanding_summary, TenantCharge,
};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/utility-charges", axum::routing::get(user_charges))
        .route(
            "/utility-charges/outstanding-summary",
            axum::routing::get(outstanding),
        )
        .route(
            "/utility-bills/{bill_id}/charges",
            axum::routing::get(bill_charges),
        )
        .route(
            "/properties/{property_id}/utility-charges",
            axum::routing::get(property_charges),
        )
        .route(
            "/leases/{lease_id}/utility-charges",
            axum::routing::get(lease_charges),
        )
}

/// Per-tenant charges for one bill. A missing or foreign bill yields an
/// empty list, indistinguishable from "no charges" by design.
async fn bill_charges(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let charges = charges_for_bill_id(pool, &path.bill_id, &user_id)
        .await?
        .unwrap_or_default();
    Ok(Json(charges_response(charges)))
}

async fn property_charges(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    Query(query): Query<MonthRangeQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (start_month, end_month) =
        month_window(query.start_month.as_deref(), query.end_month.as_deref())?;

    let charges = charges_for_property(
        pool,
        &path.property_id,
        &user_id,
        start_month.as_deref(),
        end_month.as_deref(),
    )
    .await?
    .unwrap_or_default();
    Ok(Json(charges_response(charges)))
}

async fn user_charges(
    State(state): State<AppState>,
    Query(query): Query<ChargesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (start_month, end_month) =
        month_window(query.start_month.as_deref(), query.end_month.as_deref())?;
    let property_id = non_empty_opt(query.property_id.as_deref());

    let charges = charges_for_user(
        pool,
        &user_id,
        property_id.as_deref(),
        start_month.as_deref(),
        end_month.as_deref(),
    )
    .await?;
    Ok(Json(charges_response(charges)))
}

async fn lease_charges(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    Query(query): Query<MonthRangeQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (start_month, end_month) =
        month_window(query.start_month.as_deref(), query.end_month.as_deref())?;

    let charges = charges_for_lease(
        pool,
        &path.lease_id,
        &user_id,
        start_month.as_deref(),
        end_month.as_deref(),
    )
    .await?
    .unwrap_or_default();
    Ok(Json(charges_response(charges)))
}

async fn outstanding(
    State(state): State<AppState>,
    Query(query): Query<OutstandingSummaryQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    ensure_utility_billing_enabled(&state)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let property_id = non_empty_opt(query.property_id.as_deref());
    let summary = outstanding_summary(pool, &user_id, property_id.as_deref()).await?;
    Ok(Json(serde_json::to_value(&summary).unwrap_or_default()))
}

fn charges_response(charges: Vec<TenantCharge>) -> Value {
    json!({
        "count": charges.len(),
        "data": charges,
    })
}

fn month_window(
    start_month: Option<&str>,
    end_month: Option<&str>,
) -> AppResult<(Option<String>, Option<String>)> {
    let start_month = non_empty_opt(start_month);
    let end_month = non_empty_opt(end_month);

    for month in [start_month.as_deref(), end_month.as_deref()]
        .into_iter()
        .flatten()
    {
        if !is_valid_bill_month(month) {
            return Err(AppError::BadRequest(format!(
                "Invalid month '{month}'. Expected YYYY-MM."
            )));
        }
    }
    if let (Some(start), Some(end)) = (start_month.as_deref(), end_month.as_deref()) {
        if end < start {
            return Err(AppError::BadRequest(
                "Invalid month window: end_month must be on or after start_month.".to_string(),
            ));
        }
    }

    Ok((start_month, end_month))
}

#[cfg(test)]
mod tests {
    use super::month_window;

    #[test]
    fn accepts_open_and_closed_windows() {
        assert!(month_window(None, None).is_ok());
        assert!(month_window(Some("2026-01"), None).is_ok());
        assert!(month_window(Some("2026-01"), Some("2026-01")).is_ok());
        assert!(month_window(Some(""), Some("2026-03")).is_ok());
    }

    #[test]
    fn rejects_malformed_or_inverted_windows() {
        assert!(month_window(Some("2026-1"), None).is_err());
        assert!(month_window(None, Some("Jan 2026")).is_err());
        assert!(month_window(Some("2026-06"), Some("2026-01")).is_err());
    }
}
