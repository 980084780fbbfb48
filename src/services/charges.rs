//! Utility-bill cost splitting.
//!
//! Charges are never stored: every read recomputes them from the bill, the
//! property's active leases, their responsibility settings, and the payment
//! ledger. The calculation itself is a pure function over pre-fetched rows
//! (`build_charges_for_bill`); the async functions below only assemble its
//! inputs.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::AppError;
use crate::ownership::{get_owned_bill, get_owned_lease, get_owned_property};
use crate::repository::table_service::{get_row, list_rows};
use crate::schemas::{json_map, value_bool, value_f64, value_opt_str, value_str};

pub const COMMON_UTILITY_TYPES: [&str; 7] = [
    "Electric", "Water", "Gas", "Sewer", "Trash", "Internet", "Cable",
];

const SCOPE_ROW_LIMIT: i64 = 5000;

/// One tenant's share of one utility bill, derived at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantCharge {
    pub lease_id: String,
    pub utility_bill_id: String,
    pub tenant_name: String,
    pub utility_type: String,
    pub bill_month: String,
    pub total_bill_amount: f64,
    pub charged_amount: f64,
    pub responsibility_percentage: f64,
    pub due_date: String,
    pub paid_amount: f64,
    pub remaining_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
}

// Money is carried as integer cents through the arithmetic so that sums
// over many line items cannot drift; f64 only appears at the JSON boundary.

pub(crate) fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub(crate) fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

fn prorate_cents(total_cents: i64, percentage: f64) -> i64 {
    ((total_cents as f64) * percentage / 100.0).round() as i64
}

/// Inclusive `YYYY-MM` range check; lexicographic comparison is correct for
/// zero-padded month keys.
pub fn month_in_range(month: &str, start: Option<&str>, end: Option<&str>) -> bool {
    if let Some(start) = start {
        if month < start {
            return false;
        }
    }
    if let Some(end) = end {
        if month > end {
            return false;
        }
    }
    true
}

/// Compute the per-tenant charges for one bill.
///
/// - a historical bill (`no_tenant_charges`) or zero-amount bill produces
///   nothing;
/// - leases that are not `active`, have no setting for the bill's utility
///   type, or have a percentage <= 0 are silently skipped;
/// - each share is prorated independently — misconfigured settings are not
///   clamped or redistributed, over-allocation is only warn-logged;
/// - overpayment clamps `remaining_amount` at zero.
pub fn build_charges_for_bill(
    bill: &Value,
    leases: &[Value],
    settings: &[Value],
    payments: &[Value],
    unit_identifiers: &HashMap<String, String>,
    property_name: Option<&str>,
) -> Vec<TenantCharge> {
    if value_bool(bill, "no_tenant_charges") {
        return Vec::new();
    }

    let total_bill_amount = value_f64(bill, "total_amount");
    if total_bill_amount <= 0.0 {
        return Vec::new();
    }

    let bill_id = value_str(bill, "id");
    let utility_type = value_str(bill, "utility_type");
    let bill_month = value_str(bill, "bill_month");
    let due_date = value_str(bill, "due_date");
    let total_cents = to_cents(total_bill_amount);

    let percentages = responsibility_by_lease(settings, &utility_type);
    let paid_by_lease = paid_cents_by_lease(payments, &bill_id);

    let mut charges = Vec::new();
    for lease in leases {
        if value_str(lease, "status") != "active" {
            continue;
        }
        let lease_id = value_str(lease, "id");
        let Some(&percentage) = percentages.get(&lease_id) else {
            continue;
        };
        if percentage <= 0.0 {
            continue;
        }

        let charged_cents = prorate_cents(total_cents, percentage);
        let paid_cents = paid_by_lease.get(&lease_id).copied().unwrap_or(0);
        let remaining_cents = (charged_cents - paid_cents).max(0);

        charges.push(TenantCharge {
            lease_id: lease_id.clone(),
            utility_bill_id: bill_id.clone(),
            tenant_name: value_str(lease, "tenant_name"),
            utility_type: utility_type.clone(),
            bill_month: bill_month.clone(),
            total_bill_amount,
            charged_amount: from_cents(charged_cents),
            responsibility_percentage: percentage,
            due_date: due_date.clone(),
            paid_amount: from_cents(paid_cents),
            remaining_amount: from_cents(remaining_cents),
            unit_identifier: value_opt_str(lease, "unit_id")
                .and_then(|unit_id| unit_identifiers.get(&unit_id).cloned()),
            property_name: property_name.map(ToOwned::to_owned),
        });
    }

    let total_percentage: f64 = charges
        .iter()
        .map(|charge| charge.responsibility_percentage)
        .sum();
    if total_percentage > 100.0 {
        tracing::warn!(
            bill_id = %bill_id,
            utility_type = %utility_type,
            total_percentage,
            "Responsibility percentages exceed 100% — owner share is negative"
        );
    }

    charges
}

/// Owner's leftover: `(amount, percentage)`. The amount can go negative
/// when settings over-allocate; the percentage is floored at zero.
pub fn owner_share(total_amount: f64, charges: &[TenantCharge]) -> (f64, f64) {
    let assigned_cents: i64 = charges
        .iter()
        .map(|charge| to_cents(charge.charged_amount))
        .sum();
    let assigned_percentage: f64 = charges
        .iter()
        .map(|charge| charge.responsibility_percentage)
        .sum();
    (
        from_cents(to_cents(total_amount) - assigned_cents),
        (100.0 - assigned_percentage).max(0.0),
    )
}

/// Read-path convention: most recent month first, tenant name breaks ties.
pub fn sort_charges(charges: &mut [TenantCharge]) {
    charges.sort_by(|a, b| {
        b.bill_month
            .cmp(&a.bill_month)
            .then_with(|| a.tenant_name.cmp(&b.tenant_name))
    });
}

/// Bill-detail convention: unit identifier when both sides have one,
/// otherwise tenant name.
pub fn sort_charges_by_unit(charges: &mut [TenantCharge]) {
    charges.sort_by(|a, b| match (&a.unit_identifier, &b.unit_identifier) {
        (Some(left), Some(right)) => left.cmp(right),
        _ => a.tenant_name.cmp(&b.tenant_name),
    });
}

fn responsibility_by_lease(settings: &[Value], utility_type: &str) -> HashMap<String, f64> {
    let mut percentages = HashMap::new();
    for setting in settings {
        if value_str(setting, "utility_type") != utility_type {
            continue;
        }
        let lease_id = value_str(setting, "lease_id");
        if lease_id.is_empty() {
            continue;
        }
        // Upsert semantics keep one row per (lease, type); first wins if
        // stale duplicates are ever present.
        percentages
            .entry(lease_id)
            .or_insert_with(|| value_f64(setting, "responsibility_percentage"));
    }
    percentages
}

fn paid_cents_by_lease(payments: &[Value], bill_id: &str) -> HashMap<String, i64> {
    let mut paid = HashMap::new();
    for payment in payments {
        if value_str(payment, "utility_bill_id") != bill_id {
            continue;
        }
        let lease_id = value_str(payment, "lease_id");
        if lease_id.is_empty() {
            continue;
        }
        *paid.entry(lease_id).or_insert(0) += to_cents(value_f64(payment, "amount_paid"));
    }
    paid
}

// ── Fetch plumbing ─────────────────────────────────────────────────

struct ChargeContext {
    leases_by_property: HashMap<String, Vec<Value>>,
    settings: Vec<Value>,
    payments: Vec<Value>,
    unit_identifiers: HashMap<String, String>,
}

async fn load_context(
    pool: &PgPool,
    property_ids: &HashSet<String>,
    bill_ids: &[String],
) -> Result<ChargeContext, AppError> {
    let leases = if property_ids.is_empty() {
        Vec::new()
    } else {
        list_rows(
            pool,
            "leases",
            Some(&json_map(&[
                (
                    "property_id",
                    Value::Array(property_ids.iter().cloned().map(Value::String).collect()),
                ),
                ("status", Value::String("active".to_string())),
            ])),
            SCOPE_ROW_LIMIT,
            0,
            "created_at",
            true,
        )
        .await?
    };

    let lease_ids = collect_ids(&leases, "id");
    let settings = if lease_ids.is_empty() {
        Vec::new()
    } else {
        list_rows(
            pool,
            "lease_utility_settings",
            Some(&json_map(&[(
                "lease_id",
                Value::Array(lease_ids.iter().cloned().map(Value::String).collect()),
            )])),
            SCOPE_ROW_LIMIT,
            0,
            "created_at",
            true,
        )
        .await?
    };

    let payments = if bill_ids.is_empty() {
        Vec::new()
    } else {
        list_rows(
            pool,
            "utility_payments",
            Some(&json_map(&[(
                "utility_bill_id",
                Value::Array(bill_ids.iter().cloned().map(Value::String).collect()),
            )])),
            SCOPE_ROW_LIMIT,
            0,
            "created_at",
            true,
        )
        .await?
    };

    let unit_ids = collect_ids(&leases, "unit_id");
    let unit_identifiers = if unit_ids.is_empty() {
        HashMap::new()
    } else {
        let units = list_rows(
            pool,
            "units",
            Some(&json_map(&[(
                "id",
                Value::Array(unit_ids.iter().cloned().map(Value::String).collect()),
            )])),
            SCOPE_ROW_LIMIT,
            0,
            "created_at",
            true,
        )
        .await?;
        units
            .iter()
            .filter_map(|unit| {
                let id = value_opt_str(unit, "id")?;
                let identifier = value_opt_str(unit, "unit_identifier")?;
                Some((id, identifier))
            })
            .collect()
    };

    let mut leases_by_property: HashMap<String, Vec<Value>> = HashMap::new();
    for lease in leases {
        let property_id = value_str(&lease, "property_id");
        if property_id.is_empty() {
            continue;
        }
        leases_by_property.entry(property_id).or_default().push(lease);
    }

    Ok(ChargeContext {
        leases_by_property,
        settings,
        payments,
        unit_identifiers,
    })
}

async fn charges_for_bills(
    pool: &PgPool,
    bills: &[Value],
    property_names: &HashMap<String, String>,
) -> Result<Vec<TenantCharge>, AppError> {
    if bills.is_empty() {
        return Ok(Vec::new());
    }

    let property_ids = collect_ids(bills, "property_id");
    let bill_ids = collect_ids(bills, "id").into_iter().collect::<Vec<_>>();
    let context = load_context(pool, &property_ids, &bill_ids).await?;

    let mut all = Vec::new();
    for bill in bills {
        let property_id = value_str(bill, "property_id");
        let leases = context
            .leases_by_property
            .get(&property_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        all.extend(build_charges_for_bill(
            bill,
            leases,
            &context.settings,
            &context.payments,
            &context.unit_identifiers,
            property_names.get(&property_id).map(String::as_str),
        ));
    }

    sort_charges(&mut all);
    Ok(all)
}

async fn fetch_bills(
    pool: &PgPool,
    user_id: &str,
    property_id: Option<&str>,
    start_month: Option<&str>,
    end_month: Option<&str>,
) -> Result<Vec<Value>, AppError> {
    let mut filters = json_map(&[("user_id", Value::String(user_id.to_string()))]);
    if let Some(property_id) = property_id {
        filters.insert(
            "property_id".to_string(),
            Value::String(property_id.to_string()),
        );
    }

    let bills = list_rows(
        pool,
        "utility_bills",
        Some(&filters),
        SCOPE_ROW_LIMIT,
        0,
        "bill_month",
        false,
    )
    .await?;

    Ok(bills
        .into_iter()
        .filter(|bill| month_in_range(&value_str(bill, "bill_month"), start_month, end_month))
        .collect())
}

async fn property_names_for_user(
    pool: &PgPool,
    user_id: &str,
) -> Result<HashMap<String, String>, AppError> {
    let properties = list_rows(
        pool,
        "properties",
        Some(&json_map(&[(
            "user_id",
            Value::String(user_id.to_string()),
        )])),
        SCOPE_ROW_LIMIT,
        0,
        "created_at",
        true,
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

fn collect_ids(rows: &[Value], key: &str) -> HashSet<String> {
    rows.iter()
        .filter_map(|row| value_opt_str(row, key))
        .collect()
}

// ── Read operations ────────────────────────────────────────────────
//
// Each returns `Ok(None)` when the scoping record is missing or owned by
// another user; routes surface that as an empty result.

pub async fn charges_for_bill_id(
    pool: &PgPool,
    bill_id: &str,
    user_id: &str,
) -> Result<Option<Vec<TenantCharge>>, AppError> {
    let Some(bill) = get_owned_bill(pool, bill_id, user_id).await? else {
        return Ok(None);
    };

    let property_id = value_str(&bill, "property_id");
    let mut property_names = HashMap::new();
    if !property_id.is_empty() {
        if let Ok(property) = get_row(pool, "properties", &property_id).await {
            if let Some(name) = value_opt_str(&property, "name") {
                property_names.insert(property_id.clone(), name);
            }
        }
    }

    let charges = charges_for_bills(pool, std::slice::from_ref(&bill), &property_names).await?;
    Ok(Some(charges))
}

pub async fn charges_for_property(
    pool: &PgPool,
    property_id: &str,
    user_id: &str,
    start_month: Option<&str>,
    end_month: Option<&str>,
) -> Result<Option<Vec<TenantCharge>>, AppError> {
    let Some(property) = get_owned_property(pool, property_id, user_id).await? else {
        return Ok(None);
    };

    let bills = fetch_bills(pool, user_id, Some(property_id), start_month, end_month).await?;
    let mut property_names = HashMap::new();
    if let Some(name) = value_opt_str(&property, "name") {
        property_names.insert(property_id.to_string(), name);
    }

    let charges = charges_for_bills(pool, &bills, &property_names).await?;
    Ok(Some(charges))
}

pub async fn charges_for_user(
    pool: &PgPool,
    user_id: &str,
    property_id: Option<&str>,
    start_month: Option<&str>,
    end_month: Option<&str>,
) -> Result<Vec<TenantCharge>, AppError> {
    if let Some(property_id) = property_id {
        return Ok(
            charges_for_property(pool, property_id, user_id, start_month, end_month)
                .await?
                .unwrap_or_default(),
        );
    }

    let bills = fetch_bills(pool, user_id, None, start_month, end_month).await?;
    let property_names = property_names_for_user(pool, user_id).await?;
    charges_for_bills(pool, &bills, &property_names).await
}

pub async fn charges_for_lease(
    pool: &PgPool,
    lease_id: &str,
    user_id: &str,
    start_month: Option<&str>,
    end_month: Option<&str>,
) -> Result<Option<Vec<TenantCharge>>, AppError> {
    let Some(lease) = get_owned_lease(pool, lease_id, user_id).await? else {
        return Ok(None);
    };

    let property_id = value_str(&lease, "property_id");
    let bills = fetch_bills(pool, user_id, Some(&property_id), start_month, end_month).await?;
    if bills.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let settings = list_rows(
        pool,
        "lease_utility_settings",
        Some(&json_map(&[(
            "lease_id",
            Value::String(lease_id.to_string()),
        )])),
        SCOPE_ROW_LIMIT,
        0,
        "created_at",
        true,
    )
    .await?;
    let payments = list_rows(
        pool,
        "utility_payments",
        Some(&json_map(&[(
            "lease_id",
            Value::String(lease_id.to_string()),
        )])),
        SCOPE_ROW_LIMIT,
        0,
        "created_at",
        true,
    )
    .await?;

    let mut unit_identifiers = HashMap::new();
    if let Some(unit_id) = value_opt_str(&lease, "unit_id") {
        if let Ok(unit) = get_row(pool, "units", &unit_id).await {
            if let Some(identifier) = value_opt_str(&unit, "unit_identifier") {
                unit_identifiers.insert(unit_id, identifier);
            }
        }
    }

    let mut property_names = HashMap::new();
    if !property_id.is_empty() {
        if let Ok(property) = get_row(pool, "properties", &property_id).await {
            if let Some(name) = value_opt_str(&property, "name") {
                property_names.insert(property_id.clone(), name);
            }
        }
    }

    let scoped_leases = [lease];
    let mut charges = Vec::new();
    for bill in &bills {
        charges.extend(build_charges_for_bill(
            bill,
            &scoped_leases,
            &settings,
            &payments,
            &unit_identifiers,
            property_names.get(&property_id).map(String::as_str),
        ));
    }

    sort_charges(&mut charges);
    Ok(Some(charges))
}

// ── Outstanding summary ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OldestCharge {
    pub lease_id: String,
    pub utility_bill_id: String,
    pub tenant_name: String,
    pub utility_type: String,
    pub bill_month: String,
    pub remaining_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutstandingSummary {
    pub total_outstanding: f64,
    pub total_charges: usize,
    pub by_utility_type: BTreeMap<String, f64>,
    pub by_property: BTreeMap<String, f64>,
    pub by_tenant: BTreeMap<String, f64>,
    pub oldest_charge: Option<OldestCharge>,
}

/// Reduce calculated charges to the dashboard rollup. Only charges with a
/// positive remaining amount participate; the whole scope is reduced in
/// memory, which is fine at single-landlord data volumes.
pub fn summarize_outstanding(charges: &[TenantCharge]) -> OutstandingSummary {
    let mut total_cents = 0i64;
    let mut total_charges = 0usize;
    let mut by_utility_type: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_property: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_tenant: BTreeMap<String, i64> = BTreeMap::new();
    let mut oldest: Option<&TenantCharge> = None;

    for charge in charges {
        if charge.remaining_amount <= 0.0 {
            continue;
        }
        let remaining_cents = to_cents(charge.remaining_amount);
        total_cents += remaining_cents;
        total_charges += 1;

        *by_utility_type
            .entry(charge.utility_type.clone())
            .or_insert(0) += remaining_cents;
        let property_key = charge
            .property_name
            .clone()
            .unwrap_or_else(|| "Unknown Property".to_string());
        *by_property.entry(property_key).or_insert(0) += remaining_cents;
        *by_tenant.entry(charge.tenant_name.clone()).or_insert(0) += remaining_cents;

        // Strictly-smaller comparison keeps the first-encountered charge on
        // month ties.
        if oldest.is_none_or(|current| charge.bill_month < current.bill_month) {
            oldest = Some(charge);
        }
    }

    OutstandingSummary {
        total_outstanding: from_cents(total_cents),
        total_charges,
        by_utility_type: cents_map_to_amounts(by_utility_type),
        by_property: cents_map_to_amounts(by_property),
        by_tenant: cents_map_to_amounts(by_tenant),
        oldest_charge: oldest.map(|charge| OldestCharge {
            lease_id: charge.lease_id.clone(),
            utility_bill_id: charge.utility_bill_id.clone(),
            tenant_name: charge.tenant_name.clone(),
            utility_type: charge.utility_type.clone(),
            bill_month: charge.bill_month.clone(),
            remaining_amount: charge.remaining_amount,
        }),
    }
}

fn cents_map_to_amounts(map: BTreeMap<String, i64>) -> BTreeMap<String, f64> {
    map.into_iter()
        .map(|(key, cents)| (key, from_cents(cents)))
        .collect()
}

pub async fn outstanding_summary(
    pool: &PgPool,
    user_id: &str,
    property_id: Option<&str>,
) -> Result<OutstandingSummary, AppError> {
    let charges = charges_for_user(pool, user_id, property_id, None, None).await?;
    Ok(summarize_outstanding(&charges))
}

// ── Split preview ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPreviewLine {
    pub lease_id: String,
    pub tenant_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_identifier: Option<String>,
    pub responsibility_percentage: f64,
    pub charged_amount: f64,
    pub has_utility_settings: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPreview {
    pub charges: Vec<SplitPreviewLine>,
    pub owner_portion: f64,
    pub total_tenant_percentage: f64,
    pub leases_with_settings: usize,
    pub total_leases: usize,
    pub is_valid: bool,
    pub message: String,
}

/// What-if split for a hypothetical bill amount, including leases with no
/// settings so the form can show who is not yet configured.
pub fn build_split_preview(
    total_amount: f64,
    utility_type: &str,
    leases: &[Value],
    settings: &[Value],
    unit_identifiers: &HashMap<String, String>,
) -> SplitPreview {
    if total_amount <= 0.0 {
        return SplitPreview {
            charges: Vec::new(),
            owner_portion: 0.0,
            total_tenant_percentage: 0.0,
            leases_with_settings: 0,
            total_leases: 0,
            is_valid: false,
            message: "Total amount must be greater than 0".to_string(),
        };
    }

    let active_leases: Vec<&Value> = leases
        .iter()
        .filter(|lease| value_str(lease, "status") == "active")
        .collect();
    if active_leases.is_empty() {
        return SplitPreview {
            charges: Vec::new(),
            owner_portion: total_amount,
            total_tenant_percentage: 0.0,
            leases_with_settings: 0,
            total_leases: 0,
            is_valid: false,
            message: "No active leases found for this property".to_string(),
        };
    }

    let total_cents = to_cents(total_amount);
    let percentages = responsibility_by_lease(settings, utility_type);

    let mut lines = Vec::new();
    let mut total_tenant_percentage = 0.0;
    let mut leases_with_settings = 0usize;
    for lease in &active_leases {
        let lease_id = value_str(lease, "id");
        let percentage = percentages.get(&lease_id).copied().unwrap_or(0.0);
        let configured = percentage > 0.0;
        if configured {
            total_tenant_percentage += percentage;
            leases_with_settings += 1;
        }
        lines.push(SplitPreviewLine {
            lease_id,
            tenant_name: value_str(lease, "tenant_name"),
            unit_identifier: value_opt_str(lease, "unit_id")
                .and_then(|unit_id| unit_identifiers.get(&unit_id).cloned()),
            responsibility_percentage: percentage,
            charged_amount: if configured {
                from_cents(prorate_cents(total_cents, percentage))
            } else {
                0.0
            },
            has_utility_settings: configured,
        });
    }

    lines.sort_by(|a, b| match (&a.unit_identifier, &b.unit_identifier) {
        (Some(left), Some(right)) => left.cmp(right),
        _ => a.tenant_name.cmp(&b.tenant_name),
    });

    let owner_portion = from_cents(total_cents - prorate_cents(total_cents, total_tenant_percentage));
    let total_leases = active_leases.len();

    let (is_valid, message) = if total_tenant_percentage > 100.0 {
        (
            false,
            format!("Utility percentages sum to {total_tenant_percentage}%, which exceeds 100%"),
        )
    } else if leases_with_settings == 0 {
        (
            false,
            format!("No utility responsibility settings found for {utility_type}"),
        )
    } else if leases_with_settings < total_leases {
        (
            true,
            format!(
                "{leases_with_settings} of {total_leases} leases have {utility_type} settings configured"
            ),
        )
    } else {
        (
            true,
            "All leases have utility settings configured".to_string(),
        )
    };

    SplitPreview {
        charges: lines,
        owner_portion,
        total_tenant_percentage,
        leases_with_settings,
        total_leases,
        is_valid,
        message,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{json, Value};

    use super::{
        build_charges_for_bill, build_split_preview, month_in_range, owner_share, sort_charges,
        sort_charges_by_unit, summarize_outstanding, to_cents, TenantCharge,
    };

    fn bill(id: &str, utility_type: &str, bill_month: &str, total_amount: f64) -> Value {
        json!({
            "id": id,
            "property_id": "prop-1",
            "utility_type": utility_type,
            "bill_month": bill_month,
            "total_amount": total_amount,
            "due_date": "2026-02-15",
            "no_tenant_charges": false,
        })
    }

    fn lease(id: &str, tenant_name: &str, status: &str) -> Value {
        json!({
            "id": id,
            "property_id": "prop-1",
            "tenant_name": tenant_name,
            "status": status,
            "unit_id": format!("unit-{id}"),
        })
    }

    fn setting(lease_id: &str, utility_type: &str, percentage: f64) -> Value {
        json!({
            "lease_id": lease_id,
            "utility_type": utility_type,
            "responsibility_percentage": percentage,
        })
    }

    fn payment(lease_id: &str, bill_id: &str, amount: f64) -> Value {
        json!({
            "lease_id": lease_id,
            "utility_bill_id": bill_id,
            "amount_paid": amount,
        })
    }

    fn no_units() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn prorates_exact_cents_for_common_percentages() {
        // 133.33 at 0/25/33/50/100 percent.
        let cases = [
            (0.0, 0.0),
            (25.0, 33.33),
            (33.0, 44.00),
            (50.0, 66.67),
            (100.0, 133.33),
        ];
        for (percentage, expected) in cases {
            let charges = build_charges_for_bill(
                &bill("bill-1", "Electric", "2026-01", 133.33),
                &[lease("l1", "Ana", "active")],
                &[setting("l1", "Electric", percentage)],
                &[],
                &no_units(),
                None,
            );
            if percentage == 0.0 {
                assert!(charges.is_empty(), "0% should contribute no charge");
            } else {
                assert_eq!(charges.len(), 1);
                assert_eq!(charges[0].charged_amount, expected, "at {percentage}%");
            }
        }
    }

    #[test]
    fn single_lease_at_sixty_percent() {
        // 300.00 bill, one active lease at 60%, no payments.
        let charges = build_charges_for_bill(
            &bill("bill-1", "Electric", "2026-01", 300.0),
            &[lease("l1", "Ana", "active")],
            &[setting("l1", "Electric", 60.0)],
            &[],
            &no_units(),
            None,
        );
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].charged_amount, 180.0);
        assert_eq!(charges[0].paid_amount, 0.0);
        assert_eq!(charges[0].remaining_amount, 180.0);
        assert_eq!(charges[0].responsibility_percentage, 60.0);
        assert_eq!(charges[0].total_bill_amount, 300.0);
    }

    #[test]
    fn two_leases_split_sums_to_total() {
        let charges = build_charges_for_bill(
            &bill("bill-1", "Electric", "2026-01", 300.0),
            &[lease("l1", "Ana", "active"), lease("l2", "Bruno", "active")],
            &[
                setting("l1", "Electric", 60.0),
                setting("l2", "Electric", 40.0),
            ],
            &[],
            &no_units(),
            None,
        );
        assert_eq!(charges.len(), 2);
        let amounts: Vec<f64> = charges.iter().map(|c| c.charged_amount).collect();
        assert!(amounts.contains(&180.0));
        assert!(amounts.contains(&120.0));
        assert_eq!(amounts.iter().sum::<f64>(), 300.0);
    }

    #[test]
    fn payments_reduce_remaining_and_clamp_at_zero() {
        let the_bill = bill("bill-1", "Electric", "2026-01", 300.0);
        let leases = [lease("l1", "Ana", "active")];
        let settings = [setting("l1", "Electric", 60.0)];

        let after_first = build_charges_for_bill(
            &the_bill,
            &leases,
            &settings,
            &[payment("l1", "bill-1", 50.0)],
            &no_units(),
            None,
        );
        assert_eq!(after_first[0].paid_amount, 50.0);
        assert_eq!(after_first[0].remaining_amount, 130.0);

        let after_second = build_charges_for_bill(
            &the_bill,
            &leases,
            &settings,
            &[
                payment("l1", "bill-1", 50.0),
                payment("l1", "bill-1", 200.0),
            ],
            &no_units(),
            None,
        );
        assert_eq!(after_second[0].paid_amount, 250.0);
        assert_eq!(after_second[0].remaining_amount, 0.0);
    }

    #[test]
    fn historical_bill_produces_no_charges() {
        let mut historical = bill("bill-1", "Electric", "2026-01", 300.0);
        historical["no_tenant_charges"] = json!(true);
        let charges = build_charges_for_bill(
            &historical,
            &[lease("l1", "Ana", "active")],
            &[setting("l1", "Electric", 60.0)],
            &[],
            &no_units(),
            None,
        );
        assert!(charges.is_empty());
    }

    #[test]
    fn zero_amount_bill_produces_no_charges() {
        let charges = build_charges_for_bill(
            &bill("bill-1", "Electric", "2026-01", 0.0),
            &[lease("l1", "Ana", "active")],
            &[setting("l1", "Electric", 60.0)],
            &[],
            &no_units(),
            None,
        );
        assert!(charges.is_empty());
    }

    #[test]
    fn inactive_leases_produce_no_charges() {
        let charges = build_charges_for_bill(
            &bill("bill-1", "Electric", "2026-01", 300.0),
            &[
                lease("l1", "Ana", "pending"),
                lease("l2", "Bruno", "expired"),
            ],
            &[
                setting("l1", "Electric", 60.0),
                setting("l2", "Electric", 40.0),
            ],
            &[],
            &no_units(),
            None,
        );
        assert!(charges.is_empty());
    }

    #[test]
    fn missing_or_zero_settings_are_skipped_not_errors() {
        let charges = build_charges_for_bill(
            &bill("bill-1", "Water", "2026-01", 90.0),
            &[
                lease("l1", "Ana", "active"),
                lease("l2", "Bruno", "active"),
                lease("l3", "Carla", "active"),
            ],
            // l1 has no Water setting, l2 is explicitly 0, only l3 charges.
            &[
                setting("l1", "Electric", 50.0),
                setting("l2", "Water", 0.0),
                setting("l3", "Water", 50.0),
            ],
            &[],
            &no_units(),
            None,
        );
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].lease_id, "l3");
        assert_eq!(charges[0].charged_amount, 45.0);
    }

    #[test]
    fn payments_for_other_bills_do_not_count() {
        let charges = build_charges_for_bill(
            &bill("bill-1", "Electric", "2026-01", 100.0),
            &[lease("l1", "Ana", "active")],
            &[setting("l1", "Electric", 100.0)],
            &[
                payment("l1", "bill-other", 40.0),
                payment("l1", "bill-1", 25.0),
            ],
            &no_units(),
            None,
        );
        assert_eq!(charges[0].paid_amount, 25.0);
        assert_eq!(charges[0].remaining_amount, 75.0);
    }

    #[test]
    fn recomputation_is_deterministic() {
        let the_bill = bill("bill-1", "Electric", "2026-01", 133.33);
        let leases = [lease("l1", "Ana", "active"), lease("l2", "Bruno", "active")];
        let settings = [
            setting("l1", "Electric", 33.0),
            setting("l2", "Electric", 50.0),
        ];
        let payments = [payment("l1", "bill-1", 10.0)];

        let first =
            build_charges_for_bill(&the_bill, &leases, &settings, &payments, &no_units(), None);
        let second =
            build_charges_for_bill(&the_bill, &leases, &settings, &payments, &no_units(), None);
        assert_eq!(first, second);
    }

    #[test]
    fn over_allocation_is_not_clamped() {
        let charges = build_charges_for_bill(
            &bill("bill-1", "Electric", "2026-01", 100.0),
            &[lease("l1", "Ana", "active"), lease("l2", "Bruno", "active")],
            &[
                setting("l1", "Electric", 80.0),
                setting("l2", "Electric", 60.0),
            ],
            &[],
            &no_units(),
            None,
        );
        let total: f64 = charges.iter().map(|c| c.charged_amount).sum();
        assert_eq!(total, 140.0);

        let (owner_amount, owner_percentage) = owner_share(100.0, &charges);
        assert_eq!(owner_amount, -40.0);
        assert_eq!(owner_percentage, 0.0);
    }

    #[test]
    fn owner_share_for_partial_allocation() {
        let charges = build_charges_for_bill(
            &bill("bill-1", "Electric", "2026-01", 200.0),
            &[lease("l1", "Ana", "active")],
            &[setting("l1", "Electric", 30.0)],
            &[],
            &no_units(),
            None,
        );
        let (owner_amount, owner_percentage) = owner_share(200.0, &charges);
        assert_eq!(owner_amount, 140.0);
        assert_eq!(owner_percentage, 70.0);
    }

    #[test]
    fn month_range_is_inclusive() {
        assert!(month_in_range("2026-03", Some("2026-03"), Some("2026-05")));
        assert!(month_in_range("2026-05", Some("2026-03"), Some("2026-05")));
        assert!(!month_in_range("2026-02", Some("2026-03"), None));
        assert!(!month_in_range("2026-06", None, Some("2026-05")));
        assert!(month_in_range("1999-12", None, None));
    }

    fn charge(
        bill_month: &str,
        tenant: &str,
        utility_type: &str,
        remaining: f64,
        property: Option<&str>,
    ) -> TenantCharge {
        TenantCharge {
            lease_id: format!("lease-{tenant}"),
            utility_bill_id: format!("bill-{bill_month}-{utility_type}"),
            tenant_name: tenant.to_string(),
            utility_type: utility_type.to_string(),
            bill_month: bill_month.to_string(),
            total_bill_amount: remaining * 2.0,
            charged_amount: remaining,
            responsibility_percentage: 50.0,
            due_date: "2026-02-15".to_string(),
            paid_amount: 0.0,
            remaining_amount: remaining,
            unit_identifier: None,
            property_name: property.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn sorts_month_desc_then_tenant_asc() {
        let mut charges = vec![
            charge("2026-01", "Bruno", "Electric", 10.0, None),
            charge("2026-03", "Ana", "Electric", 10.0, None),
            charge("2026-01", "Ana", "Electric", 10.0, None),
        ];
        sort_charges(&mut charges);
        let order: Vec<(String, String)> = charges
            .iter()
            .map(|c| (c.bill_month.clone(), c.tenant_name.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("2026-03".to_string(), "Ana".to_string()),
                ("2026-01".to_string(), "Ana".to_string()),
                ("2026-01".to_string(), "Bruno".to_string()),
            ]
        );
    }

    #[test]
    fn bill_detail_sort_prefers_unit_identifiers() {
        let mut charges = vec![
            charge("2026-01", "Zoe", "Electric", 10.0, None),
            charge("2026-01", "Ana", "Electric", 10.0, None),
        ];
        charges[0].unit_identifier = Some("A".to_string());
        charges[1].unit_identifier = Some("B".to_string());
        sort_charges_by_unit(&mut charges);
        assert_eq!(charges[0].tenant_name, "Zoe");

        charges[1].unit_identifier = None;
        sort_charges_by_unit(&mut charges);
        assert_eq!(charges[0].tenant_name, "Ana");
    }

    #[test]
    fn outstanding_summary_matches_charge_list() {
        let charges = vec![
            charge("2026-02", "Ana", "Electric", 80.0, Some("Maple House")),
            charge("2026-01", "Bruno", "Water", 45.5, Some("Maple House")),
            charge("2026-03", "Ana", "Electric", 0.0, Some("Maple House")),
            charge("2026-01", "Carla", "Electric", 20.0, Some("Oak Flats")),
        ];
        let summary = summarize_outstanding(&charges);

        let expected: f64 = charges
            .iter()
            .filter(|c| c.remaining_amount > 0.0)
            .map(|c| c.remaining_amount)
            .sum();
        assert_eq!(summary.total_outstanding, expected);
        assert_eq!(summary.total_charges, 3);
        assert_eq!(summary.by_utility_type["Electric"], 100.0);
        assert_eq!(summary.by_utility_type["Water"], 45.5);
        assert_eq!(summary.by_property["Maple House"], 125.5);
        assert_eq!(summary.by_property["Oak Flats"], 20.0);
        assert_eq!(summary.by_tenant["Ana"], 80.0);

        let oldest = summary.oldest_charge.expect("has outstanding charges");
        assert_eq!(oldest.bill_month, "2026-01");
        // First-encountered wins the 2026-01 tie.
        assert_eq!(oldest.tenant_name, "Bruno");
    }

    #[test]
    fn outstanding_summary_of_nothing_is_empty() {
        let summary = summarize_outstanding(&[]);
        assert_eq!(summary.total_outstanding, 0.0);
        assert_eq!(summary.total_charges, 0);
        assert!(summary.by_utility_type.is_empty());
        assert!(summary.oldest_charge.is_none());
    }

    #[test]
    fn cents_conversion_is_exact_at_cent_granularity() {
        assert_eq!(to_cents(133.33), 13333);
        assert_eq!(to_cents(180.0), 18000);
        assert_eq!(to_cents(0.004), 0);
        assert_eq!(to_cents(0.01), 1);
    }

    #[test]
    fn split_preview_reports_unconfigured_leases() {
        let preview = build_split_preview(
            200.0,
            "Electric",
            &[
                lease("l1", "Ana", "active"),
                lease("l2", "Bruno", "active"),
                lease("l3", "Carla", "expired"),
            ],
            &[setting("l1", "Electric", 50.0)],
            &no_units(),
        );
        assert_eq!(preview.total_leases, 2);
        assert_eq!(preview.leases_with_settings, 1);
        assert_eq!(preview.total_tenant_percentage, 50.0);
        assert_eq!(preview.owner_portion, 100.0);
        assert!(preview.is_valid);
        assert_eq!(
            preview.message,
            "1 of 2 leases have Electric settings configured"
        );

        let unconfigured = preview
            .charges
            .iter()
            .find(|line| line.lease_id == "l2")
            .expect("line present");
        assert!(!unconfigured.has_utility_settings);
        assert_eq!(unconfigured.charged_amount, 0.0);
    }

    #[test]
    fn split_preview_flags_invalid_states() {
        let zero_amount = build_split_preview(0.0, "Electric", &[], &[], &no_units());
        assert!(!zero_amount.is_valid);

        let no_leases = build_split_preview(
            150.0,
            "Electric",
            &[lease("l1", "Ana", "expired")],
            &[],
            &no_units(),
        );
        assert!(!no_leases.is_valid);
        assert_eq!(no_leases.owner_portion, 150.0);

        let over_allocated = build_split_preview(
            100.0,
            "Electric",
            &[lease("l1", "Ana", "active"), lease("l2", "Bruno", "active")],
            &[
                setting("l1", "Electric", 70.0),
                setting("l2", "Electric", 50.0),
            ],
            &no_units(),
        );
        assert!(!over_allocated.is_valid);
        assert!(over_allocated.message.contains("exceeds 100%"));
    }
}
