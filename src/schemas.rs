use serde::Deserialize;
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn serialize_to_map<T>(value: &T) -> Map<String, Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value).unwrap_or_else(|_| Value::Object(Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(mut map: Map<String, Value>) -> Map<String, Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

pub fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

pub fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

pub fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

pub fn value_opt_str(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

pub fn value_f64(row: &Value, key: &str) -> f64 {
    match row.as_object().and_then(|obj| obj.get(key)) {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn value_bool(row: &Value, key: &str) -> bool {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// `YYYY-MM` with a month of 01–12. Bill months are compared
/// lexicographically everywhere, so the shape must be strict.
pub fn is_valid_bill_month(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    if !bytes[..4].iter().all(u8::is_ascii_digit)
        || !bytes[5..].iter().all(u8::is_ascii_digit)
    {
        return false;
    }
    matches!(&raw[5..7], "01" | "02" | "03" | "04" | "05" | "06" | "07" | "08" | "09" | "10" | "11" | "12")
}

// ── Defaults ───────────────────────────────────────────────────────

fn default_limit_300() -> i64 {
    300
}
fn default_limit_500() -> i64 {
    500
}
fn default_false() -> bool {
    false
}
fn default_pending() -> String {
    "pending".to_string()
}
fn default_property_status() -> String {
    "active".to_string()
}
fn default_unit_status() -> String {
    "vacant".to_string()
}

// ── Path params ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitPath {
    pub unit_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasePath {
    pub lease_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillPath {
    pub bill_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPath {
    pub document_id: String,
}

// ── Query params ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit_300")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitsQuery {
    pub property_id: Option<String>,
    #[serde(default = "default_limit_300")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasesQuery {
    pub property_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_300")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillsQuery {
    pub property_id: Option<String>,
    pub bill_month: Option<String>,
    pub utility_type: Option<String>,
    pub landlord_paid: Option<bool>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnpaidBillsQuery {
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargesQuery {
    pub property_id: Option<String>,
    pub start_month: Option<String>,
    pub end_month: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonthRangeQuery {
    pub start_month: Option<String>,
    pub end_month: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutstandingSummaryQuery {
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsQuery {
    pub property_id: Option<String>,
    pub lease_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSummaryQuery {
    pub property_id: Option<String>,
    pub lease_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplitPreviewQuery {
    pub utility_type: String,
    pub total_amount: f64,
}

// ── Request bodies ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub address: Option<String>,
    pub property_type: Option<String>,
    #[serde(default = "default_property_status")]
    pub status: String,
    pub bedrooms: Option<i16>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i32>,
    pub purchase_date: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePropertyInput {
    pub name: Option<String>,
    pub address: Option<String>,
    pub property_type: Option<String>,
    pub status: Option<String>,
    pub bedrooms: Option<i16>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i32>,
    pub purchase_date: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateUnitInput {
    pub property_id: String,
    #[validate(length(min = 1, max = 64))]
    pub unit_identifier: String,
    pub display_name: Option<String>,
    #[serde(default = "default_unit_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateUnitInput {
    pub unit_identifier: Option<String>,
    pub display_name: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateLeaseInput {
    pub property_id: String,
    pub unit_id: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub tenant_name: String,
    #[validate(email)]
    pub tenant_email: Option<String>,
    pub tenant_phone: Option<String>,
    pub starts_on: String,
    pub ends_on: String,
    #[validate(range(min = 0.0))]
    pub rent_amount: f64,
    #[serde(default = "default_pending")]
    pub status: String,
    pub lease_document_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateLeaseInput {
    pub unit_id: Option<String>,
    pub tenant_name: Option<String>,
    pub tenant_email: Option<String>,
    pub tenant_phone: Option<String>,
    pub starts_on: Option<String>,
    pub ends_on: Option<String>,
    pub rent_amount: Option<f64>,
    pub status: Option<String>,
    pub lease_document_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UtilitySettingInput {
    #[validate(length(min = 1, max = 64))]
    pub utility_type: String,
    #[validate(range(min = 0.0, max = 100.0))]
    pub responsibility_percentage: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct SetLeaseUtilitiesInput {
    #[validate(nested)]
    pub utilities: Vec<UtilitySettingInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CopyLeaseUtilitiesInput {
    pub from_lease_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateBillInput {
    pub property_id: String,
    #[validate(length(min = 1, max = 64))]
    pub utility_type: String,
    #[validate(length(min = 1, max = 255))]
    pub provider: String,
    pub bill_month: String,
    pub total_amount: f64,
    pub bill_date: String,
    pub due_date: String,
    pub billing_period: Option<String>,
    #[serde(default = "default_false")]
    pub no_tenant_charges: bool,
    pub bill_document_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct BulkBillItemInput {
    #[validate(length(min = 1, max = 64))]
    pub utility_type: String,
    #[validate(length(min = 1, max = 255))]
    pub provider: String,
    pub total_amount: f64,
    pub bill_date: String,
    pub due_date: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BulkAddBillsInput {
    pub property_id: String,
    pub bill_month: String,
    #[validate(nested)]
    pub bills: Vec<BulkBillItemInput>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateBillInput {
    pub utility_type: Option<String>,
    pub provider: Option<String>,
    pub bill_month: Option<String>,
    pub total_amount: Option<f64>,
    pub bill_date: Option<String>,
    pub due_date: Option<String>,
    pub billing_period: Option<String>,
    pub landlord_paid_utility_company: Option<bool>,
    pub landlord_paid_date: Option<String>,
    pub no_tenant_charges: Option<bool>,
    pub bill_document_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsQuery {
    pub property_id: Option<String>,
    pub lease_id: Option<String>,
    pub doc_type: Option<String>,
    #[serde(default = "default_limit_300")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateDocumentInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1, max = 32))]
    pub doc_type: String,
    pub property_id: Option<String>,
    pub lease_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct RecordPaymentInput {
    pub lease_id: String,
    pub utility_bill_id: String,
    pub amount_paid: f64,
    pub payment_date: String,
    #[validate(length(min = 1, max = 64))]
    pub payment_method: String,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{is_valid_bill_month, remove_nulls, serialize_to_map, value_f64, value_str};

    #[test]
    fn validates_bill_month_shape() {
        assert!(is_valid_bill_month("2026-01"));
        assert!(is_valid_bill_month("1999-12"));
        assert!(!is_valid_bill_month("2026-13"));
        assert!(!is_valid_bill_month("2026-00"));
        assert!(!is_valid_bill_month("2026-1"));
        assert!(!is_valid_bill_month("2026/01"));
        assert!(!is_valid_bill_month("26-01"));
        assert!(!is_valid_bill_month(""));
    }

    #[test]
    fn strips_nulls_from_serialized_maps() {
        let map = serialize_to_map(&json!({ "a": 1, "b": null, "c": "x" }));
        let cleaned = remove_nulls(map);
        assert_eq!(cleaned.len(), 2);
        assert!(!cleaned.contains_key("b"));
    }

    #[test]
    fn reads_numbers_from_json_or_strings() {
        let row = json!({ "amount": 12.5, "amount_text": "7.25", "name": "  Ana  " });
        assert_eq!(value_f64(&row, "amount"), 12.5);
        assert_eq!(value_f64(&row, "amount_text"), 7.25);
        assert_eq!(value_f64(&row, "missing"), 0.0);
        assert_eq!(value_str(&row, "name"), "Ana");
    }
}
