use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "app_users",
    "audit_logs",
    "documents",
    "lease_utility_settings",
    "leases",
    "properties",
    "units",
    "utility_bills",
    "utility_payments",
];

/// Filter keys accept an optional `__gte` / `__lte` suffix for inclusive
/// range comparisons (used for `bill_month` and date windows). Array values
/// translate to `= ANY(...)`. Null values are ignored.
pub async fn list_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    if let Some(filter_map) = filters {
        apply_filters(&mut query, filter_map)?;
    }

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 5000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(rows.into_iter().filter_map(json_column).collect())
}

pub async fn get_row(pool: &PgPool, table: &str, row_id: &str) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_condition(
        &mut query,
        "id",
        Comparison::Eq,
        &Value::String(row_id.to_string()),
    );
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(json_column)
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let keys = sorted_keys(payload)?;
    if keys.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    // jsonb_populate_record lets PostgreSQL coerce column types (uuid, enum,
    // boolean, numeric, date) from the table definition.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    push_column_list(&mut query, &keys, "");
    query.push(") SELECT ");
    push_column_list(&mut query, &keys, "r.");
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(json_column)
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let keys = sorted_keys(payload)?;
    if keys.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_condition(
        &mut query,
        "id",
        Comparison::Eq,
        &Value::String(row_id.to_string()),
    );
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(json_column)
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(pool: &PgPool, table: &str, row_id: &str) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_condition(
        &mut query,
        "id",
        Comparison::Eq,
        &Value::String(row_id.to_string()),
    );
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(json_column)
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_rows(
    pool: &PgPool,
    table: &str,
    filters: &Map<String, Value>,
) -> Result<u64, AppError> {
    let table_name = validate_table(table)?;
    if filters.is_empty() {
        return Err(AppError::BadRequest(
            "Refusing to delete without filters.".to_string(),
        ));
    }

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    apply_filters(&mut query, filters)?;

    let result = query.build().execute(pool).await.map_err(map_db_error)?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Gte,
    Lte,
}

impl Comparison {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Gte => " >= ",
            Self::Lte => " <= ",
        }
    }
}

fn parse_filter_key(filter_key: &str) -> Result<(&str, Comparison), AppError> {
    if let Some((column, suffix)) = filter_key.rsplit_once("__") {
        let comparison = match suffix {
            "gte" => Some(Comparison::Gte),
            "lte" => Some(Comparison::Lte),
            _ => None,
        };
        if let Some(comparison) = comparison {
            return Ok((validate_identifier(column)?, comparison));
        }
    }
    Ok((validate_identifier(filter_key)?, Comparison::Eq))
}

fn apply_filters(
    query: &mut QueryBuilder<Postgres>,
    filters: &Map<String, Value>,
) -> Result<(), AppError> {
    for (filter_key, value) in filters {
        let (column, comparison) = parse_filter_key(filter_key)?;
        match value {
            Value::Null => {}
            Value::Array(items) => {
                if comparison != Comparison::Eq {
                    return Err(AppError::BadRequest(format!(
                        "Filter '{filter_key}' does not support array values."
                    )));
                }
                if items.is_empty() {
                    continue;
                }
                query.push(" AND ");
                push_any_condition(query, column, items);
            }
            _ => {
                query.push(" AND ");
                push_condition(query, column, comparison, value);
            }
        }
    }
    Ok(())
}

fn push_condition(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    comparison: Comparison,
    value: &Value,
) {
    query.push("t.").push(column);
    match infer_bound(column, value) {
        Bound::Uuid(id) => {
            query.push(comparison.sql()).push_bind(id);
        }
        Bound::Bool(flag) => {
            query.push(comparison.sql()).push_bind(flag);
        }
        Bound::I64(number) => {
            query.push(comparison.sql()).push_bind(number);
        }
        Bound::F64(number) => {
            query.push(comparison.sql()).push_bind(number);
        }
        Bound::Date(date) => {
            query.push(comparison.sql()).push_bind(date);
        }
        Bound::Text(text) => {
            // Cast so enum/varchar/char columns all compare as text.
            query.push("::text").push(comparison.sql()).push_bind(text);
        }
    }
}

fn push_any_condition(query: &mut QueryBuilder<Postgres>, column: &str, items: &[Value]) {
    query.push("t.").push(column);

    if is_uuid_column(column) {
        let parsed = items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|text| uuid::Uuid::parse_str(text.trim()).ok())
            .collect::<Vec<_>>();
        if parsed.len() == items.len() {
            query.push(" = ANY(").push_bind(parsed).push(")");
            return;
        }
    }

    let texts = items.iter().map(render_text).collect::<Vec<_>>();
    query.push("::text = ANY(").push_bind(texts).push(")");
}

#[derive(Debug, Clone)]
enum Bound {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
}

fn infer_bound(column: &str, value: &Value) -> Bound {
    match value {
        Value::Bool(flag) => Bound::Bool(*flag),
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                Bound::I64(as_i64)
            } else if let Some(as_f64) = number.as_f64() {
                Bound::F64(as_f64)
            } else {
                Bound::Text(number.to_string())
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_column(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return Bound::Uuid(parsed);
                }
            }
            if is_date_column(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return Bound::Date(parsed);
                }
            }
            Bound::Text(text.clone())
        }
        _ => Bound::Text(render_text(value)),
    }
}

fn is_uuid_column(column: &str) -> bool {
    let normalized = column.trim();
    normalized == "id" || normalized.ends_with("_id")
}

fn is_date_column(column: &str) -> bool {
    let normalized = column.trim();
    normalized.ends_with("_date") || normalized.ends_with("_on")
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<String>, AppError> {
    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn push_column_list(query: &mut QueryBuilder<Postgres>, keys: &[String], prefix: &str) {
    let mut separated = query.separated(", ");
    for key in keys {
        if prefix.is_empty() {
            separated.push(key.as_str());
        } else {
            separated.push(prefix);
            separated.push_unseparated(key.as_str());
        }
    }
}

fn json_column(row: PgRow) -> Option<Value> {
    row.try_get::<Option<Value>, _>("row").ok().flatten()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    let mut chars = trimmed.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_');
    let rest_ok = trimmed
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !starts_ok || !rest_ok {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{
        apply_filters, parse_filter_key, validate_identifier, validate_table, Comparison,
    };

    #[test]
    fn validates_identifiers() {
        assert!(validate_identifier("bill_month").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("9lives").is_err());
        assert!(validate_identifier("drop table").is_err());
        assert!(validate_identifier("Bill").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn rejects_unknown_tables() {
        assert!(validate_table("utility_bills").is_ok());
        assert!(validate_table("pg_catalog").is_err());
        assert!(validate_table("utility_bills; --").is_err());
    }

    #[test]
    fn parses_range_suffixes() {
        let (column, cmp) = parse_filter_key("bill_month__gte").expect("valid key");
        assert_eq!(column, "bill_month");
        assert_eq!(cmp, Comparison::Gte);

        let (column, cmp) = parse_filter_key("bill_month__lte").expect("valid key");
        assert_eq!(column, "bill_month");
        assert_eq!(cmp, Comparison::Lte);

        let (column, cmp) = parse_filter_key("utility_type").expect("valid key");
        assert_eq!(column, "utility_type");
        assert_eq!(cmp, Comparison::Eq);
    }

    #[test]
    fn builds_month_range_sql() {
        let mut filters = Map::new();
        filters.insert(
            "property_id".to_string(),
            json!("550e8400-e29b-41d4-a716-446655440000"),
        );
        filters.insert("bill_month__gte".to_string(), json!("2026-01"));
        filters.insert("bill_month__lte".to_string(), json!("2026-06"));
        filters.insert("skip_me".to_string(), Value::Null);

        let mut query =
            QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM utility_bills t WHERE 1=1");
        apply_filters(&mut query, &filters).expect("filters apply");

        let sql = query.sql();
        assert!(sql.contains("t.property_id = "), "got: {sql}");
        assert!(sql.contains("t.bill_month::text >= "), "got: {sql}");
        assert!(sql.contains("t.bill_month::text <= "), "got: {sql}");
        assert!(!sql.contains("skip_me"), "got: {sql}");
    }

    #[test]
    fn builds_any_clause_for_arrays() {
        let mut filters = Map::new();
        filters.insert(
            "status".to_string(),
            json!(["active", "pending"]),
        );
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM leases t WHERE 1=1");
        apply_filters(&mut query, &filters).expect("filters apply");
        assert!(query.sql().contains("t.status::text = ANY("));
    }
}
