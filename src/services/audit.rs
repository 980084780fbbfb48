use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Best-effort audit trail write. Failures are logged and swallowed so a
/// broken audit table never blocks the actual mutation.
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    user_id: Option<&str>,
    action: &str,
    table_name: &str,
    row_id: Option<&str>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut payload = Map::new();
    payload.insert("action".to_string(), Value::String(action.to_string()));
    payload.insert(
        "table_name".to_string(),
        Value::String(table_name.to_string()),
    );
    if let Some(user_id) = user_id {
        payload.insert("user_id".to_string(), Value::String(user_id.to_string()));
    }
    if let Some(row_id) = row_id {
        payload.insert("row_id".to_string(), Value::String(row_id.to_string()));
    }
    if let Some(before) = before {
        payload.insert("before".to_string(), before);
    }
    if let Some(after) = after {
        payload.insert("after".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &payload).await {
        tracing::warn!(%error, action, table_name, "Failed to write audit log");
    }
}
