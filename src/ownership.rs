use serde_json::{json, Value};
use sqlx::PgPool;

use crate::auth::SupabaseUser;
use crate::error::AppError;
use crate::repository::table_service::get_row;
use crate::schemas::value_str;
use crate::state::AppState;

pub fn db_pool(state: &AppState) -> Result<&PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}

/// Upsert the authenticated user into `app_users` and return the record.
pub async fn ensure_app_user(state: &AppState, user: &SupabaseUser) -> Result<Value, AppError> {
    if user.id.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: missing user.".to_string(),
        ));
    }
    let Some(email) = user.email.as_ref() else {
        return Err(AppError::BadRequest(
            "Authenticated user is missing an email address.".to_string(),
        ));
    };

    let full_name = resolve_full_name(user, email);
    let pool = db_pool(state)?;

    sqlx::query(
        "INSERT INTO app_users (id, email, full_name)
         VALUES ($1::uuid, $2, $3)
         ON CONFLICT (id)
         DO UPDATE SET email = EXCLUDED.email, full_name = EXCLUDED.full_name",
    )
    .bind(&user.id)
    .bind(email)
    .bind(&full_name)
    .execute(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Database request failed: {error}")))?;

    Ok(json!({
        "id": user.id,
        "email": email,
        "full_name": full_name
    }))
}

/// Fetch a row and keep it only when it belongs to the requesting user.
/// `Ok(None)` covers both "does not exist" and "owned by someone else" so
/// read paths can soft-fail to empty results without leaking existence.
async fn fetch_owned(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    user_id: &str,
) -> Result<Option<Value>, AppError> {
    match get_row(pool, table, row_id).await {
        Ok(row) => Ok((value_str(&row, "user_id") == user_id).then_some(row)),
        Err(AppError::NotFound(_)) => Ok(None),
        Err(other) => Err(other),
    }
}

pub async fn get_owned_property(
    pool: &PgPool,
    property_id: &str,
    user_id: &str,
) -> Result<Option<Value>, AppError> {
    fetch_owned(pool, "properties", property_id, user_id).await
}

pub async fn get_owned_unit(
    pool: &PgPool,
    unit_id: &str,
    user_id: &str,
) -> Result<Option<Value>, AppError> {
    fetch_owned(pool, "units", unit_id, user_id).await
}

pub async fn get_owned_lease(
    pool: &PgPool,
    lease_id: &str,
    user_id: &str,
) -> Result<Option<Value>, AppError> {
    fetch_owned(pool, "leases", lease_id, user_id).await
}

pub async fn get_owned_bill(
    pool: &PgPool,
    bill_id: &str,
    user_id: &str,
) -> Result<Option<Value>, AppError> {
    fetch_owned(pool, "utility_bills", bill_id, user_id).await
}

pub async fn assert_owned_property(
    pool: &PgPool,
    property_id: &str,
    user_id: &str,
) -> Result<Value, AppError> {
    get_owned_property(pool, property_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("properties record not found.".to_string()))
}

pub async fn assert_owned_unit(
    pool: &PgPool,
    unit_id: &str,
    user_id: &str,
) -> Result<Value, AppError> {
    get_owned_unit(pool, unit_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("units record not found.".to_string()))
}

pub async fn assert_owned_lease(
    pool: &PgPool,
    lease_id: &str,
    user_id: &str,
) -> Result<Value, AppError> {
    get_owned_lease(pool, lease_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("leases record not found.".to_string()))
}

pub async fn assert_owned_bill(
    pool: &PgPool,
    bill_id: &str,
    user_id: &str,
) -> Result<Value, AppError> {
    get_owned_bill(pool, bill_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("utility_bills record not found.".to_string()))
}

/// Cached property-ownership check for hot read paths that only need a
/// yes/no answer, not the property row itself.
pub async fn user_owns_property(
    state: &AppState,
    user_id: &str,
    property_id: &str,
) -> Result<bool, AppError> {
    let key = (user_id.to_string(), property_id.to_string());
    if let Some(hit) = state.ownership_cache.get(&key).await {
        return Ok(hit);
    }

    let owns = get_owned_property(db_pool(state)?, property_id, user_id)
        .await?
        .is_some();
    state.ownership_cache.insert(key, owns).await;
    Ok(owns)
}

fn resolve_full_name(user: &SupabaseUser, email: &str) -> String {
    let metadata = user
        .user_metadata
        .as_ref()
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let from_metadata = ["full_name", "name", "fullName"]
        .iter()
        .find_map(|key| metadata.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    if let Some(value) = from_metadata {
        return value;
    }

    email
        .split('@')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "User".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::resolve_full_name;
    use crate::auth::SupabaseUser;

    #[test]
    fn prefers_metadata_name_over_email_prefix() {
        let user = SupabaseUser {
            id: "u-1".to_string(),
            email: Some("maria@example.com".to_string()),
            user_metadata: Some(json!({ "full_name": "Maria Gomez" })),
        };
        assert_eq!(resolve_full_name(&user, "maria@example.com"), "Maria Gomez");

        let anonymous = SupabaseUser {
            id: "u-2".to_string(),
            email: Some("landlord@example.com".to_string()),
            user_metadata: None,
        };
        assert_eq!(
            resolve_full_name(&anonymous, "landlord@example.com"),
            "landlord"
        );
    }
}
