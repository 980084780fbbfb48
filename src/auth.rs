use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseUser {
    pub id: String,
    pub email: Option<String>,
    pub user_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    email: Option<String>,
    user_metadata: Option<Value>,
}

/// Resolve the authenticated Supabase user from request headers.
///
/// Preferred path verifies the access token locally with the shared JWT
/// secret; when that is not configured, the token is validated against the
/// Supabase auth endpoint over HTTP. A dev-only `x-user-id` override is
/// honored when enabled in config (never in production).
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<SupabaseUser, AppError> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_value(headers, "x-user-id") {
            return Ok(SupabaseUser {
                id: user_id,
                email: header_value(headers, "x-user-email"),
                user_metadata: None,
            });
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return decode_access_token(&token, secret);
    }

    fetch_user_over_http(state, &token).await
}

pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    Ok(require_user(state, headers).await?.id)
}

fn decode_access_token(token: &str, secret: &str) -> Result<SupabaseUser, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Supabase sets aud = "authenticated"; accept any audience so service
    // tokens minted for other audiences still resolve.
    validation.validate_aud = false;

    let data = decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| AppError::Unauthorized(format!("Unauthorized: invalid token ({error}).")))?;

    if data.claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: token has no subject.".to_string(),
        ));
    }

    Ok(SupabaseUser {
        id: data.claims.sub,
        email: data.claims.email,
        user_metadata: data.claims.user_metadata,
    })
}

async fn fetch_user_over_http(state: &AppState, token: &str) -> Result<SupabaseUser, AppError> {
    let base_url = state.config.supabase_url.as_deref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase auth is not configured. Set SUPABASE_JWT_SECRET or SUPABASE_URL.".to_string(),
        )
    })?;
    let service_key = state
        .config
        .supabase_service_role_key
        .as_deref()
        .ok_or_else(|| {
            AppError::Dependency("SUPABASE_SERVICE_ROLE_KEY is not configured.".to_string())
        })?;

    let endpoint = Url::parse(base_url)
        .and_then(|url| url.join("/auth/v1/user"))
        .map_err(|error| AppError::Dependency(format!("Invalid SUPABASE_URL: {error}")))?;

    let response = state
        .http
        .get(endpoint)
        .bearer_auth(token)
        .header("apikey", service_key)
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth request failed: {error}")))?;

    if !response.status().is_success() {
        return Err(AppError::Unauthorized(
            "Unauthorized: token rejected by auth provider.".to_string(),
        ));
    }

    let user = response
        .json::<SupabaseUser>()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth response invalid: {error}")))?;

    if user.id.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: auth provider returned no user id.".to_string(),
        ));
    }

    Ok(user)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::bearer_token;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def".to_string()));

        headers.insert("authorization", HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
