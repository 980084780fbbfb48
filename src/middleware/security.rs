use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::state::AppState;

/// Reject requests whose Host header is not in the configured allow-list.
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let host = request
        .headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if host_is_trusted(host, &state.config.trusted_hosts) {
        return Ok(next.run(request).await);
    }

    Err(AppError::BadRequest(format!("Untrusted host '{host}'.")))
}

fn host_is_trusted(host: &str, trusted: &[String]) -> bool {
    if trusted.is_empty() || trusted.iter().any(|entry| entry.trim() == "*") {
        return true;
    }

    // Strip an optional port before matching.
    let hostname = host
        .rsplit_once(':')
        .map(|(name, port)| {
            if port.chars().all(|c| c.is_ascii_digit()) {
                name
            } else {
                host
            }
        })
        .unwrap_or(host)
        .trim()
        .to_ascii_lowercase();

    if hostname.is_empty() {
        return false;
    }

    trusted.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        if let Some(suffix) = entry.strip_prefix("*.") {
            hostname == suffix || hostname.ends_with(&format!(".{suffix}"))
        } else {
            hostname == entry
        }
    })
}

#[cfg(test)]
mod tests {
    use super::host_is_trusted;

    fn hosts(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|entry| entry.to_string()).collect()
    }

    #[test]
    fn matches_exact_hosts_ignoring_port() {
        let trusted = hosts(&["localhost", "api.rentledger.io"]);
        assert!(host_is_trusted("localhost", &trusted));
        assert!(host_is_trusted("localhost:8000", &trusted));
        assert!(host_is_trusted("API.rentledger.io", &trusted));
        assert!(!host_is_trusted("evil.example.com", &trusted));
        assert!(!host_is_trusted("", &trusted));
    }

    #[test]
    fn supports_wildcard_entries() {
        assert!(host_is_trusted("anything", &hosts(&["*"])));
        let trusted = hosts(&["*.rentledger.io"]);
        assert!(host_is_trusted("api.rentledger.io", &trusted));
        assert!(host_is_trusted("rentledger.io", &trusted));
        assert!(!host_is_trusted("rentledger.io.evil.com", &trusted));
    }

    #[test]
    fn empty_list_allows_all() {
        assert!(host_is_trusted("whatever", &[]));
    }
}
