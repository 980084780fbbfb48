use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;

/// Shared application state, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http: reqwest::Client,
    /// (user_id, property_id) → owns. Short TTL so revoked access converges.
    pub ownership_cache: Cache<(String, String), bool>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        let ownership_cache = Cache::builder()
            .max_capacity(config.ownership_cache_max_entries)
            .time_to_live(Duration::from_secs(config.ownership_cache_ttl_seconds))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http,
            ownership_cache,
        })
    }
}
