use axum::{routing::get, Router};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub mod documents;
pub mod health;
pub mod identity;
pub mod lease_utilities;
pub mod leases;
pub mod properties;
pub mod units;
pub mod utility_bills;
pub mod utility_charges;
pub mod utility_payments;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/me", get(identity::me))
        .merge(properties::router())
        .merge(units::router())
        .merge(leases::router())
        .merge(lease_utilities::router())
        .merge(utility_bills::router())
        .merge(utility_payments::router())
        .merge(utility_charges::router())
        .merge(documents::router())
}

pub(crate) fn ensure_utility_billing_enabled(state: &AppState) -> AppResult<()> {
    if state.config.utility_billing_enabled {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Utility billing endpoints are disabled.".to_string(),
    ))
}
