//! Admin web UI: JSON endpoints over the configuration store.
//!
//! No authentication; bind it to a trusted network only.

pub mod accounts;
pub mod status;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::RuntimeConfig;
use crate::error::{ConfigError, VaultError};
use crate::store::ConfigStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub runtime: Arc<RuntimeConfig>,
}

/// Build the router with every admin route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(dashboard))
        .route(
            "/api/accounts",
            get(accounts::list_accounts).post(accounts::create_account),
        )
        .route(
            "/api/accounts/{name}",
            get(accounts::get_account)
                .put(accounts::update_account)
                .delete(accounts::delete_account),
        )
        .route("/api/accounts/{name}/test", post(accounts::test_account))
        .route("/api/filters", get(status::list_filters))
        .route("/api/status", get(status::service_status))
        .route("/api/config", get(status::export_config))
        .route("/api/restart", post(status::restart))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-bridge"
    }))
}

/// GET /
async fn dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.load_or_default().await?;
    let active = config.accounts.iter().filter(|a| a.enabled).count();
    Ok(Json(serde_json::json!({
        "total_accounts": config.accounts.len(),
        "active_accounts": active,
        "filter_rules": config.filter_rules.len(),
    })))
}

/// Handler error, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    /// Every problem found with the request body.
    Unprocessable(Vec<String>),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Unprocessable(problems) => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(serde_json::json!({
                        "error": problems.join("; "),
                        "problems": problems,
                    })),
                )
                    .into_response();
            }
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(problems) => ApiError::Unprocessable(problems),
            other => {
                error!("Configuration store failure: {other}");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        error!("Vault failure: {e}");
        ApiError::Internal("Could not store the password".into())
    }
}
