//! Read-only views, service status and run-control regeneration.

use std::path::Path;
use std::process::Stdio;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;
use tokio::process::Command;
use tracing::{error, info};

use super::accounts::{AccountView, ActionResult};
use super::{ApiError, AppState};
use crate::config::{FilterRule, Settings};
use crate::fetchmail;

/// Number of delivery-log lines shown by the status endpoint.
pub const LOG_TAIL_LINES: usize = 10;

/// GET /api/filters
pub async fn list_filters(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.load_or_default().await?;
    Ok(Json(config.filter_rules))
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub fetchmail_running: bool,
    pub recent_logs: Vec<String>,
}

/// GET /api/status
pub async fn service_status(State(state): State<AppState>) -> impl IntoResponse {
    let fetchmail_running = fetchmail_running().await;
    let recent_logs = tail_log(&state.runtime.delivery_log_path(), LOG_TAIL_LINES)
        .await
        .unwrap_or_else(|| vec!["No logs available".to_string()]);
    Json(ServiceStatus {
        fetchmail_running,
        recent_logs,
    })
}

async fn fetchmail_running() -> bool {
    match Command::new("pgrep")
        .args(["-f", "fetchmail"])
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) => !String::from_utf8_lossy(&output.stdout).trim().is_empty(),
        Err(_) => false,
    }
}

/// Last `lines` lines of a log file; `None` when it cannot be read.
async fn tail_log(path: &Path, lines: usize) -> Option<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Some(all[start..].iter().map(|l| l.to_string()).collect())
}

/// Exported configuration: accounts without any credential material.
#[derive(Debug, Serialize)]
pub struct ConfigExport {
    pub settings: Settings,
    pub accounts: Vec<AccountView>,
    pub filter_rules: Vec<FilterRule>,
}

/// GET /api/config
pub async fn export_config(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.load_or_default().await?;
    Ok(Json(ConfigExport {
        accounts: config.accounts.iter().map(AccountView::from).collect(),
        settings: config.settings,
        filter_rules: config.filter_rules,
    }))
}

/// POST /api/restart
///
/// Regenerates the fetchmail run-control file. Restarting the daemon itself is
/// left to the process supervisor.
pub async fn restart(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.load_or_default().await?;
    let runtime = state.runtime.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        fetchmail::generate(&config, &runtime.mda_command, &runtime.fetchmailrc_path)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Config generation aborted: {e}")))?;

    let result = match outcome {
        Ok(rc) => {
            info!(
                written = rc.written.len(),
                skipped = rc.skipped.len(),
                "Run-control regenerated"
            );
            let mut message = format!(
                "Configuration updated successfully: {} account(s) written",
                rc.written.len()
            );
            if !rc.skipped.is_empty() {
                let names: Vec<&str> = rc.skipped.iter().map(|s| s.name.as_str()).collect();
                message.push_str(&format!(", skipped: {}", names.join(", ")));
            }
            ActionResult {
                success: true,
                message,
            }
        }
        Err(e) => {
            error!("Config generation failed: {e}");
            ActionResult {
                success: false,
                message: format!("Config generation failed: {e}"),
            }
        }
    };
    Ok(Json(result))
}
