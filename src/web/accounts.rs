//! Account CRUD and the POP3 connection test.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApiError, AppState};
use crate::config::{Account, BridgeConfig, has_control, non_empty};
use crate::pop3::Pop3Probe;

/// An account as shown by the UI. Never carries a password.
#[derive(Debug, Serialize)]
pub struct AccountView {
    pub name: String,
    pub pop_server: Option<String>,
    pub pop_port: u16,
    pub user: Option<String>,
    pub password_env: Option<String>,
    pub has_password: bool,
    pub ssl: bool,
    pub keep: bool,
    pub imap_user: Option<String>,
    pub enabled: bool,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            name: a.name.clone(),
            pop_server: a.pop_server.clone(),
            pop_port: a.pop_port,
            user: a.user.clone(),
            password_env: a.password_env.clone(),
            has_password: a.has_credential_ref(),
            ssl: a.ssl,
            keep: a.keep,
            imap_user: a.imap_user.clone(),
            enabled: a.enabled,
        }
    }
}

/// Body of POST /api/accounts and PUT /api/accounts/{name}.
#[derive(Debug, Default, Deserialize)]
pub struct AccountRequest {
    pub name: Option<String>,
    pub pop_server: Option<String>,
    pub pop_port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub keep: Option<bool>,
    pub imap_user: Option<String>,
    pub enabled: Option<bool>,
}

impl AccountRequest {
    /// The submitted password; empty means "not given".
    fn password(&self) -> Option<SecretString> {
        self.password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(SecretString::from)
    }

    fn missing_for_create(&self) -> Vec<String> {
        [
            ("name", non_empty(&self.name).is_some()),
            ("pop_server", non_empty(&self.pop_server).is_some()),
            ("user", non_empty(&self.user).is_some()),
            ("password", self.password().is_some()),
            ("imap_user", non_empty(&self.imap_user).is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(field, _)| format!("{field} is required"))
        .collect()
    }

    /// Text fields carrying control characters, which would break the
    /// line-oriented run-control file.
    fn control_char_problems(&self) -> Vec<String> {
        [
            ("name", &self.name),
            ("pop_server", &self.pop_server),
            ("user", &self.user),
            ("imap_user", &self.imap_user),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_some_and(has_control))
        .map(|(field, _)| format!("{field} must not contain control characters"))
        .collect()
    }

    /// The new name requested by an edit, if it differs from `current`.
    fn rename(&self, current: &str) -> Result<Option<String>, ApiError> {
        match self.name.as_deref().map(str::trim) {
            Some("") => Err(ApiError::Unprocessable(vec!["name must not be empty".into()])),
            Some(new) if new != current => Ok(Some(new.to_string())),
            _ => Ok(None),
        }
    }

    /// Copy the provided plain fields onto `account`.
    fn apply(&self, account: &mut Account) {
        let trimmed = |v: &Option<String>| non_empty(v).map(str::to_string);
        if let Some(server) = trimmed(&self.pop_server) {
            account.pop_server = Some(server);
        }
        if let Some(port) = self.pop_port {
            account.pop_port = port;
        }
        if let Some(user) = trimmed(&self.user) {
            account.user = Some(user);
        }
        if let Some(imap_user) = trimmed(&self.imap_user) {
            account.imap_user = Some(imap_user);
        }
        if let Some(ssl) = self.ssl {
            account.ssl = ssl;
        }
        if let Some(keep) = self.keep {
            account.keep = keep;
        }
        if let Some(enabled) = self.enabled {
            account.enabled = enabled;
        }
    }
}

/// `{success, message}` reply used by action endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

/// GET /api/accounts
pub async fn list_accounts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.load_or_default().await?;
    let views: Vec<AccountView> = config.accounts.iter().map(AccountView::from).collect();
    Ok(Json(views))
}

/// GET /api/accounts/{name}
pub async fn get_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.load_or_default().await?;
    let account = config.account(&name).ok_or_else(|| not_found(&name))?;
    Ok(Json(AccountView::from(account)))
}

/// POST /api/accounts
pub async fn create_account(
    State(state): State<AppState>,
    Json(body): Json<AccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut problems = body.missing_for_create();
    problems.extend(body.control_char_problems());
    if !problems.is_empty() {
        return Err(ApiError::Unprocessable(problems));
    }
    let name = non_empty(&body.name).unwrap_or_default().to_string();
    let token = match body.password() {
        Some(password) => state.store.vault().encrypt(&password)?,
        None => return Err(ApiError::Unprocessable(vec!["password is required".into()])),
    };

    let view = state
        .store
        .update(|config: &mut BridgeConfig| -> Result<AccountView, ApiError> {
            if config.account(&name).is_some() {
                return Err(ApiError::Conflict(format!("Account '{name}' already exists")));
            }
            let mut account = Account::new(name.clone());
            body.apply(&mut account);
            account.encrypted_password = Some(token);
            let view = AccountView::from(&account);
            config.accounts.push(account);
            Ok(view)
        })
        .await?;

    info!(account = %view.name, "Account added");
    Ok((StatusCode::CREATED, Json(view)))
}

/// PUT /api/accounts/{name}
///
/// Omitted fields keep their stored values; an empty password keeps the
/// stored password. A different `name` renames the account.
pub async fn update_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<AccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let problems = body.control_char_problems();
    if !problems.is_empty() {
        return Err(ApiError::Unprocessable(problems));
    }
    let new_name = body.rename(&name)?;
    let token = match body.password() {
        Some(password) => Some(state.store.vault().encrypt(&password)?),
        None => None,
    };

    let view = state
        .store
        .update(|config: &mut BridgeConfig| -> Result<AccountView, ApiError> {
            if config.account(&name).is_none() {
                return Err(not_found(&name));
            }
            if let Some(new) = &new_name
                && config.account(new).is_some()
            {
                return Err(ApiError::Conflict(format!("Account '{new}' already exists")));
            }
            let account = config.account_mut(&name).ok_or_else(|| not_found(&name))?;
            body.apply(account);
            if let Some(token) = token {
                account.encrypted_password = Some(token);
            }
            if let Some(new) = &new_name {
                account.name = new.clone();
            }
            Ok(AccountView::from(&*account))
        })
        .await?;

    match &new_name {
        Some(new) => info!(account = %name, renamed_to = %new, "Account updated"),
        None => info!(account = %name, "Account updated"),
    }
    Ok(Json(view))
}

/// DELETE /api/accounts/{name}
pub async fn delete_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .update(|config: &mut BridgeConfig| -> Result<(), ApiError> {
            let before = config.accounts.len();
            config.accounts.retain(|a| a.name != name);
            if config.accounts.len() == before {
                return Err(not_found(&name));
            }
            Ok(())
        })
        .await?;

    info!(account = %name, "Account deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/accounts/{name}/test
pub async fn test_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.load_or_default().await?;
    let account = config.account(&name).ok_or_else(|| not_found(&name))?;

    let server = non_empty(&account.pop_server);
    let user = non_empty(&account.user);
    let password = state.store.password(account);

    let mut missing = Vec::new();
    if server.is_none() {
        missing.push("POP3 server");
    }
    if user.is_none() {
        missing.push("username");
    }
    if password.is_none() {
        missing.push("password");
    }
    let (Some(server), Some(user), Some(password)) = (server, user, password) else {
        return Ok(Json(ActionResult {
            success: false,
            message: format!("Missing required fields: {}", missing.join(", ")),
        }));
    };

    let probe = Pop3Probe::new(server, account.pop_port, user, password, account.ssl);
    let outcome = tokio::task::spawn_blocking(move || probe.run())
        .await
        .map_err(|e| ApiError::Internal(format!("Connection test aborted: {e}")))?;

    let result = match outcome {
        Ok(count) => ActionResult {
            success: true,
            message: format!("Connected successfully! Found {count} messages on server."),
        },
        Err(e) => {
            warn!(account = %name, "POP3 connection test failed: {e}");
            ActionResult {
                success: false,
                message: format!("Connection failed: {e}"),
            }
        }
    };
    Ok(Json(result))
}

fn not_found(name: &str) -> ApiError {
    ApiError::NotFound(format!("Account '{name}' not found"))
}
