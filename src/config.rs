//! Configuration types.
//!
//! Two layers:
//! - [`BridgeConfig`]: the accounts/rules/settings file managed by the web UI
//!   and read by every subcommand (see [`crate::store::ConfigStore`]).
//! - [`RuntimeConfig`]: process-level paths and ports, built from environment
//!   variables.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default POP3S port.
pub const DEFAULT_POP_PORT: u16 = 995;

/// Default fetchmail poll interval in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 300;

/// Default push-notification timeout in seconds.
pub const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 5;

/// Prefix of derived credential environment variable names.
pub const PASSWORD_ENV_PREFIX: &str = "MAIL_BRIDGE_PASSWORD_";

fn default_true() -> bool {
    true
}

fn default_pop_port() -> u16 {
    DEFAULT_POP_PORT
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_push_timeout() -> u64 {
    DEFAULT_PUSH_TIMEOUT_SECS
}

// ── Config file schema ──────────────────────────────────────────────

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
}

/// Global settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// fetchmail daemon poll interval, seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub push_notifications: PushSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL_SECS,
            push_notifications: PushSettings::default(),
        }
    }
}

/// Webhook push-notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Request timeout, seconds.
    #[serde(default = "default_push_timeout")]
    pub timeout: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            timeout: DEFAULT_PUSH_TIMEOUT_SECS,
        }
    }
}

impl PushSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

/// A polled POP3 account.
///
/// Every field is optional in the file so that an incomplete entry loads
/// fine and is skipped later (run-control generation warns about it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pop_server: Option<String>,
    #[serde(default = "default_pop_port")]
    pub pop_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Name of an environment variable holding the plaintext password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// Vault token (see [`crate::vault::Vault`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_password: Option<String>,
    #[serde(default = "default_true")]
    pub ssl: bool,
    /// Leave messages on the server after retrieval.
    #[serde(default = "default_true")]
    pub keep: bool,
    /// Local mailbox user that receives this account's mail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imap_user: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Account {
    /// A new enabled account with defaults and no connection details.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pop_server: None,
            pop_port: DEFAULT_POP_PORT,
            user: None,
            password_env: None,
            encrypted_password: None,
            ssl: true,
            keep: true,
            imap_user: None,
            enabled: true,
        }
    }

    /// Whether any credential reference (env var or vault token) is present.
    pub fn has_credential_ref(&self) -> bool {
        non_empty(&self.password_env).is_some() || non_empty(&self.encrypted_password).is_some()
    }

    /// Environment variable the polling daemon reads this account's password from.
    ///
    /// An explicit `password_env` wins; accounts that only carry a vault token get
    /// a name derived from the account name.
    pub fn password_env_name(&self) -> Option<String> {
        if let Some(env) = non_empty(&self.password_env) {
            return Some(env.to_string());
        }
        non_empty(&self.encrypted_password).map(|_| derived_env_name(&self.name))
    }

    /// Name for logs and reports; blank names show as `unnamed`.
    pub fn label(&self) -> &str {
        match self.name.trim() {
            "" => "unnamed",
            name => name,
        }
    }

    /// Required fields that are missing or blank, by their file key.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if non_empty(&self.pop_server).is_none() {
            missing.push("pop_server");
        }
        if non_empty(&self.user).is_none() {
            missing.push("user");
        }
        if !self.has_credential_ref() {
            missing.push("password_env");
        }
        if non_empty(&self.imap_user).is_none() {
            missing.push("imap_user");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Fields whose values cannot be written into the run-control file.
    ///
    /// Control characters are refused everywhere. The server is written
    /// unquoted and must be a single word; `password_env` must be a plain
    /// variable name.
    pub fn unsafe_fields(&self) -> Vec<&'static str> {
        let mut bad = Vec::new();
        if has_control(&self.name) {
            bad.push("name");
        }
        if non_empty(&self.pop_server)
            .is_some_and(|s| s.chars().any(|c| c.is_whitespace() || c.is_control() || c == '"'))
        {
            bad.push("pop_server");
        }
        if non_empty(&self.user).is_some_and(has_control) {
            bad.push("user");
        }
        if non_empty(&self.password_env).is_some_and(|v| !is_env_name(v)) {
            bad.push("password_env");
        }
        if non_empty(&self.imap_user).is_some_and(has_control) {
            bad.push("imap_user");
        }
        bad
    }
}

pub(crate) fn has_control(value: &str) -> bool {
    value.chars().any(char::is_control)
}

fn is_env_name(value: &str) -> bool {
    let mut chars = value.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derived environment variable name for an account's password.
pub fn derived_env_name(account_name: &str) -> String {
    let suffix: String = account_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{PASSWORD_ENV_PREFIX}{suffix}")
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// A routing rule: conditions plus the action applied on match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default = "unnamed_rule")]
    pub name: String,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub action: RuleAction,
}

fn unnamed_rule() -> String {
    "unnamed".to_string()
}

/// Condition predicates. An absent key places no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_contains: Option<Terms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_contains: Option<Terms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<Terms>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.subject_contains.is_none()
            && self.from_contains.is_none()
            && self.body_contains.is_none()
    }
}

/// A single search term or a list of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Terms {
    One(String),
    Many(Vec<String>),
}

impl Terms {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Terms::One(term) => std::slice::from_ref(term),
            Terms::Many(terms) => terms,
        }
    }
}

impl From<&str> for Terms {
    fn from(term: &str) -> Self {
        Terms::One(term.to_string())
    }
}

impl From<Vec<&str>> for Terms {
    fn from(terms: Vec<&str>) -> Self {
        Terms::Many(terms.into_iter().map(String::from).collect())
    }
}

/// What a matching rule does. Absent fields keep the routing defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_notify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_title: Option<String>,
}

impl RuleAction {
    pub fn is_empty(&self) -> bool {
        self.folder.is_none()
            && self.mark_as.is_none()
            && self.push_notify.is_none()
            && self.push_title.is_none()
    }
}

impl BridgeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str, origin: &std::path::Path) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Check structural invariants, collecting every problem.
    ///
    /// Incomplete accounts, nameless ones included, are not errors here; they
    /// are skipped with a warning where they would be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let mut names = HashSet::new();
        for (i, account) in self.accounts.iter().enumerate() {
            let name = account.name.trim();
            if !name.is_empty() && !names.insert(name) {
                problems.push(format!("accounts[{i}]: duplicate account name '{name}'"));
            }
            let label = account.label().escape_debug();
            if account.pop_port == 0 {
                problems.push(format!("accounts[{i}] '{label}': pop_port must be non-zero"));
            }
            for field in account.unsafe_fields() {
                problems.push(format!(
                    "accounts[{i}] '{label}': {field} contains characters not allowed here"
                ));
            }
        }

        for (i, rule) in self.filter_rules.iter().enumerate() {
            if let Some(folder) = &rule.action.folder
                && folder.trim().is_empty()
            {
                problems.push(format!(
                    "filter_rules[{i}] '{}': action.folder must not be empty",
                    rule.name
                ));
            }
        }

        if self.settings.check_interval == 0 {
            problems.push("settings.check_interval must be non-zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.name == name)
    }

    pub fn account_mut(&mut self, name: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.name == name)
    }
}

// ── Runtime configuration ───────────────────────────────────────────

/// Process-level configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Accounts/rules file.
    pub config_path: PathBuf,
    /// Generated fetchmail run-control file.
    pub fetchmailrc_path: PathBuf,
    /// Directory holding `process_mail.log`.
    pub log_dir: PathBuf,
    /// Web UI port.
    pub web_port: u16,
    /// Delivery agent executable.
    pub lda_program: String,
    /// Command written into `mda` lines; the mailbox user is appended.
    pub mda_command: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/config/accounts.toml"),
            fetchmailrc_path: PathBuf::from("/config/fetchmailrc"),
            log_dir: PathBuf::from("/logs"),
            web_port: 8787,
            lda_program: "dovecot-lda".to_string(),
            mda_command: "/usr/local/bin/mail-bridge deliver".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Build from `MAIL_BRIDGE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config_path = std::env::var("MAIL_BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_path);

        let fetchmailrc_path = std::env::var("MAIL_BRIDGE_FETCHMAILRC")
            .map(PathBuf::from)
            .unwrap_or(defaults.fetchmailrc_path);

        let log_dir = std::env::var("MAIL_BRIDGE_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_dir);

        let web_port: u16 = std::env::var("MAIL_BRIDGE_WEB_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.web_port);

        let lda_program = std::env::var("MAIL_BRIDGE_LDA").unwrap_or(defaults.lda_program);
        let mda_command = std::env::var("MAIL_BRIDGE_MDA").unwrap_or(defaults.mda_command);

        Self {
            config_path,
            fetchmailrc_path,
            log_dir,
            web_port,
            lda_program,
            mda_command,
        }
    }

    /// Delivery log tailed by the status endpoint.
    pub fn delivery_log_path(&self) -> PathBuf {
        self.log_dir.join(crate::DELIVERY_LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    const SAMPLE: &str = r#"
[settings]
check_interval = 120

[settings.push_notifications]
enabled = true
webhook_url = "https://hooks.example.com/mail"

[[accounts]]
name = "work"
pop_server = "pop.example.com"
user = "alice"
password_env = "WORK_PASSWORD"
imap_user = "alice"

[[accounts]]
name = "legacy"
pop_server = "pop.legacy.net"
pop_port = 110
ssl = false
keep = false
enabled = false

[[filter_rules]]
name = "invoices"
[filter_rules.conditions]
subject_contains = ["invoice", "rechnung"]
[filter_rules.action]
folder = "Invoices"

[[filter_rules]]
name = "boss"
[filter_rules.conditions]
from_contains = "Boss"
[filter_rules.action]
folder = "Priority"
push_notify = true
push_title = "Boss mail"
"#;

    #[test]
    fn parses_full_document() {
        let config = BridgeConfig::from_toml(SAMPLE, Path::new("accounts.toml")).unwrap();
        assert_eq!(config.settings.check_interval, 120);
        assert!(config.settings.push_notifications.enabled);
        assert_eq!(config.settings.push_notifications.timeout, 5);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.filter_rules.len(), 2);

        let work = config.account("work").unwrap();
        assert_eq!(work.pop_port, 995);
        assert!(work.ssl);
        assert!(work.keep);
        assert!(work.enabled);
        assert!(work.is_complete());

        let legacy = config.account("legacy").unwrap();
        assert_eq!(legacy.pop_port, 110);
        assert!(!legacy.ssl);
        assert!(!legacy.enabled);
        assert_eq!(legacy.missing_fields(), vec!["user", "password_env", "imap_user"]);
    }

    #[test]
    fn terms_accept_string_or_list() {
        let config = BridgeConfig::from_toml(SAMPLE, Path::new("accounts.toml")).unwrap();
        let invoices = &config.filter_rules[0].conditions;
        assert_eq!(
            invoices.subject_contains.as_ref().unwrap().as_slice(),
            ["invoice", "rechnung"]
        );
        let boss = &config.filter_rules[1].conditions;
        assert_eq!(boss.from_contains.as_ref().unwrap().as_slice(), ["Boss"]);
        assert!(boss.subject_contains.is_none());
    }

    #[test]
    fn empty_document_is_valid() {
        let config = BridgeConfig::from_toml("", Path::new("empty.toml")).unwrap();
        assert!(config.accounts.is_empty());
        assert_eq!(config.settings.check_interval, DEFAULT_CHECK_INTERVAL_SECS);
    }

    #[test]
    fn validation_reports_every_problem() {
        let raw = r#"
[settings]
check_interval = 0

[[accounts]]
name = "a"
pop_port = 0

[[accounts]]
name = "a"

[[filter_rules]]
name = "blank"
[filter_rules.action]
folder = " "
"#;
        let err = BridgeConfig::from_toml(raw, Path::new("bad.toml")).unwrap_err();
        match err {
            ConfigError::Invalid(problems) => {
                assert_eq!(problems.len(), 4, "{problems:?}");
                assert!(problems.iter().any(|p| p.contains("duplicate account name 'a'")));
                assert!(problems.iter().any(|p| p.contains("pop_port")));
                assert!(problems.iter().any(|p| p.contains("action.folder")));
                assert!(problems.iter().any(|p| p.contains("check_interval")));
            }
            other => panic!("Expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn syntax_error_is_parse_error() {
        let err = BridgeConfig::from_toml("[[accounts]\nname=", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn password_env_name_prefers_explicit_reference() {
        let mut account = Account::new("Work Mail");
        assert_eq!(account.password_env_name(), None);

        account.encrypted_password = Some("token".into());
        assert_eq!(
            account.password_env_name().as_deref(),
            Some("MAIL_BRIDGE_PASSWORD_WORK_MAIL")
        );

        account.password_env = Some("WORK_PW".into());
        assert_eq!(account.password_env_name().as_deref(), Some("WORK_PW"));
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let mut account = Account::new("x");
        account.pop_server = Some("  ".into());
        account.user = Some("u".into());
        account.password_env = Some("".into());
        account.imap_user = Some("u".into());
        assert_eq!(account.missing_fields(), vec!["pop_server", "password_env"]);
    }

    #[test]
    fn nameless_account_loads_alongside_others() {
        let raw = r#"
[[accounts]]
name = "work"
pop_server = "pop.example.com"
user = "alice"
password_env = "WORK_PASSWORD"
imap_user = "alice"

[[accounts]]
pop_server = "pop.other.net"
user = "bob"
password_env = "OTHER_PASSWORD"
imap_user = "bob"

[[accounts]]
user = "carol"
"#;
        let config = BridgeConfig::from_toml(raw, Path::new("accounts.toml")).unwrap();
        assert_eq!(config.accounts.len(), 3);
        assert!(config.account("work").unwrap().is_complete());

        let nameless = &config.accounts[1];
        assert_eq!(nameless.label(), "unnamed");
        assert_eq!(nameless.missing_fields(), vec!["name"]);
    }

    #[test]
    fn control_characters_in_account_fields_are_rejected() {
        let mut account = Account::new("x\nset postmaster evil");
        account.pop_server = Some("pop.example.com".into());
        account.user = Some("alice".into());
        account.password_env = Some("PW".into());
        account.imap_user = Some("alice\n  mda \"/bin/sh -c evil\"".into());
        let config = BridgeConfig {
            accounts: vec![account],
            ..Default::default()
        };

        match config.validate().unwrap_err() {
            ConfigError::Invalid(problems) => {
                assert_eq!(problems.len(), 2, "{problems:?}");
                assert!(problems[0].contains("name contains"));
                assert!(problems[1].contains("imap_user contains"));
                assert!(problems.iter().all(|p| !p.contains('\n')));
            }
            other => panic!("Expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn server_and_env_name_must_be_single_words() {
        let mut account = Account::new("a");
        account.pop_server = Some("pop.example.com via evil".into());
        account.password_env = Some("PW; rm -rf".into());
        assert_eq!(account.unsafe_fields(), vec!["pop_server", "password_env"]);

        account.pop_server = Some(" pop.example.com ".into());
        account.password_env = Some("_WORK_PW2".into());
        assert!(account.unsafe_fields().is_empty());
    }

    #[test]
    fn serialization_round_trips_through_toml() {
        let config = BridgeConfig::from_toml(SAMPLE, Path::new("accounts.toml")).unwrap();
        let rendered = config.to_toml().unwrap();
        let reparsed = BridgeConfig::from_toml(&rendered, Path::new("accounts.toml")).unwrap();
        assert_eq!(config, reparsed);
    }
}
