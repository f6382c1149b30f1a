//! `mail-bridge check`: sanity report over a configuration file.

use std::fmt;

use crate::config::{BridgeConfig, non_empty};
use crate::fetchmail::{self, RunControl};
use crate::vault::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    /// Blocks a working setup; `check` exits non-zero.
    Error,
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Info => "ok",
            Severity::Warning => "warn",
            Severity::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

#[derive(Debug)]
pub struct CheckReport {
    pub accounts: usize,
    pub enabled_accounts: usize,
    pub rules: usize,
    pub findings: Vec<Finding>,
    /// Dry-run of run-control generation.
    pub run_control: RunControl,
}

impl CheckReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Accounts: {} ({} enabled)",
            self.accounts, self.enabled_accounts
        )?;
        writeln!(f, "Filter rules: {}", self.rules)?;
        for finding in &self.findings {
            writeln!(f, "{finding}")?;
        }
        write!(
            f,
            "fetchmailrc dry-run: {} account(s) written, {} skipped",
            self.run_control.written.len(),
            self.run_control.skipped.len()
        )
    }
}

/// Inspect `config`. `env_is_set` answers whether a variable exists in the
/// environment fetchmail will run with.
pub fn check(
    config: &BridgeConfig,
    vault: &Vault,
    mda_command: &str,
    env_is_set: impl Fn(&str) -> bool,
) -> CheckReport {
    let mut findings = Vec::new();
    let mut push = |severity, message: String| findings.push(Finding { severity, message });

    for account in &config.accounts {
        let name = account.label().escape_debug();
        let missing = account.missing_fields();
        match (account.enabled, missing.is_empty()) {
            (true, false) => push(
                Severity::Error,
                format!("account '{name}' is missing: {}", missing.join(", ")),
            ),
            (false, false) => push(
                Severity::Warning,
                format!("disabled account '{name}' is missing: {}", missing.join(", ")),
            ),
            (_, true) => {}
        }

        if let Some(env) = non_empty(&account.password_env) {
            if !env_is_set(env) {
                push(
                    Severity::Warning,
                    format!("account '{name}': environment variable {env} is not set"),
                );
            }
        } else if let Some(token) = non_empty(&account.encrypted_password) {
            if vault.decrypt(token).is_err() {
                push(
                    Severity::Error,
                    format!(
                        "account '{name}': stored password cannot be decrypted with the current key"
                    ),
                );
            }
        }

        let unsafe_fields = account.unsafe_fields();
        if !unsafe_fields.is_empty() {
            push(
                Severity::Error,
                format!(
                    "account '{name}': {} cannot be written to the run-control file",
                    unsafe_fields.join(", ")
                ),
            );
        }

        if missing.is_empty() && unsafe_fields.is_empty() && account.enabled {
            push(Severity::Info, format!("account '{name}' looks complete"));
        }
    }

    for rule in &config.filter_rules {
        if rule.conditions.is_empty() {
            push(
                Severity::Warning,
                format!("rule '{}' has no conditions and matches every message", rule.name),
            );
        }
        if rule.action.is_empty() {
            push(
                Severity::Warning,
                format!("rule '{}' has no action and only stops later rules", rule.name),
            );
        }
    }

    let run_control = fetchmail::render(config, mda_command);

    CheckReport {
        accounts: config.accounts.len(),
        enabled_accounts: config.accounts.iter().filter(|a| a.enabled).count(),
        rules: config.filter_rules.len(),
        findings,
        run_control,
    }
}
