//! fetchmail run-control generation.
//!
//! Passwords are never written into the file; each stanza references an
//! environment variable (`password "$VAR"`) that the daemon's environment
//! provides.

use std::path::Path;

use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::{Account, BridgeConfig, has_control, non_empty};
use crate::error::ConfigError;
use crate::store::{ConfigStore, write_atomic};

/// An account left out of the generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAccount {
    pub name: String,
    /// Fields that are missing or hold values the file cannot carry.
    pub fields: Vec<&'static str>,
}

/// Rendered run-control text plus what went into it.
#[derive(Debug, Clone)]
pub struct RunControl {
    pub content: String,
    /// Accounts that got a stanza.
    pub written: Vec<String>,
    /// Enabled accounts skipped for missing or unusable fields.
    pub skipped: Vec<SkippedAccount>,
}

/// Render the run-control file for every enabled, complete account.
///
/// `mda_command` is the delivery command; the account's mailbox user is
/// appended to it.
pub fn render(config: &BridgeConfig, mda_command: &str) -> RunControl {
    let interval = config.settings.check_interval;
    let mut content = String::new();
    content.push_str("# Generated fetchmail configuration\n");
    content.push_str(&format!("# Check interval: {interval} seconds\n"));
    content.push_str(&format!("set daemon {interval}\n"));
    content.push_str("set syslog\n");
    content.push_str("set no bouncemail\n");
    content.push_str("set no spambounce\n");
    content.push('\n');

    let mut written = Vec::new();
    let mut skipped = Vec::new();

    for account in config.accounts.iter().filter(|a| a.enabled) {
        let missing = account.missing_fields();
        if !missing.is_empty() {
            warn!(
                account = %account.label().escape_debug(),
                missing = %missing.join(", "),
                "Skipping incomplete account"
            );
            skipped.push(SkippedAccount {
                name: account.label().to_string(),
                fields: missing,
            });
            continue;
        }
        let Some(stanza) = render_account(account, mda_command) else {
            let mut fields = account.unsafe_fields();
            if fields.is_empty() {
                fields.push("mda");
            }
            warn!(
                account = %account.label().escape_debug(),
                fields = %fields.join(", "),
                "Skipping account with values that cannot be written safely"
            );
            skipped.push(SkippedAccount {
                name: account.label().to_string(),
                fields,
            });
            continue;
        };
        content.push_str(&stanza);
        written.push(account.name.clone());
    }

    RunControl {
        content,
        written,
        skipped,
    }
}

/// One `poll` stanza, or `None` if a value would break out of its line.
fn render_account(account: &Account, mda_command: &str) -> Option<String> {
    if !account.unsafe_fields().is_empty() {
        return None;
    }
    // Complete accounts have all of these.
    let server = non_empty(&account.pop_server).unwrap_or_default();
    let user = non_empty(&account.user).unwrap_or_default();
    let imap_user = non_empty(&account.imap_user).unwrap_or_default();
    let env = account.password_env_name().unwrap_or_default();

    let mut out = String::new();
    out.push_str(&format!("# === {} ACCOUNT ===\n", account.name.to_uppercase()));
    out.push_str(&format!("poll {server} protocol POP3\n"));
    out.push_str(&format!("  port {}\n", account.pop_port));
    out.push_str(&format!("  user \"{}\"\n", quote(user)?));
    out.push_str(&format!("  password \"${env}\"\n"));
    if account.ssl {
        out.push_str("  ssl\n");
    }
    if account.keep {
        out.push_str("  keep\n");
    } else {
        out.push_str("  no keep\n");
    }
    out.push_str(&format!(
        "  mda \"{} {}\"\n",
        quote(mda_command)?,
        quote(imap_user)?
    ));
    out.push('\n');
    Some(out)
}

/// Escape for a double-quoted fetchmailrc string. Control characters are
/// refused.
fn quote(value: &str) -> Option<String> {
    if has_control(value) {
        return None;
    }
    Some(value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render and write the run-control file (mode 0600).
pub fn generate(
    config: &BridgeConfig,
    mda_command: &str,
    output: &Path,
) -> Result<RunControl, ConfigError> {
    let rc = render(config, mda_command);
    write_atomic(output, rc.content.as_bytes(), Some(0o600))?;
    info!(
        path = %output.display(),
        accounts = rc.written.len(),
        skipped = rc.skipped.len(),
        "Generated fetchmail configuration"
    );
    Ok(rc)
}

/// `export NAME='…'` lines for accounts whose password lives in the vault.
///
/// Accounts with an explicit `password_env` are left to the operator's
/// environment. Undecryptable tokens are skipped with an error log.
pub fn credential_exports(store: &ConfigStore, config: &BridgeConfig) -> String {
    let mut out = String::new();
    for account in config.accounts.iter().filter(|a| a.enabled && a.is_complete()) {
        if non_empty(&account.password_env).is_some() {
            continue;
        }
        let Some(token) = non_empty(&account.encrypted_password) else {
            continue;
        };
        let Some(env) = account.password_env_name() else {
            continue;
        };
        if let Some(password) = store.vault().decrypt_or_empty(token, &account.name) {
            out.push_str(&format!("export {env}={}\n", shell_quote(password.expose_secret())));
        }
    }
    out
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use super::*;
    use crate::vault::Vault;

    const MDA: &str = "/usr/local/bin/mail-bridge deliver";

    fn complete(name: &str) -> Account {
        let mut a = Account::new(name);
        a.pop_server = Some(format!("pop.{name}.example"));
        a.user = Some(format!("{name}-user"));
        a.password_env = Some(format!("{}_PW", name.to_uppercase()));
        a.imap_user = Some("alice".into());
        a
    }

    #[test]
    fn renders_header_and_stanza() {
        let mut config = BridgeConfig::default();
        config.settings.check_interval = 600;
        config.accounts.push(complete("work"));

        let rc = render(&config, MDA);
        assert!(rc.content.starts_with("# Generated fetchmail configuration\n"));
        assert!(rc.content.contains("set daemon 600\n"));
        assert!(rc.content.contains("set no spambounce\n"));
        assert!(rc.content.contains("# === WORK ACCOUNT ===\n"));
        assert!(rc.content.contains("poll pop.work.example protocol POP3\n"));
        assert!(rc.content.contains("  port 995\n"));
        assert!(rc.content.contains("  user \"work-user\"\n"));
        assert!(rc.content.contains("  password \"$WORK_PW\"\n"));
        assert!(rc.content.contains("  ssl\n"));
        assert!(rc.content.contains("  keep\n"));
        assert!(rc.content.contains("  mda \"/usr/local/bin/mail-bridge deliver alice\"\n"));
        assert_eq!(rc.written, vec!["work"]);
        assert!(rc.skipped.is_empty());
    }

    #[test]
    fn tls_off_and_no_keep() {
        let mut account = complete("plain");
        account.ssl = false;
        account.keep = false;
        account.pop_port = 110;
        let config = BridgeConfig {
            accounts: vec![account],
            ..Default::default()
        };

        let rc = render(&config, MDA);
        assert!(rc.content.contains("  port 110\n"));
        assert!(!rc.content.contains("  ssl\n"));
        assert!(rc.content.contains("  no keep\n"));
    }

    #[test]
    fn account_missing_user_is_skipped_others_written() {
        let mut broken = complete("broken");
        broken.user = None;
        let config = BridgeConfig {
            accounts: vec![complete("first"), broken, complete("last")],
            ..Default::default()
        };

        let rc = render(&config, MDA);
        assert_eq!(rc.written, vec!["first", "last"]);
        assert_eq!(
            rc.skipped,
            vec![SkippedAccount {
                name: "broken".into(),
                fields: vec!["user"],
            }]
        );
        assert!(!rc.content.contains("BROKEN"));
    }

    #[test]
    fn nameless_account_is_skipped() {
        let mut nameless = complete("x");
        nameless.name = String::new();
        let config = BridgeConfig {
            accounts: vec![nameless, complete("work")],
            ..Default::default()
        };

        let rc = render(&config, MDA);
        assert_eq!(rc.written, vec!["work"]);
        assert_eq!(
            rc.skipped,
            vec![SkippedAccount {
                name: "unnamed".into(),
                fields: vec!["name"],
            }]
        );
        assert!(!rc.content.contains("# ===  ACCOUNT"));
    }

    #[test]
    fn newlines_never_reach_the_file() {
        let mut injected_mda = complete("mda");
        injected_mda.imap_user = Some("alice\n  mda \"/bin/sh -c evil\"".into());
        let mut injected_name = complete("name");
        injected_name.name = "x\nset postmaster evil".into();
        let config = BridgeConfig {
            accounts: vec![injected_mda, injected_name, complete("ok")],
            ..Default::default()
        };

        let rc = render(&config, MDA);
        assert_eq!(rc.written, vec!["ok"]);
        assert_eq!(rc.skipped.len(), 2);
        assert_eq!(rc.skipped[0].fields, vec!["imap_user"]);
        assert_eq!(rc.skipped[1].fields, vec!["name"]);
        assert!(!rc.content.contains("evil"));
        assert!(!rc.content.to_lowercase().contains("postmaster"));
        assert_eq!(rc.content.matches("  mda ").count(), 1);
    }

    #[test]
    fn control_characters_in_mda_command_skip_the_stanza() {
        let config = BridgeConfig {
            accounts: vec![complete("work")],
            ..Default::default()
        };
        let rc = render(&config, "/usr/bin/deliver\nset postmaster evil");
        assert!(rc.written.is_empty());
        assert_eq!(rc.skipped[0].fields, vec!["mda"]);
        assert!(!rc.content.contains("evil"));
    }

    #[test]
    fn disabled_accounts_are_left_out_silently() {
        let mut off = complete("off");
        off.enabled = false;
        let config = BridgeConfig {
            accounts: vec![off],
            ..Default::default()
        };
        let rc = render(&config, MDA);
        assert!(rc.written.is_empty());
        assert!(rc.skipped.is_empty());
    }

    #[test]
    fn vault_only_account_references_derived_variable() {
        let mut account = complete("Home Mail");
        account.password_env = None;
        account.encrypted_password = Some("opaque-token".into());
        let config = BridgeConfig {
            accounts: vec![account],
            ..Default::default()
        };
        let rc = render(&config, MDA);
        assert!(rc.content.contains("  password \"$MAIL_BRIDGE_PASSWORD_HOME_MAIL\"\n"));
        assert!(!rc.content.contains("opaque-token"));
    }

    #[test]
    fn quotes_are_escaped() {
        let mut account = complete("q");
        account.user = Some("we\"ird".into());
        let config = BridgeConfig {
            accounts: vec![account],
            ..Default::default()
        };
        assert!(render(&config, MDA).content.contains("  user \"we\\\"ird\"\n"));
    }

    #[cfg(unix)]
    #[test]
    fn generate_writes_owner_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("fetchmailrc");
        let config = BridgeConfig {
            accounts: vec![complete("work")],
            ..Default::default()
        };
        let rc = generate(&config, MDA, &out).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), rc.content);
        let mode = std::fs::metadata(&out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn exports_decrypted_vault_passwords() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::new(&SecretString::from("rc-test")).unwrap();
        let token = vault.encrypt(&SecretString::from("it's secret")).unwrap();
        let store = ConfigStore::new(dir.path().join("accounts.toml"), Arc::new(vault));

        let mut from_vault = complete("home");
        from_vault.password_env = None;
        from_vault.encrypted_password = Some(token);
        let explicit = complete("work");

        let config = BridgeConfig {
            accounts: vec![from_vault, explicit],
            ..Default::default()
        };
        let exports = credential_exports(&store, &config);
        assert_eq!(exports, "export MAIL_BRIDGE_PASSWORD_HOME='it'\\''s secret'\n");
    }
}
