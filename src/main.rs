use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_bridge::config::{BridgeConfig, RuntimeConfig};
use mail_bridge::import::{DEFAULT_MAILDIR_ROOT, MaildirImporter};
use mail_bridge::pipeline::{LdaAgent, MailMessage, MessageProcessor};
use mail_bridge::store::ConfigStore;
use mail_bridge::vault::Vault;
use mail_bridge::web::{self, AppState};
use mail_bridge::{DELIVERY_LOG_FILE, check, fetchmail};

/// mail-bridge: POP3 → rule routing → local mailboxes
#[derive(Parser)]
#[command(name = "mail-bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Accounts/rules file (overrides MAIL_BRIDGE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Route one message from stdin and hand it to the delivery agent
    Deliver {
        /// Local mailbox user
        user: String,
    },
    /// Write the fetchmail run-control file
    Generate {
        /// Output path (overrides MAIL_BRIDGE_FETCHMAILRC)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Run the admin web UI
    Serve {
        /// Port (overrides MAIL_BRIDGE_WEB_PORT)
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Validate the configuration file
    Check,
    /// Import .eml / .mbox files into a user's Maildir
    Import {
        /// .eml file, .mbox file, or directory of .eml files
        source: PathBuf,
        /// Local mailbox user
        #[arg(long)]
        user: String,
        /// Maildir root
        #[arg(long, default_value = DEFAULT_MAILDIR_ROOT)]
        maildir: PathBuf,
    },
    /// Encrypt a password (read from stdin) for the config file
    Encrypt,
    /// Print `export` lines for vault-stored passwords
    CredentialsEnv,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut runtime = RuntimeConfig::from_env();
    if let Some(path) = cli.config.clone() {
        runtime.config_path = path;
    }

    let _guard = init_tracing(&cli.command, &runtime);

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    if let Err(e) = run(cli.command, runtime).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Console logging for every command; `deliver` also appends to the
/// delivery log tailed by the status page.
fn init_tracing(command: &Command, runtime: &RuntimeConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    if matches!(command, Command::Deliver { .. })
        && std::fs::create_dir_all(&runtime.log_dir).is_ok()
    {
        let appender = tracing_appender::rolling::never(&runtime.log_dir, DELIVERY_LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(file)
            .init();
        return Some(guard);
    }

    tracing_subscriber::registry().with(filter).with(console).init();
    None
}

async fn run(command: Command, runtime: RuntimeConfig) -> anyhow::Result<()> {
    let vault = Arc::new(Vault::from_env().context("Failed to initialise credential vault")?);
    let store = Arc::new(ConfigStore::new(runtime.config_path.clone(), vault.clone()));

    match command {
        Command::Deliver { user } => deliver(&store, &runtime, &user).await,
        Command::Generate { output } => {
            let config = store.load().await?;
            let output = output.unwrap_or_else(|| runtime.fetchmailrc_path.clone());
            let rc = fetchmail::generate(&config, &runtime.mda_command, &output)?;
            println!(
                "Generated {} ({} account(s), {} skipped)",
                output.display(),
                rc.written.len(),
                rc.skipped.len()
            );
            Ok(())
        }
        Command::Serve { port } => {
            let port = port.unwrap_or(runtime.web_port);
            let state = AppState {
                store,
                runtime: Arc::new(runtime),
            };
            let app = web::router(state);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("Failed to bind web UI port {port}"))?;
            info!(port, "Admin web UI started");
            axum::serve(listener, app).await?;
            Ok(())
        }
        Command::Check => {
            let config = store.load().await?;
            let report = check::check(&config, &vault, &runtime.mda_command, |var| {
                std::env::var_os(var).is_some()
            });
            println!("{report}");
            if report.has_errors() {
                bail!("configuration has blocking problems");
            }
            Ok(())
        }
        Command::Import {
            source,
            user,
            maildir,
        } => {
            let report = tokio::task::spawn_blocking(move || {
                MaildirImporter::new(&maildir, &user).import(&source)
            })
            .await??;
            println!(
                "Imported {} message(s), {} failed",
                report.imported, report.failed
            );
            Ok(())
        }
        Command::Encrypt => {
            let mut password = String::new();
            std::io::stdin()
                .read_line(&mut password)
                .context("Failed to read password from stdin")?;
            let password = password.trim_end_matches(['\r', '\n']);
            if password.is_empty() {
                bail!("empty password");
            }
            println!("{}", vault.encrypt(&password.into())?);
            Ok(())
        }
        Command::CredentialsEnv => {
            let config = store.load().await?;
            print!("{}", fetchmail::credential_exports(&store, &config));
            Ok(())
        }
    }
}

async fn deliver(store: &ConfigStore, runtime: &RuntimeConfig, user: &str) -> anyhow::Result<()> {
    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("Failed to read message from stdin")?;
    let message = MailMessage::parse(raw);

    // Mail is never dropped over a broken config; route with no rules instead.
    let config = match store.load().await {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {e}");
            BridgeConfig::default()
        }
    };

    let agent = Arc::new(LdaAgent::new(runtime.lda_program.clone()));
    let processor = MessageProcessor::from_config(&config, agent);
    processor.process(user, &message).await?;
    Ok(())
}
