// walletlink — operator CLI for wallet connection state
//
// Inspects and repairs the durable session store, checks topics and pairing
// URIs without printing secrets, and shows the retry and recovery schedules
// the connector would run with the current configuration.

mod config;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use walletlink_core::session::{topic, RelayUriMetadata};
use walletlink_core::{
    init_logging, Backoff, ConnectorConfig, PersistedSession, SessionStore, SledStorage,
};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "walletlink")]
#[command(about = "WalletLink — wallet connection resilience tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate or mask relay session topics
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },
    /// Inspect pairing URIs
    Uri {
        #[command(subcommand)]
        action: UriAction,
    },
    /// Manage persisted wallet sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Show retry and recovery schedules
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum TopicAction {
    Validate { topic: String },
    Mask { topic: String },
}

#[derive(Subcommand)]
enum UriAction {
    /// Print redacted metadata for a pairing URI
    Inspect { uri: String },
}

#[derive(Subcommand)]
enum SessionsAction {
    List,
    Show { wallet_id: String },
    Remove { wallet_id: String },
    Activate { wallet_id: String },
    /// Delete expired sessions
    Prune,
    /// Import single-session records left by older releases
    Migrate,
}

#[derive(Subcommand)]
enum PlanAction {
    Backoff {
        #[arg(short, long)]
        retries: Option<u32>,
    },
    Recovery,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load()?;
    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Topic { action } => cmd_topic(action),
        Commands::Uri { action } => cmd_uri(action),
        Commands::Sessions { action } => cmd_sessions(&config, action),
        Commands::Plan { action } => cmd_plan(&config.connector, action),
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn cmd_topic(action: TopicAction) -> Result<()> {
    match action {
        TopicAction::Validate { topic: raw } => match topic::validate(Some(&raw)) {
            Ok(valid) => {
                println!("{} Valid topic {}", "✓".green(), valid.masked().bright_cyan());
            }
            Err(e) => {
                println!("{} {} ({:?})", "✗".red(), e, e.kind());
                anyhow::bail!("Invalid topic");
            }
        },
        TopicAction::Mask { topic: raw } => {
            println!("{}", topic::mask_for_logging(Some(&raw)));
        }
    }
    Ok(())
}

fn cmd_uri(action: UriAction) -> Result<()> {
    match action {
        UriAction::Inspect { uri } => {
            let metadata = RelayUriMetadata::from_raw(&uri);
            let rendered =
                serde_json::to_string_pretty(&metadata).context("Failed to render URI metadata")?;
            println!("{}", rendered);
            if let Some(error) = &metadata.parse_error {
                anyhow::bail!("URI did not parse: {}", error);
            }
        }
    }
    Ok(())
}

fn open_store(config: &CliConfig) -> Result<SessionStore> {
    let path = config.storage_path()?;
    let backend = SledStorage::open(&path)
        .with_context(|| format!("Failed to open session store at {}", path.display()))?;
    debug!(path = %path.display(), "Opened session store");
    Ok(SessionStore::new(Arc::new(backend)).with_session_ttl(config.connector.session_ttl))
}

fn cmd_sessions(config: &CliConfig, action: SessionsAction) -> Result<()> {
    let store = open_store(config)?;

    match action {
        SessionsAction::List => {
            let state = store.get_all();
            if state.is_empty() {
                println!("{}", "No sessions stored.".dimmed());
                return Ok(());
            }

            println!("{} ({} total)", "Sessions".bold(), state.len());
            println!();
            let now = Utc::now();
            for (wallet_id, session) in &state.sessions {
                let marker = if state.active_wallet_id.as_deref() == Some(wallet_id.as_str()) {
                    "*".bright_green()
                } else {
                    " ".normal()
                };
                let status = if session.is_connected_at(now) {
                    "connected".green()
                } else {
                    "expired".red()
                };
                println!("  {} {} [{}]", marker, wallet_id.bright_cyan(), status);
                println!(
                    "      {} on {}, expires {}",
                    session.wallet_kind.display_name(),
                    session.chain,
                    format_time(session.expires_at).dimmed()
                );
            }
        }

        SessionsAction::Show { wallet_id } => {
            let session = store
                .get(&wallet_id)
                .with_context(|| format!("No session for {}", wallet_id))?;
            let active = store.active_wallet_id().as_deref() == Some(wallet_id.as_str());
            print_session(&wallet_id, &session, active);
        }

        SessionsAction::Remove { wallet_id } => match store.remove(&wallet_id)? {
            Some(_) => {
                info!(wallet_id = %wallet_id, "Removed session");
                println!("{} Removed session: {}", "✓".green(), wallet_id.bright_cyan());
                match store.active_wallet_id() {
                    Some(active) => println!("  Active wallet: {}", active.bright_cyan()),
                    None => println!("  {}", "No active wallet".dimmed()),
                }
            }
            None => anyhow::bail!("No session for {}", wallet_id),
        },

        SessionsAction::Activate { wallet_id } => {
            store.set_active(&wallet_id)?;
            info!(wallet_id = %wallet_id, "Activated session");
            println!("{} Active wallet: {}", "✓".green(), wallet_id.bright_cyan());
        }

        SessionsAction::Prune => {
            let removed = store.remove_expired()?;
            info!(removed, "Pruned expired sessions");
            println!("{} Removed {} expired session(s)", "✓".green(), removed);
        }

        SessionsAction::Migrate => {
            let migrated = store.migrate_legacy()?;
            info!(migrated, "Legacy session migration finished");
            if migrated {
                println!("{} Legacy sessions imported", "✓".green());
                if let Some(active) = store.active_wallet_id() {
                    println!("  Active wallet: {}", active.bright_cyan());
                }
            } else {
                println!("{}", "No legacy sessions to import.".dimmed());
            }
        }
    }

    Ok(())
}

fn print_session(wallet_id: &str, session: &PersistedSession, active: bool) {
    println!("{}", "Session Details".bold());
    println!("  Wallet ID:  {}", wallet_id.bright_cyan());
    println!("  Wallet:     {}", session.wallet_kind.display_name());
    println!("  Type:       {:?}", session.session_type);
    println!("  Chain:      {}", session.chain);
    for account in &session.accounts {
        println!("  Account:    {}", account);
    }
    println!("  Reference:  {}", session.masked_reference().bright_yellow());
    println!("  Created:    {}", format_time(session.created_at));
    println!("  Last used:  {}", format_time(session.last_used_at));
    println!("  Expires:    {}", format_time(session.expires_at));
    println!(
        "  Status:     {}",
        if session.is_expired() {
            "expired".red()
        } else if active {
            "active".bright_green()
        } else {
            "connected".green()
        }
    );
}

fn cmd_plan(connector: &ConnectorConfig, action: PlanAction) -> Result<()> {
    match action {
        PlanAction::Backoff { retries } => {
            let backoff = Backoff::new(connector.backoff.clone());
            let retries = retries.unwrap_or(connector.backoff.max_retries);
            let jitter = connector.backoff.jitter_factor;

            println!("{}", "Proposal retry schedule".bold());
            println!("  jitter: ±{:.0}% of each delay", jitter * 100.0);
            println!();

            let mut total = Duration::ZERO;
            for retry in 0..retries {
                let delay = backoff.base_delay(retry);
                total += delay;
                println!(
                    "  retry {:<3} wait {:>8}  (cumulative {})",
                    retry + 1,
                    format_duration(delay),
                    format_duration(total).dimmed()
                );
            }
        }

        PlanAction::Recovery => {
            println!("{}", "Recovery schedule after approval timeout".bold());
            println!();
            for (at, step) in recovery_schedule(connector) {
                println!("  {:>9}  {}", format_duration(at).bright_cyan(), step);
            }

            println!();
            println!(
                "  Recovery window: {}",
                format_duration(connector.recovery.worst_case_window()).bright_yellow()
            );
            println!(
                "  Worst case per attempt: {}",
                format_duration(connector.worst_case_attempt()).bright_yellow()
            );
        }
    }

    Ok(())
}

/// Worst-case timeline of one recovery run, offset from the start of the
/// attempt; the last entry lands on `worst_case_attempt()`
fn recovery_schedule(connector: &ConnectorConfig) -> Vec<(Duration, String)> {
    let recovery = &connector.recovery;
    let lookup = format_duration(recovery.relay_check_timeout);
    let mut steps = Vec::new();
    let mut at = connector.primary_timeout;
    steps.push((at, "primary approval timeout".to_string()));

    at += recovery.pre_poll_delay;
    steps.push((at, format!("pre-poll check (relay lookup up to {})", lookup)));
    at += recovery.relay_check_timeout;

    for (index, timeout) in recovery.reconnect_timeouts.iter().enumerate() {
        if index > 0 {
            at += recovery.inter_attempt_delay;
        }
        steps.push((
            at,
            format!("reconnect #{} (up to {})", index + 1, format_duration(*timeout)),
        ));
        at += *timeout;
    }

    steps.push((
        at,
        format!(
            "settle {} after a successful reconnect, then relay lookup up to {}",
            format_duration(recovery.settle_delay),
            lookup
        ),
    ));
    at += recovery.settle_delay + recovery.relay_check_timeout;

    for poll in 1..=recovery.max_polls {
        at += recovery.poll_interval;
        steps.push((at, format!("store poll #{}", poll)));
    }

    steps.push((at, "recovery exhausted".to_string()));
    steps
}

fn cmd_config(mut config: CliConfig, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            info!(key = %key, "Updated config");
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<38} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", CliConfig::config_file()?.display());
        }
    }

    Ok(())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
