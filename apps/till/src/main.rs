//! caixa-till - maintenance commands for a till's database.
//!
//! # Usage
//!
//! ```bash
//! # Create or upgrade the database
//! caixa-till migrate
//!
//! # Reconciliation summary of a session, as JSON
//! caixa-till report 5b0c6f0e-3a52-4c1e-9d1b-0b8f4f6e2a10
//!
//! # Retry rejected / errored invoices from yesterday
//! caixa-till reprocess --since 2026-03-14T00:00:00-03:00 --until 2026-03-15T00:00:00-03:00
//!
//! # Print the effective configuration
//! caixa-till config
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use caixa_db::{Database, DbConfig};
use caixa_till::{Till, TillConfig, TillError};

#[derive(Parser)]
#[command(name = "caixa-till")]
#[command(author, version, about = "Caixa PDV till tools")]
struct Cli {
    /// Config file (defaults to the platform config dir's till.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database
    Migrate,
    /// Print a cash session's reconciliation as JSON
    Report {
        session_id: String,
    },
    /// Resubmit rejected, errored and never-submitted invoices
    Reprocess {
        /// Only invoices created at or after this instant (RFC 3339)
        #[arg(long, value_parser = parse_instant)]
        since: Option<DateTime<Utc>>,

        /// Only invoices created before this instant (RFC 3339)
        #[arg(long, value_parser = parse_instant)]
        until: Option<DateTime<Utc>>,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Command failed: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caixa=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = TillConfig::load(cli.config)?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
        Commands::Migrate => {
            let db = connect(&config).await?;
            let status = db.migration_status().await?;
            info!(
                migrations = status.applied,
                path = ?config.database.path,
                "Database is up to date"
            );
            db.close().await;
        }
        Commands::Report { session_id } => {
            let db = connect(&config).await?;
            let till = Till::new(db.clone(), &config)?;
            let session = till.session(&session_id).await?;

            let json = if session.is_open() {
                serde_json::to_string_pretty(&till.session_summary(&session_id).await?)?
            } else {
                serde_json::to_string_pretty(&till.session_report(&session_id).await?)?
            };
            println!("{}", json);
            db.close().await;
        }
        Commands::Reprocess { since, until } => {
            if !config.fiscal.enabled {
                return Err(TillError::invalid_state(
                    "fiscal issuance is disabled; set fiscal.enabled or CAIXA_FISCAL_ENABLED",
                )
                .into());
            }
            let db = connect(&config).await?;
            let till = Till::new(db.clone(), &config)?;
            let result = till.reprocess(since, until).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            till.shutdown();
            db.close().await;
        }
    }
    Ok(())
}

async fn connect(config: &TillConfig) -> Result<Database, Box<dyn std::error::Error>> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    info!(?path, "Opening database");
    Ok(Database::new(DbConfig::new(path.clone())).await?)
}
