//! Shelfsheet operator binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use shelfsheet_core::Sheet;
use shelfsheet_core::config::AppConfig;
use shelfsheet_metadata::Page;
use shelfsheet_pipeline::{SheetService, metrics};
use std::path::PathBuf;
use time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shelfsheet - entry sheet ingestion and storage
#[derive(Parser, Debug)]
#[command(name = "shelfsheet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SHELFSHEET_CONFIG",
        default_value = "config/shelfsheet.toml"
    )]
    config: String,

    /// Print the Prometheus exposition to stderr when the command finishes
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the metadata schema
    Migrate,
    /// Normalize and store a sheet from a JSON file
    Save {
        /// Sheet document
        file: PathBuf,
    },
    /// Print a stored sheet
    Show { id: String },
    /// List sheets, newest first
    List {
        /// Only sheets whose header names this manufacturer
        #[arg(long)]
        manufacturer: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Delete a sheet and its media
    Delete { id: String },
    /// Delete sheets older than the retention horizon
    Purge {
        /// Override the configured horizon
        #[arg(long)]
        horizon_days: Option<u32>,
    },
    /// List known manufacturers
    Manufacturers,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    figment
        .merge(Env::prefixed("SHELFSHEET_").split("__"))
        .extract()
        .context("failed to load configuration")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{json}");
    Ok(())
}

async fn run(service: &SheetService, config: &AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Migrate => {
            service
                .metadata()
                .migrate()
                .await
                .context("migration failed")?;
            print_json(&serde_json::json!({ "migrated": true }))
        }
        Command::Save { file } => {
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let sheet = Sheet::from_json(&json)
                .with_context(|| format!("failed to parse {}", file.display()))?;
            let saved = service.save(sheet).await.context("failed to save sheet")?;
            print_json(&saved)
        }
        Command::Show { id } => print_json(&service.get(&id).await?),
        Command::List {
            manufacturer,
            offset,
            limit,
        } => {
            let page = service
                .list(manufacturer.as_deref(), Page::new(offset, limit))
                .await?;
            print_json(&page)
        }
        Command::Delete { id } => {
            let removed = service.delete(&id).await?;
            print_json(&serde_json::json!({
                "id": id,
                "deleted": removed.is_some(),
            }))
        }
        Command::Purge { horizon_days } => {
            let horizon = horizon_days
                .map(|days| Duration::days(i64::from(days)))
                .unwrap_or_else(|| config.retention.horizon());
            let removed = service.purge(horizon).await?;
            let ids: Vec<&str> = removed.iter().map(|s| s.id.as_str()).collect();
            print_json(&serde_json::json!({
                "purged": ids.len(),
                "ids": ids,
            }))
        }
        Command::Manufacturers => print_json(&service.manufacturers().await?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.config)?;

    metrics::register_metrics();

    let service = shelfsheet_pipeline::from_config(&config)
        .await
        .context("failed to initialize pipeline")?;

    let outcome = run(&service, &config, cli.command).await;

    let report = service.drain_reclaims().await;
    if report.deleted + report.failed > 0 {
        tracing::info!(
            deleted = report.deleted,
            failed = report.failed,
            "blob reclaim finished"
        );
    }

    if cli.metrics {
        eprint!("{}", metrics::encode_metrics());
    }

    outcome
}
