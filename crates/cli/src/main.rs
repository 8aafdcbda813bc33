//! Operator CLI for the token catalog.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokencat_catalog::{CatalogStore, DeltaOptions, Timestamps, UpsertOptions};
use tokencat_core::config::AppConfig;
use tokencat_core::{AddressHash, HolderDelta, TokenParams};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENV_PREFIX: &str = "TOKENCAT_";

#[derive(Parser, Debug)]
#[command(name = "tokencatctl")]
#[command(about = "Operator CLI for the token catalog")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TOKENCAT_CONFIG",
        default_value = "config/tokencat.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update the catalog schema
    Migrate,
    /// Check catalog connectivity
    Health,
    /// Upsert a JSON array of token records
    Upsert {
        /// JSON file with an array of token records
        #[arg(long)]
        file: PathBuf,
        /// Write every record without first dropping unchanged ones
        #[arg(long)]
        skip_filter: bool,
    },
    /// Apply a JSON array of holder count deltas
    ApplyDeltas {
        /// JSON file with an array of {contract_address_hash, delta} objects
        #[arg(long)]
        file: PathBuf,
    },
    /// Print one token record
    Show {
        /// Contract address (hex, optional 0x prefix)
        address: AddressHash,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays valid JSON.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(Path::new(&cli.config))?;
    let store = tokencat_catalog::from_config(&config.catalog)
        .await
        .context("failed to initialize catalog store")?;

    match cli.command {
        Commands::Migrate => {
            store.migrate().await.context("migration failed")?;
            tracing::info!("Catalog schema is up to date");
        }
        Commands::Health => {
            store.health_check().await.context("health check failed")?;
            println!("ok");
        }
        Commands::Upsert { file, skip_filter } => {
            handle_upsert(store, &config, &file, skip_filter).await?;
        }
        Commands::ApplyDeltas { file } => {
            handle_apply_deltas(store, &config, &file).await?;
        }
        Commands::Show { address } => {
            let token = store
                .get_token(&address)
                .await
                .with_context(|| format!("failed to read token {address}"))?
                .ok_or_else(|| anyhow::anyhow!("token {address} not found"))?;
            print_json(&token)?;
        }
    }

    Ok(())
}

/// Load configuration from an optional TOML file overlaid with `TOKENCAT_` environment variables.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = path.exists();

    if has_config_file {
        tracing::info!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with(ENV_PREFIX) && key != "TOKENCAT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: tokencatctl --config /path/to/tokencat.toml\n  \
             2. Environment variables: TOKENCAT_CATALOG__TYPE=postgres \
             TOKENCAT_CATALOG__URL=postgres://... tokencatctl\n\n\
             Set TOKENCAT_CONFIG env var to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    Ok(config)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_upsert(
    store: Arc<dyn CatalogStore>,
    config: &AppConfig,
    file: &Path,
    skip_filter: bool,
) -> Result<()> {
    let candidates: Vec<TokenParams> = read_json(file).await?;
    let submitted = candidates.len();
    let options = UpsertOptions::new(&config.import, Timestamps::now());

    let candidates = if skip_filter {
        candidates
    } else {
        store
            .filter_changed_tokens(candidates, &options.policy)
            .await
            .context("failed to filter unchanged tokens")?
    };

    let rows = store
        .upsert_tokens(candidates, &options)
        .await
        .context("token upsert failed")?;

    tracing::info!(
        submitted = submitted,
        upserted = rows.len(),
        "Token batch applied"
    );
    print_json(&rows)
}

async fn handle_apply_deltas(
    store: Arc<dyn CatalogStore>,
    config: &AppConfig,
    file: &Path,
) -> Result<()> {
    let deltas: Vec<HolderDelta> = read_json(file).await?;
    let submitted = deltas.len();
    let options = DeltaOptions::new(&config.import, OffsetDateTime::now_utc());

    let counts = store
        .update_holder_counts(deltas, &options)
        .await
        .context("holder count update failed")?;

    tracing::info!(
        submitted = submitted,
        updated = counts.len(),
        "Holder deltas applied"
    );
    print_json(&counts)
}
