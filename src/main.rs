// Admission Gateway - Main Entry Point
//
// CLI over the admission core:
// - serve: admin HTTP server (metrics, health, per-caller stats)
// - check / record: one admission check or cost recording
// - stats / reset / cleanup / health: operator commands
//
// Command results are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use admission_gateway::config::{Config, LoggingConfig, StoreBackend, StoreConfig};
use admission_gateway::metrics;
use admission_gateway::metrics_server;
use admission_gateway::rate_limit::{
    AdminAction, AdmissionManager, CounterStore, MemoryStore, RedisStore,
};

/// Admission Gateway: rate limits and cost quotas for metered callers
#[derive(Parser, Debug)]
#[command(name = "admission-gateway")]
#[command(author = "Admission Gateway Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Per-caller rate limiting and monthly cost quotas", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the admin HTTP server
    Serve {
        /// Port to listen on (defaults to metrics.port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run both admission checks for one request
    Check {
        /// Caller identifier
        #[arg(long)]
        caller: String,

        /// Caller email, used for the admin bypass
        #[arg(long, default_value = "")]
        email: String,

        /// Estimated cost of the request in USD
        #[arg(long, default_value_t = 0.0)]
        estimated_cost: f64,
    },
    /// Record the realized cost of a request
    Record {
        #[arg(long)]
        caller: String,

        /// Realized cost in USD
        #[arg(long)]
        cost: f64,
    },
    /// Show usage statistics for a caller
    Stats {
        #[arg(long)]
        caller: String,
    },
    /// Reset a caller's cost for the current month (admin only)
    Reset {
        #[arg(long)]
        caller: String,

        /// Email of the admin performing the reset
        #[arg(long)]
        actor: String,
    },
    /// Remove a caller's stale rate windows
    Cleanup {
        #[arg(long)]
        caller: String,
    },
    /// Check counter store connectivity
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    init_tracing(&config.logging, args.verbose)?;
    metrics::init().context("Failed to initialize metrics")?;

    info!("Admission Gateway v{} starting...", env!("CARGO_PKG_VERSION"));

    let store = build_store(&config.store).await?;
    let manager = Arc::new(AdmissionManager::new(config.rate_limit.clone(), store));

    match args.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.metrics.port);
            tokio::select! {
                result = metrics_server::start_admin_server(port, manager) => result?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down"),
            }
        }
        Commands::Check {
            caller,
            email,
            estimated_cost,
        } => match manager.admit(&caller, &email, estimated_cost).await {
            Ok(ticket) => print_json(&ticket)?,
            Err(e) => {
                print_json(&json!({
                    "admitted": false,
                    "status": e.http_status(),
                    "retry_after_secs": e.retry_after_secs(),
                    "error": e.to_string(),
                }))?;
                return Ok(ExitCode::from(2));
            }
        },
        Commands::Record { caller, cost } => {
            let total = manager.record_cost(&caller, cost).await?;
            print_json(&json!({
                "caller_id": caller,
                "recorded_usd": cost.max(0.0),
                "monthly_total_usd": total,
            }))?;
        }
        Commands::Stats { caller } => {
            let stats = manager.get_user_stats(&caller).await?;
            print_json(&stats)?;
        }
        Commands::Reset { caller, actor } => {
            let outcome = AdminAction::ResetQuota { caller_id: caller }
                .execute(&manager, &actor)
                .await?;
            print_json(&outcome)?;
        }
        Commands::Cleanup { caller } => {
            let removed = manager.cleanup_stale_windows(&caller).await?;
            print_json(&json!({ "caller_id": caller, "removed": removed }))?;
        }
        Commands::Health => {
            let report = manager.health_check().await;
            print_json(&report)?;
            if !report.is_healthy() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Initialize tracing to stderr in the configured format
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))?
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

/// Open the configured counter store
async fn build_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory counter store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url)
                .await
                .context("Failed to connect to Redis")?;
            info!("Connected to Redis counter store");
            Ok(Arc::new(store))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
