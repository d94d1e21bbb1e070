use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ltv_rebalancer::exchange::binance::BinanceClient;
use ltv_rebalancer::{EngineConfig, RebalanceSettings, RebalanceWorker, RebalancingEngine};

#[derive(Parser)]
#[command(name = "ltv-rebalancer")]
#[command(about = "Keep a leveraged account's loan-to-value ratio near its target", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON); overrides the settings environment variables
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current LTV status
    Status,

    /// Show the actions a rebalance would take, without executing them
    Plan,

    /// Run one full rebalance pass
    Rebalance,

    /// Run the rebalance worker until interrupted
    Run {
        /// Seconds between automatic passes (defaults to AUTO_REBALANCE_INTERVAL_SECS,
        /// then to the minimum rebalance interval)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Check API connectivity and credentials
    Check,

    /// Generate a settings file with default values
    GenerateConfig {
        /// Output path for the settings file
        #[arg(default_value = "rebalance-settings.json")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
        })
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();

    if let Commands::GenerateConfig { output } = &cli.command {
        return generate_config(output);
    }

    let config = load_config(cli.config.as_deref())?;
    info!("{}", config.summary());

    match cli.command {
        Commands::Status => {
            let engine = RebalancingEngine::from_config(&config)?;
            print_json(&engine.get_ltv_status().await)?;
        }
        Commands::Plan => {
            let engine = RebalancingEngine::from_config(&config)?;
            let actions = engine.calculate_optimal_rebalance().await;
            if actions.is_empty() {
                info!("No rebalancing actions proposed");
            }
            print_json(&actions)?;
        }
        Commands::Rebalance => {
            let engine = RebalancingEngine::from_config(&config)?;
            let outcome = engine.perform_full_rebalance().await;
            if outcome.success() {
                info!("✅ {}", outcome.message());
            } else {
                warn!("⚠️ {}", outcome.message());
            }
            print_json(&outcome)?;
        }
        Commands::Run { interval } => run_worker(&config, interval).await?,
        Commands::Check => check(&config).await?,
        Commands::GenerateConfig { .. } => {}
    }

    Ok(())
}

fn load_config(settings_path: Option<&str>) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().wrap_err("failed to load configuration")?;
    if let Some(path) = settings_path {
        config.settings = RebalanceSettings::from_file(path)?;
        info!("📄 Loaded settings from {}", path);
    }
    Ok(config)
}

async fn run_worker(config: &EngineConfig, interval: Option<u64>) -> Result<()> {
    let period = interval
        .or(config.auto_rebalance_interval_secs)
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.settings.min_rebalance_interval());

    let engine = Arc::new(RebalancingEngine::from_config(config)?);
    let (handle, task) = RebalanceWorker::spawn(engine, Some(period));

    info!("⏰ Rebalancing every {}s; press Ctrl+C to stop", period.as_secs());
    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for shutdown signal")?;

    info!("Shutting down...");
    let history = handle.history(usize::MAX).await.unwrap_or_default();
    if let Err(e) = handle.shutdown().await {
        warn!("{}", e);
    }
    if let Err(e) = task.await {
        error!("Rebalance worker panicked: {}", e);
    }

    let failed = history.iter().filter(|a| !a.success).count();
    info!(
        "📈 Session summary: {} actions executed, {} failed",
        history.len(),
        failed
    );
    print_json(&history)
}

async fn check(config: &EngineConfig) -> Result<()> {
    let client = BinanceClient::new(
        &config.api_key,
        &config.secret_key,
        &config.base_url,
        config.request_timeout(),
    )?;

    client
        .ping()
        .await
        .wrap_err_with(|| format!("{} is not reachable", client.base_url()))?;
    info!("✅ {} is reachable", client.base_url());

    let account = client
        .account_info()
        .await
        .wrap_err("signed request failed; check BINANCE_API_KEY and BINANCE_SECRET_KEY")?;
    info!("✅ Credentials accepted (trading enabled: {})", account.can_trade);

    let engine = RebalancingEngine::from_config(config)?;
    let status = engine.get_ltv_status().await;
    if status.is_error() {
        error!("❌ Account snapshot failed on {}", engine.exchange_name());
    } else {
        info!("✅ Account snapshot OK ({} flavor)", config.flavor);
    }
    print_json(&status)
}

fn generate_config(output: &str) -> Result<()> {
    info!("Generating settings file: {}", output);

    let settings = RebalanceSettings::default();
    settings.save_to_file(output)?;

    info!("✅ Settings file generated successfully!");
    info!("Edit {} and pass it with --config", output);
    print_json(&settings)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
