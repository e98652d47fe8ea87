use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gridline_cli::alerts::AlertDispatcher;
use gridline_cli::live::{run_live, LiveSettings};
use gridline_cli::source::CsvStrategySource;
use gridline_config::AppConfig;
use gridline_core::StrategyConfig;
use gridline_engine::OrderController;
use gridline_paper::PaperSession;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about = "Gridline grid-trading order manager")]
struct Cli {
    /// Named environment overlay (config/{env}.toml).
    #[arg(long, global = true)]
    env: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loop against the paper venue
    Run {
        /// Override the strategies file from the configuration
        #[arg(long)]
        strategies: Option<PathBuf>,
    },
    /// Cancel every order this client has on the book, then exit
    CancelAll,
    /// Validate the configuration and the strategies file
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = gridline_config::load_config(cli.env.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{},hyper=warn", config.log_level)),
        )
        .init();

    match cli.command {
        Command::Run { strategies } => run(config, strategies).await,
        Command::CancelAll => cancel_all(config).await,
        Command::CheckConfig => check_config(config).await,
    }
}

async fn run(config: AppConfig, strategies: Option<PathBuf>) -> Result<()> {
    let strategies_file = strategies.unwrap_or(config.source.strategies_file);
    let session = Arc::new(PaperSession::new());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    session.set_event_sender(event_tx);

    let source = Arc::new(CsvStrategySource::new(strategies_file));
    let notifier = Arc::new(AlertDispatcher::new(config.alerting.webhook_url));

    let settings = LiveSettings {
        client_id: config.broker.client_id,
        cycle: Duration::from_secs(config.engine.cycle_secs),
        cancel_wait: Duration::from_secs(config.engine.cancel_wait_secs),
        reconnect_interval: Duration::from_secs(config.broker.reconnect_secs),
        max_connection_loss: Duration::from_secs(config.broker.max_connection_loss_secs),
        heartbeat_path: config.engine.heartbeat_path,
    };
    run_live(session, source, notifier, event_rx, settings).await
}

async fn cancel_all(config: AppConfig) -> Result<()> {
    let session = Arc::new(PaperSession::new());
    session.set_connected(true);
    let controller = OrderController::new(
        session,
        Arc::new(gridline_broker::NoopNotifier),
        config.broker.client_id,
        Duration::from_secs(config.engine.cancel_wait_secs),
    );
    let cancelled = controller.cancel_all().await;
    info!(cancelled, "cancel-all finished");
    Ok(())
}

async fn check_config(config: AppConfig) -> Result<()> {
    println!(
        "broker {}:{} client {} | cycle {}s | strategies {}",
        config.broker.host,
        config.broker.port,
        config.broker.client_id,
        config.engine.cycle_secs,
        config.source.strategies_file.display()
    );

    let source = CsvStrategySource::new(config.source.strategies_file.clone());
    let rows = gridline_broker::StrategySource::fetch_rows(&source)
        .await
        .context("strategies file unreadable")?;

    let mut valid = 0usize;
    for (index, row) in rows.iter().enumerate() {
        match StrategyConfig::from_row(row) {
            Ok(strategy) => {
                valid += 1;
                println!(
                    "  row {index}: strategy {} {} {} active={}",
                    strategy.strategy_id,
                    strategy.instrument.symbol,
                    strategy.instrument.exchange,
                    strategy.active
                );
            }
            Err(err) => warn!(row = index, error = %err, "invalid strategy row"),
        }
    }
    println!("{valid}/{} rows valid", rows.len());
    Ok(())
}
