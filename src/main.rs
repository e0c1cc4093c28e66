use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use perpbot::config::Settings;
use perpbot::engine::{CycleOutcome, TradingEngine};
use perpbot::exchange::{ExchangeApi, PaperExchange, RetryExecutor, RetryPolicy};
use perpbot::fees::FeeGate;
use perpbot::models::Signal;
use perpbot::monitor::{spawn_cleanup, ErrorMonitor, MonitorConfig};
use perpbot::state::StateStore;

/// How often the cleanup pass prunes old error records
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
/// Paper exchange seed price when no feed is attached
const PAPER_SEED_PRICE: f64 = 100.0;
const PAPER_SEED_BALANCE: f64 = 10_000.0;

#[derive(Parser, Debug)]
#[command(name = "perpbot", about = "Fault-tolerant perpetuals trading bot")]
struct Cli {
    /// Trading symbol, overrides SYMBOL from the environment
    #[arg(long)]
    symbol: Option<String>,

    /// Directory for state files, overrides STATE_FILE/ROI_FILE
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Submit real orders instead of paper trading
    #[arg(long)]
    live: bool,

    /// Wipe all persisted state and exit
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;

    if let Some(symbol) = cli.symbol {
        settings.symbol = symbol;
    }
    if let Some(dir) = &cli.state_dir {
        settings.state_file = dir.join("bot_state.json");
        settings.roi_file = dir.join("roi_data.json");
    }
    if cli.live {
        settings.dry_run = false;
    }

    tracing::info!("🚀 Perpbot starting");
    tracing::info!("  Symbol: {}", settings.symbol);
    tracing::info!("  Dry run: {}", settings.dry_run);
    tracing::info!("  Leverage: {}x", settings.leverage);
    tracing::info!("  Poll interval: {}s", settings.poll_interval_secs);

    let store = Arc::new(StateStore::open(
        settings.state_file.clone(),
        settings.roi_file.clone(),
        settings.initial_balance,
    )?);

    if cli.reset {
        store.reset()?;
        tracing::info!("State wiped, exiting");
        return Ok(());
    }

    if !settings.dry_run {
        anyhow::bail!("no live exchange client is configured in this build; run without --live");
    }

    let monitor = Arc::new(ErrorMonitor::new(MonitorConfig {
        error_threshold: settings.circuit_breaker_errors,
        window_hours: settings.circuit_breaker_window_hours,
    }));
    let cleanup_task = spawn_cleanup(monitor.clone(), CLEANUP_INTERVAL);

    let exchange = Arc::new(PaperExchange::new(PAPER_SEED_PRICE, PAPER_SEED_BALANCE));
    let executor = RetryExecutor::new(RetryPolicy {
        max_retries: settings.retry_attempts,
        base_delay: Duration::from_secs_f64(settings.retry_delay),
        ..RetryPolicy::default()
    });

    let fee_gate = FeeGate::new(settings.maker_fee_rate, settings.taker_fee_rate)?;
    let engine = TradingEngine::new(
        settings.clone(),
        exchange.clone(),
        executor.clone(),
        fee_gate,
        monitor.clone(),
        store.clone(),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = trading_loop(&engine, &executor, exchange, &settings, &store) => {
            result?;
        }
    }

    cleanup_task.shutdown().await;

    if let Some(perf) = store.performance() {
        tracing::info!(
            "Final performance: {} trades, {:.1}% win rate, {:.2}% ROI",
            perf.total_trades,
            perf.win_rate,
            perf.total_roi
        );
    }
    tracing::info!("👋 Perpbot stopped");
    Ok(())
}

/// Drive the engine on a fixed interval. In dry-run mode the paper price is
/// nudged with a small random walk each tick so cycles actually trade.
async fn trading_loop(
    engine: &TradingEngine,
    executor: &RetryExecutor,
    exchange: Arc<PaperExchange>,
    settings: &Settings,
    store: &Arc<StateStore>,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.poll_interval_secs));

    loop {
        ticker.tick().await;

        let step = 1.0 + (rand::random::<f64>() - 0.5) * 0.02;
        let api: &dyn ExchangeApi = exchange.as_ref();
        let price = match executor
            .execute("market_price", || api.market_price(&settings.symbol))
            .await
        {
            Ok(price) => price * step,
            Err(err) => {
                tracing::error!("Price fetch failed: {}", err);
                continue;
            }
        };
        exchange.set_price(price);

        let signal = next_signal(store, settings, price);
        match engine.run_cycle(signal, price).await? {
            CycleOutcome::Opened { size, price } => {
                tracing::info!("Opened {:.6} @ ${:.4}", size, price);
            }
            CycleOutcome::Closed { pnl, roi } => {
                tracing::info!("Closed with PnL ${:.2} ({:.2}%)", pnl, roi);
            }
            CycleOutcome::Halted => {
                let status = engine_status(store);
                tracing::warn!("Trading halted by circuit breaker{}", status);
            }
            CycleOutcome::FeeFiltered | CycleOutcome::NoAction | CycleOutcome::Failed { .. } => {}
        }
    }
}

/// Placeholder signal source for dry runs: enter flat, exit at the profit
/// target. Stop losses are handled inside the engine.
fn next_signal(store: &Arc<StateStore>, settings: &Settings, price: f64) -> Signal {
    match store.current_position() {
        None => Signal::Buy,
        Some(pos) => {
            let target = pos.entry_price * (1.0 + settings.take_profit_percent / 100.0);
            if price >= target {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
    }
}

fn engine_status(store: &Arc<StateStore>) -> String {
    match store.current_position() {
        Some(pos) => format!(" (position open: {} {:.6})", pos.symbol, pos.size),
        None => String::new(),
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perpbot=info".into()),
        )
        .init();
}
