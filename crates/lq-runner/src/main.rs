//! # lq-runner
//!
//! Command-line front end for the price feed.
//!
//! Loads an optional JSON configuration, subscribes the configured tickers
//! through a single [`lq_feed::ConnectionManager`], logs every price update,
//! and reports connection status periodically until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! lq-runner --config feed.json --ticker IDEA --ticker YESBANK --log-level info
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use lq_core::logging::{LogOptions, init_logging};
use lq_core::types::{ConnectionStatus, FeedEvent};
use lq_feed::ConnectionManager;
use tracing::{error, info, warn};

/// Real-time stock price feed client.
#[derive(Parser)]
#[command(name = "lq-runner", about = "Real-time stock price feed client")]
struct Cli {
    /// Configuration file path (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ticker to subscribe to; repeat for several. Added to the config list.
    #[arg(short, long = "ticker")]
    tickers: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit JSON log lines on the console.
    #[arg(long)]
    json_logs: bool,

    /// Seconds between status reports; 0 disables them.
    #[arg(long, default_value_t = 60)]
    status_interval_sec: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    init_logging(&LogOptions {
        level: &cli.log_level,
        dir: cli.log_dir.as_deref(),
        file_prefix: "lq-runner",
        json: cli.json_logs,
    });

    // 2. Load configuration
    let config = lq_core::config::load_config(cli.config.as_deref())?;
    let mut tickers = config.tickers.clone();
    tickers.extend(cli.tickers.iter().cloned());
    if tickers.is_empty() {
        bail!("no tickers given; use --ticker or the config `tickers` list");
    }
    info!("lq-runner starting: endpoint={} tickers={}", config.ws_url(), tickers.join(","));

    // 3. Subscribe; the first subscription opens the connection
    let manager = ConnectionManager::from_config(&config);
    let (id, mut events) = manager.subscribe_channel(&tickers)?;
    info!("subscription {id} registered");

    let mut status_tick = (cli.status_interval_sec > 0).then(|| {
        let period = Duration::from_secs(cli.status_interval_sec);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    // 4. Run until Ctrl+C
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!("failed to listen for Ctrl+C: {e}");
                }
                info!("shutdown signal received");
                break;
            }

            event = events.recv() => {
                let Some(event) = event else {
                    warn!("subscription closed by manager");
                    break;
                };
                log_event(&event);
            }

            _ = async {
                match status_tick.as_mut() {
                    Some(tick) => { tick.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                let status = manager.status();
                info!(
                    "status: connected={} state={:?} attempts={} tickers={}",
                    status.is_connected,
                    status.state,
                    status.reconnect_attempts,
                    status.subscribed_tickers.len(),
                );
            }
        }
    }

    // 5. Tear down
    manager.disconnect();
    info!("stopped");
    Ok(())
}

fn log_event(event: &FeedEvent) {
    match event {
        FeedEvent::Price(p) => info!(
            ticker = %p.ticker,
            price = p.current_price,
            change = p.day_change,
            change_pct = p.day_change_percent,
            volume = %p.volume,
            ts = %p.timestamp,
            "price"
        ),
        FeedEvent::Connection(ConnectionStatus::Connected) => info!("feed connected"),
        FeedEvent::Connection(ConnectionStatus::Disconnected) => warn!("feed disconnected"),
        FeedEvent::SubscriptionAck { tickers } => info!("server confirmed {} ticker(s)", tickers.len()),
        FeedEvent::ServerError { message } => error!("server error: {message}"),
    }
}
