use anyhow::Context;
use chrono::Utc;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use trendline_bot_orchestrator::spawn;
use trendline_core::{ConfigLoader, ConfigWatcher, ExchangePort, Journal, Tick, TradingEvent};
use trendline_execution::PaperExchange;

/// Runs the controller on the paper exchange until Ctrl-C or a session stop.
///
/// Each stdin line holding a decimal moves the paper market price; the
/// ticker is polled every `poll_ms` and fed to the controller.
pub async fn run_live(config_path: &Path, poll_ms: u64, start_price: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    let start_price = Decimal::from_str(start_price)
        .with_context(|| format!("Invalid start price: {start_price}"))?;

    tracing::info!(
        config = %config_path.display(),
        symbol = %config.session.symbol,
        poll_ms,
        "Starting controller on paper exchange"
    );

    let paper = Arc::new(PaperExchange::new());
    paper.set_price(start_price);

    let (journal, _journal_task) = Journal::spawn(
        config.session.log_dir.clone(),
        config.session.journal_max_entries,
    );

    let (watcher, config_rx) = ConfigWatcher::new(config.clone());
    let watch_path = config_path.to_path_buf();
    let watcher_task = tokio::spawn(async move {
        if let Err(e) = watcher.watch(watch_path).await {
            tracing::error!(error = %e, "Config watcher stopped");
        }
    });

    let symbol = config.session.symbol.clone();
    let (handle, controller_task) = spawn(config, paper.clone(), journal, Some(config_rx))?;

    let events = handle.subscribe();
    let event_task = tokio::spawn(log_events(events));
    let feed_task = tokio::spawn(feed_prices(paper.clone()));

    let mut poll = tokio::time::interval(Duration::from_millis(poll_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                break;
            }
            _ = poll.tick() => {
                let price = match paper.get_ticker(&symbol).await {
                    Ok(price) => price,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ticker poll failed");
                        continue;
                    }
                };
                handle.submit_tick(Tick::new(price, Utc::now())).await?;
                if !handle.watch_status().borrow().session_running {
                    tracing::warn!("Session stopped, shutting down");
                    break;
                }
            }
        }
    }

    let report = handle.shutdown().await?;
    super::print_report(&report);

    feed_task.abort();
    event_task.abort();
    watcher_task.abort();
    let _ = controller_task.await;

    tracing::info!("Controller stopped");
    Ok(())
}

async fn feed_prices(paper: Arc<PaperExchange>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Decimal::from_str(line) {
                    Ok(price) if price > Decimal::ZERO => {
                        tracing::info!(price = %price, "Paper price set");
                        paper.set_price(price);
                    }
                    _ => tracing::warn!(input = line, "Ignoring invalid price"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<TradingEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(event = %json, "Controller event"),
                Err(_) => tracing::info!(event = ?event, "Controller event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
