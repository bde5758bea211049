use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use trendline_bot_orchestrator::spawn;
use trendline_core::{ConfigLoader, Journal, Tick};
use trendline_execution::PaperExchange;

#[derive(Debug, Deserialize)]
struct PriceRow {
    timestamp: DateTime<Utc>,
    price: String,
}

/// Reads `timestamp,price` rows (RFC 3339 timestamps, header required).
fn read_ticks<R: Read>(reader: R) -> anyhow::Result<Vec<Tick>> {
    let mut csv = csv::Reader::from_reader(reader);
    let mut ticks = Vec::new();
    for (line, row) in csv.deserialize::<PriceRow>().enumerate() {
        let row = row.with_context(|| format!("Failed to read price row {}", line + 1))?;
        let price = Decimal::from_str(row.price.trim())
            .with_context(|| format!("Invalid price on row {}: {}", line + 1, row.price))?;
        if price <= Decimal::ZERO {
            anyhow::bail!("Non-positive price on row {}: {price}", line + 1);
        }
        ticks.push(Tick::new(price, row.timestamp));
    }
    Ok(ticks)
}

/// Feeds the price file through a controller on the paper exchange and
/// prints the final status and shutdown report.
pub async fn run_replay(config_path: &Path, prices_path: &Path) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    let file = std::fs::File::open(prices_path)
        .with_context(|| format!("Failed to open price file: {}", prices_path.display()))?;
    let ticks = read_ticks(file)?;
    let Some(first) = ticks.first() else {
        anyhow::bail!("Price file {} has no rows", prices_path.display());
    };

    tracing::info!(
        prices = %prices_path.display(),
        ticks = ticks.len(),
        symbol = %config.session.symbol,
        "Replaying price file"
    );

    let paper = Arc::new(PaperExchange::new());
    paper.set_price(first.price);
    let (journal, _journal_task) = Journal::spawn(
        config.session.log_dir.clone(),
        config.session.journal_max_entries,
    );
    let (handle, controller_task) = spawn(config, paper.clone(), journal, None)?;

    for tick in &ticks {
        // fills happen at the tick price
        let status = handle.settle().await?;
        if !status.session_running {
            tracing::info!(stop_reason = ?status.stop_reason, "Session stopped, ending replay early");
            break;
        }
        paper.set_price(tick.price);
        handle.submit_tick(*tick).await?;
    }

    let status = handle.settle().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let report = handle.shutdown().await?;
    super::print_report(&report);
    let _ = controller_task.await;
    Ok(())
}
