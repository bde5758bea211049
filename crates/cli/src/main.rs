use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "trendline")]
#[command(about = "Dual-side trend trading controller for perpetual futures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller against the paper exchange, polling its ticker
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml", env = "TRENDLINE_CONFIG")]
        config: PathBuf,
        /// Ticker poll interval in milliseconds
        #[arg(long, default_value_t = 1_000)]
        poll_ms: u64,
        /// Paper market price at startup
        #[arg(long, default_value = "100")]
        start_price: String,
    },
    /// Feed a timestamp,price CSV through the controller
    Replay {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml", env = "TRENDLINE_CONFIG")]
        config: PathBuf,
        /// Price CSV file
        #[arg(short, long)]
        prices: PathBuf,
    },
    /// Validate a config file and print the effective configuration
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml", env = "TRENDLINE_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            poll_ms,
            start_price,
        } => {
            commands::run_live(&config, poll_ms, &start_price).await?;
        }
        Commands::Replay { config, prices } => {
            commands::run_replay(&config, &prices).await?;
        }
        Commands::CheckConfig { config } => {
            commands::check_config(&config)?;
        }
    }

    Ok(())
}
