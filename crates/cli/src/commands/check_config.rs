use anyhow::Context;
use std::path::Path;
use trendline_core::ConfigLoader;

/// Loads and validates `path`, printing the effective configuration.
pub fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(path)
        .with_context(|| format!("Invalid config: {}", path.display()))?;

    tracing::info!(path = %path.display(), symbol = %config.session.symbol, "Config is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
