use crate::config::AppConfig;
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";
const ENV_PREFIX: &str = "TRENDLINE_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the default path merged with environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load() -> Result<AppConfig, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from `path` (TOML, or JSON for a `.json` extension),
    /// then applies `TRENDLINE_`-prefixed environment overrides such as
    /// `TRENDLINE_LONG__LEVERAGE=5`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        let path = path.as_ref();
        let figment = if path.extension().is_some_and(|ext| ext == "json") {
            Figment::new().merge(Json::file(path))
        } else {
            Figment::new().merge(Toml::file(path))
        };
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or fails validation.
    pub fn from_toml_str(text: &str) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = Figment::new().merge(Toml::string(text)).extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = ConfigLoader::from_toml_str(
            r#"
            [session]
            symbol = "ETHUSDT"

            [long]
            max_slots = 2
            averaging_distance_pct = 1.0
            "#,
        )
        .unwrap();

        assert_eq!(config.session.symbol, "ETHUSDT");
        assert_eq!(config.long.max_slots, 2);
        assert_eq!(config.long.averaging_distance_pct, dec!(1.0));
        assert_eq!(config.short.max_slots, 5);
        assert_eq!(config.indicators.ema_window, 50);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let result = ConfigLoader::from_toml_str(
            r#"
            [long]
            leverage = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn operation_exits_parse_from_toml() {
        let config = ConfigLoader::from_toml_str(
            r#"
            [short]
            trend_end_action = "pause"
            roi_sl_trail_pct = "1.5"
            exit_condition = { crossing = "ABOVE", price = "70000" }
            roi_trailing = { activation_pct = "5", distance_pct = "2" }
            "#,
        )
        .unwrap();

        let short = &config.short;
        assert_eq!(short.trend_end_action, crate::config::TrendEndAction::Pause);
        assert_eq!(short.roi_sl_trail_pct, Some(dec!(1.5)));
        let exit = short.exit_condition.unwrap();
        assert_eq!(exit.crossing, crate::milestone::Crossing::Above);
        assert_eq!(exit.price, dec!(70000));
        assert_eq!(short.roi_trailing.unwrap().distance_pct, dec!(2));
        assert_eq!(config.long.trend_end_action, crate::config::TrendEndAction::Neutral);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[short]\nleverage = 3").unwrap();
        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.short.leverage, dec!(3));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/Config.toml");
        let config = ConfigLoader::load_from(path).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
