//! Range checks applied before a configuration is accepted.
//!
//! A config that fails here never reaches the engines; the previously applied
//! config stays in effect.

use rust_decimal::Decimal;

use crate::config::{AppConfig, BiasConfig, IndicatorConfig, OperationConfig, SessionConfig, SignalConfig};
use crate::error::ConfigError;
use crate::trend::TrendConfig;
use crate::types::Side;

const MAX_LEVERAGE: u32 = 125;
const MAX_SLOTS: usize = 50;

impl AppConfig {
    /// Validates every section.
    ///
    /// # Errors
    /// Returns the first `ConfigError::Invalid` encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_session(&self.session)?;
        validate_indicators(&self.indicators)?;
        validate_signal(&self.signal)?;
        validate_bias(&self.bias)?;
        self.long.validate(Side::Long)?;
        self.short.validate(Side::Short)?;
        Ok(())
    }
}

impl OperationConfig {
    /// Validates one side's operation config.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self, side: Side) -> Result<(), ConfigError> {
        let field = |name: &str| format!("{side}.{name}");

        if self.leverage < Decimal::ONE || self.leverage > Decimal::from(MAX_LEVERAGE) {
            return Err(ConfigError::invalid(
                field("leverage"),
                format!("must be between 1 and {MAX_LEVERAGE}"),
            ));
        }
        if self.max_slots == 0 || self.max_slots > MAX_SLOTS {
            return Err(ConfigError::invalid(
                field("max_slots"),
                format!("must be between 1 and {MAX_SLOTS}"),
            ));
        }
        positive(&field("initial_capital"), self.initial_capital)?;
        positive(&field("capital_per_position"), self.capital_per_position)?;
        non_negative(&field("averaging_distance_pct"), self.averaging_distance_pct)?;
        if let Some(sl) = self.roi_sl_pct {
            positive(&field("roi_sl_pct"), sl)?;
        }
        if let Some(tp) = self.roi_tp_pct {
            positive(&field("roi_tp_pct"), tp)?;
        }
        if let Some(trailing) = &self.roi_trailing {
            positive(&field("roi_trailing.activation_pct"), trailing.activation_pct)?;
            positive(&field("roi_trailing.distance_pct"), trailing.distance_pct)?;
        }
        if let Some(trail) = self.roi_sl_trail_pct {
            positive(&field("roi_sl_trail_pct"), trail)?;
        }
        if let Some(exit) = &self.exit_condition {
            positive(&field("exit_condition.price"), exit.price)?;
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(ConfigError::invalid(field("commission_rate"), "must be in [0, 1)"));
        }
        if self.size_decimals > 12 {
            return Err(ConfigError::invalid(field("size_decimals"), "must be at most 12"));
        }
        if self.profit_transfer_pct < Decimal::ZERO || self.profit_transfer_pct > Decimal::ONE_HUNDRED {
            return Err(ConfigError::invalid(
                field("profit_transfer_pct"),
                "must be in [0, 100]",
            ));
        }
        validate_trend(&field("trend"), &self.trend)
    }
}

/// Validates a trend's risk parameters.
///
/// # Errors
/// Returns `ConfigError::Invalid` naming the offending field under `prefix`.
pub fn validate_trend(prefix: &str, trend: &TrendConfig) -> Result<(), ConfigError> {
    let field = |name: &str| format!("{prefix}.{name}");
    if trend.stop_loss_pct <= Decimal::ZERO || trend.stop_loss_pct >= Decimal::ONE_HUNDRED {
        return Err(ConfigError::invalid(field("stop_loss_pct"), "must be in (0, 100)"));
    }
    non_negative(&field("trailing_activation_pct"), trend.trailing_activation_pct)?;
    positive(&field("trailing_distance_pct"), trend.trailing_distance_pct)?;
    if let Some(tp) = trend.limits.tp_roi_pct {
        positive(&field("limits.tp_roi_pct"), tp)?;
    }
    if let Some(sl) = trend.limits.sl_roi_pct {
        if sl >= Decimal::ZERO {
            return Err(ConfigError::invalid(field("limits.sl_roi_pct"), "must be negative"));
        }
    }
    if let Some(minutes) = trend.limits.max_duration_minutes {
        if minutes <= 0 {
            return Err(ConfigError::invalid(
                field("limits.max_duration_minutes"),
                "must be positive",
            ));
        }
    }
    if trend.limits.max_trades == Some(0) {
        return Err(ConfigError::invalid(field("limits.max_trades"), "must be positive"));
    }
    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.symbol.trim().is_empty() {
        return Err(ConfigError::invalid("session.symbol", "must not be empty"));
    }
    positive("session.sl_roi_pct", session.sl_roi_pct)?;
    positive("session.tp_roi_pct", session.tp_roi_pct)?;
    if session.heartbeat_interval_secs == 0 {
        return Err(ConfigError::invalid("session.heartbeat_interval_secs", "must be positive"));
    }
    if session.exchange_timeout_ms == 0 {
        return Err(ConfigError::invalid("session.exchange_timeout_ms", "must be positive"));
    }
    if session.tick_queue_capacity == 0 {
        return Err(ConfigError::invalid("session.tick_queue_capacity", "must be positive"));
    }
    if session.journal_max_entries == 0 {
        return Err(ConfigError::invalid("session.journal_max_entries", "must be positive"));
    }
    if matches!(session.max_duration_minutes, Some(m) if m <= 0) {
        return Err(ConfigError::invalid("session.max_duration_minutes", "must be positive"));
    }
    Ok(())
}

fn validate_indicators(ind: &IndicatorConfig) -> Result<(), ConfigError> {
    for (name, window) in [
        ("indicators.ema_window", ind.ema_window),
        ("indicators.weighted_inc_window", ind.weighted_inc_window),
        ("indicators.weighted_dec_window", ind.weighted_dec_window),
    ] {
        if window < 2 || window > ind.history_size {
            return Err(ConfigError::invalid(
                name,
                format!("must be between 2 and history_size ({})", ind.history_size),
            ));
        }
    }
    Ok(())
}

fn validate_signal(signal: &SignalConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("signal.weighted_decrement_threshold", signal.weighted_decrement_threshold),
        ("signal.weighted_increment_threshold", signal.weighted_increment_threshold),
    ] {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(ConfigError::invalid(name, "must be in [0, 1]"));
        }
    }
    Ok(())
}

fn validate_bias(bias: &BiasConfig) -> Result<(), ConfigError> {
    if !bias.enabled {
        return Ok(());
    }
    if bias.interval_secs <= 0 {
        return Err(ConfigError::invalid("bias.interval_secs", "must be positive"));
    }
    if bias.atr_period == 0 {
        return Err(ConfigError::invalid("bias.atr_period", "must be positive"));
    }
    positive("bias.key_value", bias.key_value)
}

fn positive(field: &str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO {
        return Err(ConfigError::invalid(field, "must be positive"));
    }
    Ok(())
}

fn non_negative(field: &str, value: Decimal) -> Result<(), ConfigError> {
    if value < Decimal::ZERO {
        return Err(ConfigError::invalid(field, "must not be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoiTrailingConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_leverage() {
        let mut config = AppConfig::default();
        config.short.leverage = dec!(200);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("short.leverage"));
    }

    #[test]
    fn rejects_window_larger_than_history() {
        let mut config = AppConfig::default();
        config.indicators.ema_window = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_positive_trend_stop_loss_roi() {
        let mut config = AppConfig::default();
        config.long.trend.limits.sl_roi_pct = Some(dec!(1.5));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("long.trend.limits.sl_roi_pct"));
    }

    #[test]
    fn rejects_non_positive_operation_exits() {
        let mut config = AppConfig::default();
        config.long.roi_trailing = Some(RoiTrailingConfig {
            activation_pct: dec!(5),
            distance_pct: dec!(0),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("long.roi_trailing.distance_pct"));

        let mut config = AppConfig::default();
        config.short.roi_sl_trail_pct = Some(dec!(-1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_bias_is_not_checked() {
        let mut config = AppConfig::default();
        config.bias.atr_period = 0;
        assert!(config.validate().is_ok());
        config.bias.enabled = true;
        assert!(config.validate().is_err());
    }
}
