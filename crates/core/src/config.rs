use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::milestone::Crossing;
use crate::trend::TrendConfig;
use crate::types::{Side, TrendMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub bias: BiasConfig,
    #[serde(default)]
    pub long: OperationConfig,
    #[serde(default)]
    pub short: OperationConfig,
}

impl AppConfig {
    #[must_use]
    pub const fn operation(&self, side: Side) -> &OperationConfig {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            indicators: IndicatorConfig::default(),
            signal: SignalConfig::default(),
            bias: BiasConfig::default(),
            long: OperationConfig::default(),
            short: OperationConfig::default(),
        }
    }
}

/// What happens when the session reaches its maximum duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationAction {
    /// Both Operations revert to `NEUTRAL`.
    #[default]
    Neutral,
    /// Treated like a session breach.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub symbol: String,
    /// Session stop-loss on aggregate ROI, positive percentage.
    pub sl_roi_pct: Decimal,
    /// Session take-profit on aggregate ROI, percentage.
    pub tp_roi_pct: Decimal,
    pub max_duration_minutes: Option<i64>,
    pub duration_action: DurationAction,
    pub heartbeat_interval_secs: u64,
    pub exchange_timeout_ms: u64,
    pub tick_queue_capacity: usize,
    pub log_dir: PathBuf,
    pub journal_max_entries: usize,
    pub close_on_shutdown: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            sl_roi_pct: Decimal::from(20),
            tp_roi_pct: Decimal::TEN,
            max_duration_minutes: None,
            duration_action: DurationAction::Neutral,
            heartbeat_interval_secs: 15,
            exchange_timeout_ms: 5_000,
            tick_queue_capacity: 1_024,
            log_dir: PathBuf::from("logs"),
            journal_max_entries: 1_000,
            close_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Prices retained for the rolling windows.
    pub history_size: usize,
    pub ema_window: usize,
    pub weighted_inc_window: usize,
    pub weighted_dec_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            ema_window: 50,
            weighted_inc_window: 25,
            weighted_dec_window: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub price_change_buy_pct: Decimal,
    pub price_change_sell_pct: Decimal,
    pub weighted_decrement_threshold: Decimal,
    pub weighted_increment_threshold: Decimal,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            price_change_buy_pct: Decimal::new(-1, 1),
            price_change_sell_pct: Decimal::new(1, 1),
            weighted_decrement_threshold: Decimal::new(45, 2),
            weighted_increment_threshold: Decimal::new(45, 2),
        }
    }
}

/// High-timeframe ATR trailing-stop bias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
    pub enabled: bool,
    pub interval_secs: i64,
    pub atr_period: usize,
    pub key_value: Decimal,
    /// Close positions opposed to a new bias.
    pub close_on_flip: bool,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3_600,
            atr_period: 10,
            key_value: Decimal::ONE,
            close_on_flip: false,
        }
    }
}

/// Per-side strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    pub enabled: bool,
    pub initial_capital: Decimal,
    /// Margin committed per logical position.
    pub capital_per_position: Decimal,
    pub max_slots: usize,
    pub leverage: Decimal,
    /// Minimum percent move from the latest open entry before the next opening.
    pub averaging_distance_pct: Decimal,
    /// Aggregate ROI stop-loss magnitude; breached at `-roi_sl_pct`.
    pub roi_sl_pct: Option<Decimal>,
    pub roi_tp_pct: Option<Decimal>,
    pub commission_rate: Decimal,
    pub size_decimals: u32,
    /// Share of positive net PNL swept to the profit account, percent.
    pub profit_transfer_pct: Decimal,
    pub roi_trailing: Option<RoiTrailingConfig>,
    /// Trails the ROI stop-loss this many points below realized ROI,
    /// replacing `roi_sl_pct`.
    pub roi_sl_trail_pct: Option<Decimal>,
    pub exit_condition: Option<ExitCondition>,
    pub trend_end_action: TrendEndAction,
    pub trend: TrendConfig,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_capital: Decimal::from(5),
            capital_per_position: Decimal::ONE,
            max_slots: 5,
            leverage: Decimal::TEN,
            averaging_distance_pct: Decimal::new(5, 1),
            roi_sl_pct: None,
            roi_tp_pct: None,
            commission_rate: Decimal::new(1, 3),
            size_decimals: 3,
            profit_transfer_pct: Decimal::ZERO,
            roi_trailing: None,
            roi_sl_trail_pct: None,
            exit_condition: None,
            trend_end_action: TrendEndAction::Neutral,
            trend: TrendConfig::default().with_mode(TrendMode::Both),
        }
    }
}

/// Trailing stop on an operation's aggregate ROI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiTrailingConfig {
    /// ROI that arms the trail, percent.
    pub activation_pct: Decimal,
    /// Giveback from the peak ROI that closes the operation, in ROI points.
    pub distance_pct: Decimal,
}

/// Price level at which an operation closes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCondition {
    pub crossing: Crossing,
    pub price: Decimal,
}

impl ExitCondition {
    #[must_use]
    pub fn is_met(&self, price: Decimal) -> bool {
        match self.crossing {
            Crossing::Above => price >= self.price,
            Crossing::Below => price <= self.price,
        }
    }
}

/// What an operation does once its trend finalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendEndAction {
    /// Keep trading under a `NEUTRAL` trend.
    #[default]
    Neutral,
    /// `NEUTRAL`, and no new openings until resumed.
    Pause,
    /// Close every position and stop the side.
    Stop,
}
