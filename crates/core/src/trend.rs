use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::milestone::MilestoneId;
use crate::types::TrendMode;

/// Risk parameters and finalization bounds of a Trend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub mode: TrendMode,
    /// Individual stop-loss distance from entry, percent.
    pub stop_loss_pct: Decimal,
    /// Favorable move from entry that arms the trailing stop, percent.
    pub trailing_activation_pct: Decimal,
    /// Retracement from the high-water price that fires the trailing stop, percent.
    pub trailing_distance_pct: Decimal,
    pub limits: TrendLimits,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            mode: TrendMode::Neutral,
            stop_loss_pct: Decimal::TEN,
            trailing_activation_pct: Decimal::new(4, 1),
            trailing_distance_pct: Decimal::new(1, 1),
            limits: TrendLimits::default(),
        }
    }
}

impl TrendConfig {
    /// Same risk parameters under a different mode.
    #[must_use]
    pub fn with_mode(&self, mode: TrendMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

/// Finalization bounds; `None` disables a bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendLimits {
    pub max_trades: Option<u32>,
    pub max_duration_minutes: Option<i64>,
    pub tp_roi_pct: Option<Decimal>,
    /// Negative percentage, e.g. `-1.5`.
    pub sl_roi_pct: Option<Decimal>,
}

impl Default for TrendLimits {
    fn default() -> Self {
        Self {
            max_trades: None,
            max_duration_minutes: None,
            tp_roi_pct: Some(Decimal::new(25, 1)),
            sl_roi_pct: Some(Decimal::new(-15, 1)),
        }
    }
}

/// The Trend currently governing an Operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trend {
    pub config: TrendConfig,
    pub started_at: DateTime<Utc>,
    pub source: Option<MilestoneId>,
    pub trades_closed: u32,
    /// Operation realized PNL when the trend started.
    pub realized_pnl_at_start: Decimal,
}

impl Trend {
    #[must_use]
    pub const fn start(
        config: TrendConfig,
        started_at: DateTime<Utc>,
        source: Option<MilestoneId>,
        realized_pnl_at_start: Decimal,
    ) -> Self {
        Self {
            config,
            started_at,
            source,
            trades_closed: 0,
            realized_pnl_at_start,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> TrendMode {
        self.config.mode
    }

    /// First finalization bound the trend has reached, if any.
    #[must_use]
    pub fn finalization(&self, now: DateTime<Utc>, roi_pct: Decimal) -> Option<TrendEnd> {
        let limits = &self.config.limits;
        if let Some(max) = limits.max_trades {
            if self.trades_closed >= max {
                return Some(TrendEnd::TradeLimit(self.trades_closed));
            }
        }
        if let Some(max) = limits.max_duration_minutes {
            let elapsed = (now - self.started_at).num_minutes();
            if elapsed >= max {
                return Some(TrendEnd::Duration(elapsed));
            }
        }
        if let Some(tp) = limits.tp_roi_pct {
            if roi_pct >= tp {
                return Some(TrendEnd::TakeProfit(roi_pct));
            }
        }
        if let Some(sl) = limits.sl_roi_pct {
            if roi_pct <= sl {
                return Some(TrendEnd::StopLoss(roi_pct));
            }
        }
        None
    }
}

/// Why a trend was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendEnd {
    TradeLimit(u32),
    Duration(i64),
    TakeProfit(Decimal),
    StopLoss(Decimal),
}

impl fmt::Display for TrendEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TradeLimit(n) => write!(f, "trade limit reached ({n} trades)"),
            Self::Duration(m) => write!(f, "duration limit reached ({m} min)"),
            Self::TakeProfit(roi) => write!(f, "trend take-profit at {roi:.2}% ROI"),
            Self::StopLoss(roi) => write!(f, "trend stop-loss at {roi:.2}% ROI"),
        }
    }
}
