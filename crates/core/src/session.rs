use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{DurationAction, SessionConfig};
use crate::types::CloseReason;

/// Run context owning the global ROI breakers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub started_at: DateTime<Utc>,
    pub running: bool,
    pub sl_roi_pct: Decimal,
    pub tp_roi_pct: Decimal,
    pub max_duration_minutes: Option<i64>,
    pub duration_action: DurationAction,
    /// Realized PNL summed over both operations at the last check.
    pub realized_pnl: Decimal,
    pub last_roi_pct: Decimal,
    pub stop_reason: Option<CloseReason>,
    pub duration_elapsed: bool,
}

impl Session {
    #[must_use]
    pub fn new(config: &SessionConfig, now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            running: true,
            sl_roi_pct: config.sl_roi_pct,
            tp_roi_pct: config.tp_roi_pct,
            max_duration_minutes: config.max_duration_minutes,
            duration_action: config.duration_action,
            realized_pnl: Decimal::ZERO,
            last_roi_pct: Decimal::ZERO,
            stop_reason: None,
            duration_elapsed: false,
        }
    }

    /// Takes over new thresholds from a reloaded config.
    pub fn apply_config(&mut self, config: &SessionConfig) {
        self.sl_roi_pct = config.sl_roi_pct;
        self.tp_roi_pct = config.tp_roi_pct;
        self.max_duration_minutes = config.max_duration_minutes;
        self.duration_action = config.duration_action;
    }

    /// Which breaker, if any, `roi_pct` trips.
    #[must_use]
    pub fn breach(&self, roi_pct: Decimal) -> Option<CloseReason> {
        if roi_pct >= self.tp_roi_pct {
            Some(CloseReason::SessionTpRoi)
        } else if roi_pct <= -self.sl_roi_pct.abs() {
            Some(CloseReason::SessionSlRoi)
        } else {
            None
        }
    }

    #[must_use]
    pub fn duration_reached(&self, now: DateTime<Utc>) -> bool {
        self.max_duration_minutes
            .is_some_and(|max| (now - self.started_at).num_minutes() >= max)
    }
}
