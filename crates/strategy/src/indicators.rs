//! Rolling price indicators.
//!
//! Everything is computed in `Decimal` so a replayed price series yields the
//! exact same snapshots as the live run.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use trendline_core::IndicatorConfig;

/// Indicator values after one tick. `None` means the window is still warming up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub ema: Option<Decimal>,
    pub weighted_increment: Option<Decimal>,
    pub weighted_decrement: Option<Decimal>,
    pub inc_price_change_pct: Option<Decimal>,
    pub dec_price_change_pct: Option<Decimal>,
}

impl IndicatorSnapshot {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ema.is_some()
            && self.weighted_increment.is_some()
            && self.weighted_decrement.is_some()
            && self.inc_price_change_pct.is_some()
            && self.dec_price_change_pct.is_some()
    }

    /// JSON form for the signals journal.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub struct IndicatorEngine {
    config: IndicatorConfig,
    alpha: Decimal,
    prices: VecDeque<Decimal>,
    inc_flags: VecDeque<Decimal>,
    dec_flags: VecDeque<Decimal>,
    ema: Option<Decimal>,
    samples: usize,
}

impl IndicatorEngine {
    #[must_use]
    pub fn new(config: IndicatorConfig) -> Self {
        let alpha = Decimal::TWO / Decimal::from(config.ema_window + 1);
        Self {
            config,
            alpha,
            prices: VecDeque::new(),
            inc_flags: VecDeque::new(),
            dec_flags: VecDeque::new(),
            ema: None,
            samples: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Number of prices seen since construction.
    #[must_use]
    pub const fn samples(&self) -> usize {
        self.samples
    }

    pub fn ingest(&mut self, price: Decimal, timestamp: DateTime<Utc>) -> IndicatorSnapshot {
        let history = self.config.history_size.max(1);

        if let Some(&previous) = self.prices.back() {
            push_capped(&mut self.inc_flags, flag(price > previous), history);
            push_capped(&mut self.dec_flags, flag(price < previous), history);
        }
        push_capped(&mut self.prices, price, history);

        self.ema = Some(match self.ema {
            Some(ema) => self.alpha * price + (Decimal::ONE - self.alpha) * ema,
            None => price,
        });
        self.samples += 1;

        IndicatorSnapshot {
            timestamp,
            price,
            ema: self.ema.filter(|_| self.samples >= self.config.ema_window),
            weighted_increment: weighted_mean(&self.inc_flags, self.config.weighted_inc_window),
            weighted_decrement: weighted_mean(&self.dec_flags, self.config.weighted_dec_window),
            inc_price_change_pct: price_change_pct(&self.prices, self.config.weighted_inc_window),
            dec_price_change_pct: price_change_pct(&self.prices, self.config.weighted_dec_window),
        }
    }
}

const fn flag(set: bool) -> Decimal {
    if set {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

fn push_capped(buffer: &mut VecDeque<Decimal>, value: Decimal, cap: usize) {
    buffer.push_back(value);
    while buffer.len() > cap {
        buffer.pop_front();
    }
}

/// Linearly weighted mean of the newest `window` values, newest weighted `window`.
fn weighted_mean(values: &VecDeque<Decimal>, window: usize) -> Option<Decimal> {
    if window == 0 || values.len() < window {
        return None;
    }
    let start = values.len() - window;
    let mut weighted = Decimal::ZERO;
    for (i, value) in values.iter().skip(start).enumerate() {
        weighted += *value * Decimal::from(i + 1);
    }
    let total_weight = Decimal::from(window * (window + 1) / 2);
    Some(weighted / total_weight)
}

/// Percent change from the oldest to the newest of the last `window` prices.
fn price_change_pct(prices: &VecDeque<Decimal>, window: usize) -> Option<Decimal> {
    if window < 2 || prices.len() < window {
        return None;
    }
    let oldest = prices[prices.len() - window];
    let newest = *prices.back()?;
    if oldest.is_zero() {
        return None;
    }
    Some((newest - oldest) / oldest * Decimal::ONE_HUNDRED)
}
