//! Higher-timeframe trend bias from an ATR trailing stop (UT Bot).
//!
//! Ticks are aggregated into OHLC bars of `interval_secs`. On every closed bar
//! the Wilder ATR and the trailing stop are advanced; the bias changes only
//! when the close crosses the stop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trendline_core::BiasConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bar {
    start: DateTime<Utc>,
    high: Decimal,
    low: Decimal,
    close: Decimal,
}

impl Bar {
    const fn open(price: Decimal, start: DateTime<Utc>) -> Self {
        Self {
            start,
            high: price,
            low: price,
            close: price,
        }
    }

    fn update(&mut self, price: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

pub struct TrendBias {
    config: BiasConfig,
    bar: Option<Bar>,
    prev_close: Option<Decimal>,
    seed_ranges: Vec<Decimal>,
    atr: Option<Decimal>,
    stop: Option<Decimal>,
    bias: Option<Bias>,
    bars_closed: usize,
}

impl TrendBias {
    #[must_use]
    pub const fn new(config: BiasConfig) -> Self {
        Self {
            config,
            bar: None,
            prev_close: None,
            seed_ranges: Vec::new(),
            atr: None,
            stop: None,
            bias: None,
            bars_closed: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &BiasConfig {
        &self.config
    }

    #[must_use]
    pub const fn current(&self) -> Option<Bias> {
        self.bias
    }

    #[must_use]
    pub const fn trailing_stop(&self) -> Option<Decimal> {
        self.stop
    }

    #[must_use]
    pub const fn atr(&self) -> Option<Decimal> {
        self.atr
    }

    /// Feeds one tick. Returns the new bias when a closed bar flipped it.
    pub fn on_price(&mut self, price: Decimal, timestamp: DateTime<Utc>) -> Option<Bias> {
        let interval = self.config.interval_secs.max(1);
        match self.bar.as_mut() {
            None => {
                self.bar = Some(Bar::open(price, timestamp));
                None
            }
            Some(bar) if (timestamp - bar.start).num_seconds() < interval => {
                bar.update(price);
                None
            }
            Some(bar) => {
                let closed = *bar;
                self.bar = Some(Bar::open(price, timestamp));
                self.close_bar(closed)
            }
        }
    }

    fn close_bar(&mut self, bar: Bar) -> Option<Bias> {
        self.bars_closed += 1;
        let Some(prev_close) = self.prev_close.replace(bar.close) else {
            return None;
        };

        let true_range = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        let period = Decimal::from(self.config.atr_period.max(1));
        let atr = match self.atr {
            Some(atr) => (atr * (period - Decimal::ONE) + true_range) / period,
            None => {
                self.seed_ranges.push(true_range);
                if self.seed_ranges.len() < self.config.atr_period.max(1) {
                    return None;
                }
                let sum: Decimal = self.seed_ranges.iter().sum();
                sum / period
            }
        };
        self.atr = Some(atr);

        let loss = self.config.key_value * atr;
        let close = bar.close;
        let Some(prev_stop) = self.stop else {
            self.stop = Some(close - loss);
            return None;
        };
        let stop = if close > prev_stop && prev_close > prev_stop {
            prev_stop.max(close - loss)
        } else if close < prev_stop && prev_close < prev_stop {
            prev_stop.min(close + loss)
        } else if close > prev_stop {
            close - loss
        } else {
            close + loss
        };
        self.stop = Some(stop);

        let next = if prev_close < prev_stop && close > stop {
            Some(Bias::Bullish)
        } else if prev_close > prev_stop && close < stop {
            Some(Bias::Bearish)
        } else {
            None
        };
        match next {
            Some(bias) if self.bias != Some(bias) => {
                tracing::info!(
                    bias = ?bias,
                    close = %close,
                    stop = %stop,
                    atr = %atr,
                    bars = self.bars_closed,
                    "Trend bias changed"
                );
                self.bias = Some(bias);
                Some(bias)
            }
            _ => None,
        }
    }
}
