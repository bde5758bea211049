use serde::{Deserialize, Serialize};
use trendline_core::{BiasConfig, Signal, SignalConfig};

use crate::indicators::IndicatorSnapshot;
use crate::ut_bot::{Bias, TrendBias};

/// Why a signal came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalReason {
    Initializing,
    BuyRule,
    SellRule,
    NoRule,
    /// A BUY or SELL disagreed with the trend bias.
    BiasSuppressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSignal {
    pub signal: Signal,
    pub reason: SignalReason,
    pub suppressed_by_bias: bool,
    pub bias: Option<Bias>,
    /// Set on the tick where the bias changed.
    pub bias_flip: Option<Bias>,
}

pub struct SignalEngine {
    config: SignalConfig,
    bias: Option<TrendBias>,
}

impl SignalEngine {
    #[must_use]
    pub fn new(config: SignalConfig, bias: &BiasConfig) -> Self {
        Self {
            config,
            bias: bias.enabled.then(|| TrendBias::new(bias.clone())),
        }
    }

    /// Swaps thresholds immediately; a changed bias config restarts the bias.
    pub fn apply_config(&mut self, config: SignalConfig, bias: &BiasConfig) {
        self.config = config;
        let unchanged = match &self.bias {
            Some(current) => bias.enabled && current.config() == bias,
            None => !bias.enabled,
        };
        if !unchanged {
            self.bias = bias.enabled.then(|| TrendBias::new(bias.clone()));
        }
    }

    #[must_use]
    pub fn bias(&self) -> Option<&TrendBias> {
        self.bias.as_ref()
    }

    pub fn generate(&mut self, snapshot: &IndicatorSnapshot) -> GeneratedSignal {
        let bias_flip = self
            .bias
            .as_mut()
            .and_then(|b| b.on_price(snapshot.price, snapshot.timestamp));
        let bias = self.bias.as_ref().and_then(TrendBias::current);

        let (signal, reason) = self.evaluate(snapshot);

        let allowed = match (&self.bias, signal) {
            (None, _) | (_, Signal::Hold) => true,
            (Some(_), Signal::Buy) => bias == Some(Bias::Bullish),
            (Some(_), Signal::Sell) => bias == Some(Bias::Bearish),
        };
        if !allowed {
            tracing::debug!(signal = %signal, bias = ?bias, "Signal suppressed by trend bias");
            return GeneratedSignal {
                signal: Signal::Hold,
                reason: SignalReason::BiasSuppressed,
                suppressed_by_bias: true,
                bias,
                bias_flip,
            };
        }

        GeneratedSignal {
            signal,
            reason,
            suppressed_by_bias: false,
            bias,
            bias_flip,
        }
    }

    fn evaluate(&self, snapshot: &IndicatorSnapshot) -> (Signal, SignalReason) {
        let (
            Some(ema),
            Some(weighted_inc),
            Some(weighted_dec),
            Some(inc_change),
            Some(dec_change),
        ) = (
            snapshot.ema,
            snapshot.weighted_increment,
            snapshot.weighted_decrement,
            snapshot.inc_price_change_pct,
            snapshot.dec_price_change_pct,
        )
        else {
            return (Signal::Hold, SignalReason::Initializing);
        };
        let price = snapshot.price;
        let c = &self.config;

        if dec_change <= c.price_change_buy_pct
            && weighted_dec >= c.weighted_decrement_threshold
            && price < ema
        {
            return (Signal::Buy, SignalReason::BuyRule);
        }
        if inc_change >= c.price_change_sell_pct
            && weighted_inc >= c.weighted_increment_threshold
            && price > ema
        {
            return (Signal::Sell, SignalReason::SellRule);
        }
        (Signal::Hold, SignalReason::NoRule)
    }
}
