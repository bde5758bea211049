//! Time-bounded exchange calls.
//!
//! A call that does not finish within the bound is reported as
//! [`ExchangeError::Timeout`] and is not retried here.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use trendline_core::{
    AccountPurpose, ExchangeError, ExchangePort, OrderResult, Side, StandardOrder,
    StandardPosition,
};

#[derive(Clone)]
pub struct TimedExchange {
    inner: Arc<dyn ExchangePort>,
    timeout: Duration,
}

impl TimedExchange {
    #[must_use]
    pub fn new(inner: Arc<dyn ExchangePort>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, call: &str, fut: F) -> Result<T, ExchangeError>
    where
        T: Send,
        F: Future<Output = Result<T, ExchangeError>> + Send,
    {
        if let Ok(result) = tokio::time::timeout(self.timeout, fut).await {
            result
        } else {
            let millis = self.timeout.as_millis();
            tracing::warn!(
                exchange = self.inner.name(),
                call,
                timeout_ms = millis,
                "Exchange call timed out"
            );
            Err(ExchangeError::Timeout(format!("{call} exceeded {millis} ms")))
        }
    }
}

#[async_trait]
impl ExchangePort for TimedExchange {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn place_order(&self, order: &StandardOrder) -> Result<OrderResult, ExchangeError> {
        self.bounded("place_order", self.inner.place_order(order)).await
    }

    async fn get_positions(
        &self,
        symbol: &str,
        side: Side,
    ) -> Result<Vec<StandardPosition>, ExchangeError> {
        self.bounded("get_positions", self.inner.get_positions(symbol, side))
            .await
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.bounded("get_ticker", self.inner.get_ticker(symbol)).await
    }

    async fn transfer(
        &self,
        from: AccountPurpose,
        to: AccountPurpose,
        amount: Decimal,
    ) -> Result<(), ExchangeError> {
        self.bounded("transfer", self.inner.transfer(from, to, amount))
            .await
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        side: Side,
        leverage: Decimal,
    ) -> Result<(), ExchangeError> {
        self.bounded("set_leverage", self.inner.set_leverage(symbol, side, leverage))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{PaperExchange, PaperExchangeConfig};
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn slow_call_becomes_timeout() {
        let paper = PaperExchange::with_config(PaperExchangeConfig {
            latency_ms: 10_000,
        });
        paper.set_price(dec!(100));
        let exchange = TimedExchange::new(Arc::new(paper), Duration::from_millis(50));

        let order = StandardOrder::market_entry("BTCUSDT", Side::Long, dec!(1));
        let err = exchange.place_order(&order).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout(_)));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let paper = PaperExchange::new();
        paper.set_price(dec!(100));
        let exchange = TimedExchange::new(Arc::new(paper), Duration::from_secs(1));
        assert_eq!(exchange.get_ticker("BTCUSDT").await.unwrap(), dec!(100));
    }
}
