use crate::error::ExchangeError;
use crate::events::{AccountPurpose, OrderResult, StandardOrder, StandardPosition};
use crate::types::Side;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Capability set every exchange integration provides.
///
/// Implementations own their retry/backoff policy for transport errors; the
/// engines treat every returned error as failed-this-cycle.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    fn name(&self) -> &str;

    async fn place_order(&self, order: &StandardOrder) -> Result<OrderResult, ExchangeError>;

    async fn get_positions(
        &self,
        symbol: &str,
        side: Side,
    ) -> Result<Vec<StandardPosition>, ExchangeError>;

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn transfer(
        &self,
        from: AccountPurpose,
        to: AccountPurpose,
        amount: Decimal,
    ) -> Result<(), ExchangeError>;

    async fn set_leverage(
        &self,
        _symbol: &str,
        _side: Side,
        _leverage: Decimal,
    ) -> Result<(), ExchangeError> {
        Ok(())
    }
}
