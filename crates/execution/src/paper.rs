//! In-memory exchange for paper trading, replays and tests.
//!
//! Orders fill immediately at the last price set with [`PaperExchange::set_price`].
//! Positions are aggregated per symbol and side the way a hedge-mode
//! perpetuals account reports them.

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use trendline_core::{
    AccountPurpose, ExchangeError, ExchangePort, OrderResult, Side, StandardOrder,
    StandardPosition,
};

#[derive(Debug, Clone, Default)]
pub struct PaperExchangeConfig {
    /// Simulated round-trip latency per call.
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PaperPosition {
    size: Decimal,
    avg_entry: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    price: Option<Decimal>,
    positions: HashMap<(String, Side), PaperPosition>,
    leverage: HashMap<(String, Side), Decimal>,
    balances: HashMap<AccountPurpose, Decimal>,
    orders: Vec<StandardOrder>,
    transfers: Vec<(AccountPurpose, AccountPurpose, Decimal)>,
    failures: VecDeque<ExchangeError>,
    next_order_id: u64,
}

#[derive(Debug, Default)]
pub struct PaperExchange {
    config: PaperExchangeConfig,
    state: RwLock<PaperState>,
}

impl PaperExchange {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: PaperExchangeConfig) -> Self {
        Self {
            config,
            state: RwLock::new(PaperState::default()),
        }
    }

    pub fn set_price(&self, price: Decimal) {
        self.state.write().price = Some(price);
    }

    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        self.state.read().price
    }

    pub fn fund(&self, account: AccountPurpose, amount: Decimal) {
        *self.state.write().balances.entry(account).or_default() += amount;
    }

    #[must_use]
    pub fn balance(&self, account: AccountPurpose) -> Decimal {
        self.state
            .read()
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    /// Wipes the side's position, as a liquidation or a manual close would.
    pub fn liquidate(&self, symbol: &str, side: Side) {
        self.state
            .write()
            .positions
            .remove(&(symbol.to_string(), side));
    }

    /// Overrides the reported size, keeping the average entry.
    pub fn set_position_size(&self, symbol: &str, side: Side, size: Decimal) {
        let mut state = self.state.write();
        let price = state.price.unwrap_or_default();
        let entry = state
            .positions
            .entry((symbol.to_string(), side))
            .or_insert(PaperPosition {
                size: Decimal::ZERO,
                avg_entry: price,
            });
        entry.size = size;
    }

    #[must_use]
    pub fn position_size(&self, symbol: &str, side: Side) -> Decimal {
        self.state
            .read()
            .positions
            .get(&(symbol.to_string(), side))
            .map_or(Decimal::ZERO, |p| p.size)
    }

    /// The next call fails with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: ExchangeError) {
        self.state.write().failures.push_back(error);
    }

    #[must_use]
    pub fn orders(&self) -> Vec<StandardOrder> {
        self.state.read().orders.clone()
    }

    #[must_use]
    pub fn transfers(&self) -> Vec<(AccountPurpose, AccountPurpose, Decimal)> {
        self.state.read().transfers.clone()
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn take_failure(&self) -> Result<(), ExchangeError> {
        self.state.write().failures.pop_front().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ExchangePort for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn place_order(&self, order: &StandardOrder) -> Result<OrderResult, ExchangeError> {
        self.simulate_latency().await;
        self.take_failure()?;

        let mut state = self.state.write();
        let Some(price) = order.price.or(state.price) else {
            return Ok(OrderResult::Rejected {
                reason: "no market price".to_string(),
            });
        };
        if order.quantity <= Decimal::ZERO {
            return Ok(OrderResult::Rejected {
                reason: format!("invalid quantity {}", order.quantity),
            });
        }

        let key = (order.symbol.clone(), order.position_side);
        let filled = if order.reduce_only {
            let Some(position) = state.positions.get_mut(&key).filter(|p| !p.size.is_zero())
            else {
                return Err(ExchangeError::PositionNotFound(format!(
                    "{} {}",
                    order.symbol, order.position_side
                )));
            };
            let filled = order.quantity.min(position.size);
            position.size -= filled;
            if position.size.is_zero() {
                state.positions.remove(&key);
            }
            filled
        } else {
            let position = state.positions.entry(key).or_default();
            let notional = position.avg_entry * position.size + price * order.quantity;
            position.size += order.quantity;
            position.avg_entry = notional / position.size;
            order.quantity
        };

        state.next_order_id += 1;
        let order_id = format!("paper-{}", state.next_order_id);
        state.orders.push(order.clone());
        Ok(OrderResult::Accepted {
            order_id,
            fill_price: Some(price),
            filled_size: Some(filled),
        })
    }

    async fn get_positions(
        &self,
        symbol: &str,
        side: Side,
    ) -> Result<Vec<StandardPosition>, ExchangeError> {
        self.simulate_latency().await;
        self.take_failure()?;

        let state = self.state.read();
        let key = (symbol.to_string(), side);
        let leverage = state.leverage.get(&key).copied().unwrap_or(Decimal::ONE);
        Ok(state
            .positions
            .get(&key)
            .filter(|p| !p.size.is_zero())
            .map(|p| {
                let mark = state.price.unwrap_or(p.avg_entry);
                let unrealized_pnl = match side {
                    Side::Long => (mark - p.avg_entry) * p.size,
                    Side::Short => (p.avg_entry - mark) * p.size,
                };
                StandardPosition {
                    symbol: symbol.to_string(),
                    side,
                    size: p.size,
                    avg_entry_price: p.avg_entry,
                    unrealized_pnl,
                    leverage,
                    liquidation_price: None,
                }
            })
            .into_iter()
            .collect())
    }

    async fn get_ticker(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        self.simulate_latency().await;
        self.take_failure()?;
        self.price()
            .ok_or_else(|| ExchangeError::Network("no price published yet".to_string()))
    }

    async fn transfer(
        &self,
        from: AccountPurpose,
        to: AccountPurpose,
        amount: Decimal,
    ) -> Result<(), ExchangeError> {
        self.simulate_latency().await;
        self.take_failure()?;

        let mut state = self.state.write();
        let available = state.balances.get(&from).copied().unwrap_or_default();
        if available < amount {
            return Err(ExchangeError::InsufficientBalance(format!(
                "{from:?} holds {available}, transfer needs {amount}"
            )));
        }
        *state.balances.entry(from).or_default() -= amount;
        *state.balances.entry(to).or_default() += amount;
        state.transfers.push((from, to, amount));
        Ok(())
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        side: Side,
        leverage: Decimal,
    ) -> Result<(), ExchangeError> {
        self.take_failure()?;
        self.state
            .write()
            .leverage
            .insert((symbol.to_string(), side), leverage);
        Ok(())
    }
}
