//! Lifecycle of logical positions on both sides.
//!
//! Every public method takes the side's lock for its whole duration, so a
//! manual action never interleaves with tick processing on the same side.
//! The `*_on` variants expect the caller to already hold that lock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use trendline_core::position_sizing::{
    contract_size, distance_pct, liquidation_price, position_margin, stop_loss_price,
};
use trendline_core::{
    AccountPurpose, ClosedPositionRecord, CloseReason, EngineError, EventBus, ExchangeError,
    ExchangePort, Journal, OpenFill, Operation, OperationBook, OperationState, OrderResult,
    PositionExit, PositionState, Side, Sides, Signal, StandardOrder, TradingEvent,
};
use uuid::Uuid;

use crate::risk::{operation_exit, position_trigger};
use crate::timed::TimedExchange;

/// Why a signal did not lead to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Hold,
    OtherSide,
    NotActive,
    TrendForbids,
    NoFreeSlot,
    AveragingDistance,
    InsufficientCapital,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Opened {
        id: Uuid,
        entry_price: Decimal,
        size: Decimal,
    },
    Skipped(SkipReason),
    /// Transient failure; the slot is back to `PENDING`.
    OrderFailed(String),
}

pub struct PositionEngine {
    book: Arc<OperationBook>,
    exchange: TimedExchange,
    journal: Journal,
    events: EventBus,
    symbol: String,
}

impl PositionEngine {
    #[must_use]
    pub fn new(
        book: Arc<OperationBook>,
        exchange: TimedExchange,
        journal: Journal,
        events: EventBus,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            book,
            exchange,
            journal,
            events,
            symbol: symbol.into(),
        }
    }

    #[must_use]
    pub const fn book(&self) -> &Arc<OperationBook> {
        &self.book
    }

    #[must_use]
    pub const fn exchange(&self) -> &TimedExchange {
        &self.exchange
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub const fn journal(&self) -> &Journal {
        &self.journal
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Opens the side's next pending slot if every entry gate passes.
    ///
    /// # Errors
    /// Returns [`EngineError::SideHalted`] on a fatal exchange error and
    /// [`EngineError::InvalidTransition`] if slot state is inconsistent.
    pub async fn handle_signal(
        &self,
        side: Side,
        signal: Signal,
        price: Decimal,
    ) -> Result<SignalOutcome, EngineError> {
        let mut op = self.book.side(side).lock().await;
        self.handle_signal_on(&mut op, signal, price, Utc::now()).await
    }

    /// # Errors
    /// See [`PositionEngine::handle_signal`].
    pub async fn handle_signal_on(
        &self,
        op: &mut Operation,
        signal: Signal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, EngineError> {
        if signal.target_side() != Some(op.side) {
            let reason = if signal == Signal::Hold {
                SkipReason::Hold
            } else {
                SkipReason::OtherSide
            };
            return Ok(SignalOutcome::Skipped(reason));
        }
        if !op.accepts_openings() {
            return Ok(SignalOutcome::Skipped(SkipReason::NotActive));
        }
        if !op.trend.mode().permits(op.side) {
            tracing::debug!(side = %op.side, mode = %op.trend.mode(), "Trend does not permit opening");
            return Ok(SignalOutcome::Skipped(SkipReason::TrendForbids));
        }
        let Some(index) = op.next_pending_index() else {
            return Ok(SignalOutcome::Skipped(SkipReason::NoFreeSlot));
        };
        if op.active_count() >= op.config.max_slots {
            return Ok(SignalOutcome::Skipped(SkipReason::NoFreeSlot));
        }
        if let Some(last_entry) = op.latest_open_entry() {
            let moved = distance_pct(last_entry, price);
            if moved < op.config.averaging_distance_pct {
                tracing::debug!(
                    side = %op.side,
                    last_entry = %last_entry,
                    price = %price,
                    moved_pct = %moved,
                    required_pct = %op.config.averaging_distance_pct,
                    "Averaging distance not met"
                );
                return Ok(SignalOutcome::Skipped(SkipReason::AveragingDistance));
            }
        }
        self.open_slot(op, index, price, now).await
    }

    /// Opens the next pending slot regardless of signal, trend and averaging gates.
    ///
    /// # Errors
    /// Fails when the side is halted or stopped, has no pending slot, or no
    /// price is known.
    pub async fn manual_open_next_pending(&self, side: Side) -> Result<SignalOutcome, EngineError> {
        let mut op = self.book.side(side).lock().await;
        let price = self.price_for(&op).await?;
        self.manual_open_on(&mut op, price, Utc::now()).await
    }

    /// # Errors
    /// See [`PositionEngine::manual_open_next_pending`].
    pub async fn manual_open_on(
        &self,
        op: &mut Operation,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, EngineError> {
        let side = op.side;
        if let Some(reason) = &op.halt_reason {
            return Err(EngineError::SideHalted {
                side,
                reason: reason.clone(),
            });
        }
        if op.state == OperationState::Stopped {
            return Err(EngineError::OperationStopped { side });
        }
        let index = op
            .next_pending_index()
            .ok_or(EngineError::NoFreeSlot { side })?;
        tracing::info!(side = %side, price = %price, "Manual open requested");
        self.open_slot(op, index, price, now).await
    }

    async fn open_slot(
        &self,
        op: &mut Operation,
        index: usize,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, EngineError> {
        let side = op.side;
        let pending = op.count_in(PositionState::Pending);
        let margin = position_margin(
            op.config.capital_per_position,
            op.available_capital(),
            pending,
        );
        let size = contract_size(margin, op.config.leverage, price, op.config.size_decimals);
        if size.is_zero() {
            tracing::debug!(side = %side, margin = %margin, price = %price, "Not enough capital for a position");
            return Ok(SignalOutcome::Skipped(SkipReason::InsufficientCapital));
        }
        let stop_loss_pct = op.trend.config.stop_loss_pct;
        let leverage = op.config.leverage;

        let position = op
            .positions
            .get_mut(index)
            .ok_or(EngineError::NoFreeSlot { side })?;
        position.begin_opening(margin)?;
        let order = StandardOrder::market_entry(&self.symbol, side, size).with_client_id(position.id);

        match self.exchange.place_order(&order).await {
            Ok(OrderResult::Accepted {
                order_id,
                fill_price,
                filled_size,
            }) => {
                let entry_price = fill_price.unwrap_or(price);
                let size = filled_size.filter(|s| *s > Decimal::ZERO).unwrap_or(size);
                position.confirm_open(
                    OpenFill {
                        order_id,
                        entry_price,
                        size,
                        stop_loss_price: Some(stop_loss_price(side, entry_price, stop_loss_pct)),
                        liquidation_price: liquidation_price(side, entry_price, leverage),
                    },
                    now,
                )?;
                let id = position.id;
                tracing::info!(
                    side = %side,
                    id = %id,
                    entry_price = %entry_price,
                    size = %size,
                    margin = %margin,
                    "Position opened"
                );
                self.events.emit(TradingEvent::PositionOpened {
                    side,
                    id,
                    entry_price,
                    size,
                });
                Ok(SignalOutcome::Opened {
                    id,
                    entry_price,
                    size,
                })
            }
            Ok(OrderResult::Rejected { reason }) => {
                position.revert_to_pending(reason.clone())?;
                self.order_failed(side, "open", &reason);
                Ok(SignalOutcome::OrderFailed(reason))
            }
            Err(err) if err.is_fatal() => {
                position.fail(err.to_string())?;
                Err(self.halt(op, &err))
            }
            Err(err) => {
                let reason = err.to_string();
                position.revert_to_pending(reason.clone())?;
                self.order_failed(side, "open", &reason);
                Ok(SignalOutcome::OrderFailed(reason))
            }
        }
    }

    /// Runs stop-loss, trailing-stop and operation exit checks on both sides.
    pub async fn check_risk_triggers(
        &self,
        price: Decimal,
    ) -> Sides<Result<Vec<ClosedPositionRecord>, EngineError>> {
        let (long, short) = tokio::join!(
            self.check_risk_side(Side::Long, price),
            self.check_risk_side(Side::Short, price)
        );
        Sides::new(long, short)
    }

    async fn check_risk_side(
        &self,
        side: Side,
        price: Decimal,
    ) -> Result<Vec<ClosedPositionRecord>, EngineError> {
        let mut op = self.book.side(side).lock().await;
        self.check_risk_on(&mut op, price, Utc::now()).await
    }

    /// # Errors
    /// Returns [`EngineError::SideHalted`] when a close hits a fatal exchange error.
    pub async fn check_risk_on(
        &self,
        op: &mut Operation,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClosedPositionRecord>, EngineError> {
        op.last_price = Some(price);
        if op.is_halted() {
            return Ok(Vec::new());
        }

        let trend = op.trend.config.clone();
        let triggered: Vec<(usize, CloseReason)> = op
            .positions
            .iter_mut()
            .enumerate()
            .filter_map(|(i, p)| position_trigger(p, price, &trend).map(|r| (i, r)))
            .collect();

        let mut closed = Vec::new();
        for (index, reason) in triggered {
            if let Some(record) = self.close_slot(op, index, price, reason, now).await? {
                closed.push(record);
            }
        }

        if op.state != OperationState::Stopped {
            if let Some(reason) = operation_exit(op, price) {
                tracing::warn!(
                    side = %op.side,
                    roi_pct = %op.roi_pct(price),
                    reason = %reason,
                    "Operation exit reached"
                );
                closed.extend(self.close_all_on(op, reason, price, now).await?);
                op.state = OperationState::Stopped;
                self.events.emit(TradingEvent::OperationStateChanged {
                    side: op.side,
                    state: OperationState::Stopped,
                });
            }
        }
        Ok(closed)
    }

    /// Closes every open position of a side.
    ///
    /// # Errors
    /// Fails when no price is known or a close hits a fatal exchange error.
    pub async fn close_all(
        &self,
        side: Side,
        reason: CloseReason,
    ) -> Result<Vec<ClosedPositionRecord>, EngineError> {
        let mut op = self.book.side(side).lock().await;
        let price = self.price_for(&op).await?;
        self.close_all_on(&mut op, reason, price, Utc::now()).await
    }

    /// # Errors
    /// See [`PositionEngine::close_all`].
    pub async fn close_all_on(
        &self,
        op: &mut Operation,
        reason: CloseReason,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClosedPositionRecord>, EngineError> {
        let open: Vec<usize> = op
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == PositionState::Open)
            .map(|(i, _)| i)
            .collect();
        if !open.is_empty() {
            tracing::info!(side = %op.side, count = open.len(), reason = %reason, "Closing all positions");
        }

        let mut closed = Vec::with_capacity(open.len());
        for index in open {
            if let Some(record) = self.close_slot(op, index, price, reason, now).await? {
                closed.push(record);
            }
        }
        Ok(closed)
    }

    /// Closes one position by id.
    ///
    /// Returns `None` when the exchange refused the close; the position stays `OPEN`.
    ///
    /// # Errors
    /// Fails for unknown ids, positions that are not `OPEN`, and fatal errors.
    pub async fn close_position(
        &self,
        side: Side,
        id: Uuid,
        reason: CloseReason,
    ) -> Result<Option<ClosedPositionRecord>, EngineError> {
        let mut op = self.book.side(side).lock().await;
        let index = op
            .position_index(id)
            .ok_or(EngineError::UnknownPosition(id))?;
        let price = self.price_for(&op).await?;
        self.close_slot(&mut op, index, price, reason, Utc::now()).await
    }

    async fn close_slot(
        &self,
        op: &mut Operation,
        index: usize,
        price: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<Option<ClosedPositionRecord>, EngineError> {
        let side = op.side;
        let commission_rate = op.config.commission_rate;
        let Some(position) = op.positions.get_mut(index) else {
            return Ok(None);
        };
        position.begin_closing()?;
        let order = StandardOrder::market_exit(&self.symbol, side, position.size)
            .with_client_id(position.id);

        let (exit_price, estimated) = match self.exchange.place_order(&order).await {
            Ok(OrderResult::Accepted { fill_price, .. }) => (fill_price.unwrap_or(price), false),
            Ok(OrderResult::Rejected { reason: why }) => {
                position.abort_closing(why.clone())?;
                self.order_failed(side, "close", &why);
                return Ok(None);
            }
            Err(ExchangeError::PositionNotFound(detail)) => {
                tracing::warn!(
                    side = %side,
                    id = %position.id,
                    detail = %detail,
                    "Exchange holds no position to close, booking it as closed"
                );
                (price, true)
            }
            Err(err) if err.is_fatal() => {
                position.fail(err.to_string())?;
                return Err(self.halt(op, &err));
            }
            Err(err) => {
                let why = err.to_string();
                position.abort_closing(why.clone())?;
                self.order_failed(side, "close", &why);
                return Ok(None);
            }
        };

        let record = position.close(PositionExit {
            price: exit_price,
            time: now,
            reason,
            commission_rate,
            estimated,
        })?;
        Ok(Some(self.book_close(op, index, record)))
    }

    /// Journals a closed position and returns its capital to the operation.
    pub(crate) fn book_close(
        &self,
        op: &mut Operation,
        index: usize,
        record: ClosedPositionRecord,
    ) -> ClosedPositionRecord {
        tracing::info!(
            side = %record.side,
            id = %record.id,
            entry_price = %record.entry_price,
            exit_price = %record.exit_price,
            pnl = %record.pnl,
            reason = %record.close_reason,
            estimated = record.estimated,
            "Position closed"
        );
        self.journal.log_closed_position(&record);
        self.events.emit(TradingEvent::PositionClosed {
            side: record.side,
            id: record.id,
            exit_price: record.exit_price,
            pnl: record.pnl,
            reason: record.close_reason,
            estimated: record.estimated,
        });

        if op.record_close(index, &record) {
            tracing::info!(side = %op.side, "Paused operation wound down");
            self.events.emit(TradingEvent::OperationStateChanged {
                side: op.side,
                state: OperationState::Stopped,
            });
        }
        self.sweep_profit(op, &record);
        record
    }

    fn sweep_profit(&self, op: &Operation, record: &ClosedPositionRecord) {
        let share = op.config.profit_transfer_pct;
        if share <= Decimal::ZERO || record.pnl <= Decimal::ZERO || record.estimated {
            return;
        }
        let amount = (record.pnl * share / Decimal::ONE_HUNDRED).round_dp(8);
        if amount.is_zero() {
            return;
        }
        let from = AccountPurpose::for_side(op.side);
        let exchange = self.exchange.clone();
        tokio::spawn(async move {
            match exchange.transfer(from, AccountPurpose::Profit, amount).await {
                Ok(()) => tracing::info!(from = ?from, amount = %amount, "Profit swept"),
                Err(e) => tracing::warn!(from = ?from, amount = %amount, error = %e, "Profit sweep failed"),
            }
        });
    }

    /// Halts the side after a fatal exchange error.
    pub(crate) fn halt(&self, op: &mut Operation, err: &ExchangeError) -> EngineError {
        let side = op.side;
        let reason = err.to_string();
        tracing::error!(side = %side, error = %reason, "Fatal exchange error, halting side");
        op.halt(reason.clone());
        self.events.emit(TradingEvent::SideHalted {
            side,
            reason: reason.clone(),
        });
        self.events.emit(TradingEvent::OperationStateChanged {
            side,
            state: OperationState::Stopped,
        });
        EngineError::SideHalted { side, reason }
    }

    fn order_failed(&self, side: Side, action: &str, reason: &str) {
        tracing::warn!(side = %side, action, reason, "Order failed, retrying on a later tick");
        self.events.emit(TradingEvent::OrderFailed {
            side,
            message: format!("{action}: {reason}"),
        });
    }

    /// Last tick price for the side, falling back to the exchange ticker.
    ///
    /// # Errors
    /// Propagates the ticker query failure.
    pub async fn price_for(&self, op: &Operation) -> Result<Decimal, EngineError> {
        if let Some(price) = op.last_price {
            return Ok(price);
        }
        Ok(self.exchange.get_ticker(&self.symbol).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperExchange;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use trendline_core::{Crossing, ExitCondition, OperationConfig, TrendMode};

    const SYMBOL: &str = "BTCUSDT";

    fn engine(paper: &Arc<PaperExchange>, config: OperationConfig) -> PositionEngine {
        let now = Utc::now();
        let book = Arc::new(OperationBook::new(
            Operation::new(Side::Long, config.clone(), now),
            Operation::new(Side::Short, config, now),
        ));
        PositionEngine::new(
            book,
            TimedExchange::new(paper.clone(), Duration::from_secs(1)),
            Journal::disabled(),
            EventBus::default(),
            SYMBOL,
        )
    }

    fn paper_at(price: Decimal) -> Arc<PaperExchange> {
        let paper = Arc::new(PaperExchange::new());
        paper.set_price(price);
        paper
    }

    async fn buy(engine: &PositionEngine, paper: &PaperExchange, price: Decimal) -> SignalOutcome {
        paper.set_price(price);
        engine.handle_signal(Side::Long, Signal::Buy, price).await.unwrap()
    }

    #[tokio::test]
    async fn averaging_distance_gates_the_next_slot() {
        let paper = paper_at(dec!(100));
        let engine = engine(
            &paper,
            OperationConfig {
                max_slots: 2,
                averaging_distance_pct: dec!(1),
                ..OperationConfig::default()
            },
        );

        assert!(matches!(buy(&engine, &paper, dec!(100)).await, SignalOutcome::Opened { .. }));
        assert_eq!(
            buy(&engine, &paper, dec!(100.5)).await,
            SignalOutcome::Skipped(SkipReason::AveragingDistance)
        );
        let SignalOutcome::Opened { entry_price, .. } = buy(&engine, &paper, dec!(101.2)).await else {
            panic!("second slot should open");
        };
        assert_eq!(entry_price, dec!(101.2));
        assert_eq!(
            buy(&engine, &paper, dec!(103)).await,
            SignalOutcome::Skipped(SkipReason::NoFreeSlot)
        );
        assert_eq!(engine.book().side(Side::Long).lock().await.active_count(), 2);
    }

    #[tokio::test]
    async fn active_positions_never_exceed_max_slots() {
        let paper = paper_at(dec!(100));
        let engine = engine(
            &paper,
            OperationConfig {
                max_slots: 3,
                averaging_distance_pct: dec!(0),
                initial_capital: dec!(50),
                ..OperationConfig::default()
            },
        );

        for step in 0..10 {
            buy(&engine, &paper, dec!(100) + Decimal::from(step)).await;
            let op = engine.book().side(Side::Long).lock().await;
            assert!(op.active_count() <= 3);
            assert_eq!(op.positions.len(), 3);
        }
        assert_eq!(engine.book().side(Side::Long).lock().await.active_count(), 3);
    }

    #[tokio::test]
    async fn signals_only_open_their_own_side() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());

        assert_eq!(
            engine.handle_signal(Side::Long, Signal::Sell, dec!(100)).await.unwrap(),
            SignalOutcome::Skipped(SkipReason::OtherSide)
        );
        assert_eq!(
            engine.handle_signal(Side::Short, Signal::Hold, dec!(100)).await.unwrap(),
            SignalOutcome::Skipped(SkipReason::Hold)
        );
        assert!(matches!(
            engine.handle_signal(Side::Short, Signal::Sell, dec!(100)).await.unwrap(),
            SignalOutcome::Opened { .. }
        ));
    }

    #[tokio::test]
    async fn capital_returns_with_realized_pnl_on_close() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());

        buy(&engine, &paper, dec!(100)).await;
        assert_eq!(
            engine.book().side(Side::Long).lock().await.available_capital(),
            dec!(4)
        );

        paper.set_price(dec!(110));
        let closed = engine.close_all(Side::Long, CloseReason::Manual).await.unwrap();
        assert_eq!(closed.len(), 1);
        // 0.1 * 10 gross, (10 + 11) * 0.001 commission
        assert_eq!(closed[0].pnl, dec!(0.979));

        let op = engine.book().side(Side::Long).lock().await;
        assert_eq!(op.available_capital(), dec!(5.979));
        assert_eq!(op.count_in(PositionState::Pending), op.config.max_slots);
        assert_eq!(op.total_trades, 1);
    }

    #[tokio::test]
    async fn transient_failure_reverts_slot_to_pending() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());

        paper.fail_next(ExchangeError::Network("connection reset".to_string()));
        let outcome = buy(&engine, &paper, dec!(100)).await;
        assert!(matches!(outcome, SignalOutcome::OrderFailed(_)));

        let op = engine.book().side(Side::Long).lock().await;
        assert_eq!(op.count_in(PositionState::Pending), op.config.max_slots);
        assert!(op.positions[0].last_error.is_some());
        assert!(!op.is_halted());
    }

    #[tokio::test]
    async fn fatal_error_halts_only_that_side() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());

        paper.fail_next(ExchangeError::Unauthorized("key revoked".to_string()));
        let err = engine
            .handle_signal(Side::Long, Signal::Buy, dec!(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SideHalted { side: Side::Long, .. }));
        {
            let op = engine.book().side(Side::Long).lock().await;
            assert!(op.is_halted());
            assert_eq!(op.state, OperationState::Stopped);
        }

        assert_eq!(
            buy(&engine, &paper, dec!(100)).await,
            SignalOutcome::Skipped(SkipReason::NotActive)
        );
        assert!(matches!(
            engine.handle_signal(Side::Short, Signal::Sell, dec!(100)).await.unwrap(),
            SignalOutcome::Opened { .. }
        ));
    }

    #[tokio::test]
    async fn missing_exchange_position_is_booked_as_estimated_close() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());
        buy(&engine, &paper, dec!(100)).await;

        paper.liquidate(SYMBOL, Side::Long);
        paper.set_price(dec!(95));
        let closed = engine.close_all(Side::Long, CloseReason::Manual).await.unwrap();

        assert_eq!(closed.len(), 1);
        assert!(closed[0].estimated);
        assert_eq!(closed[0].exit_price, dec!(95));
        assert_eq!(engine.book().side(Side::Long).lock().await.active_count(), 0);
    }

    #[tokio::test]
    async fn manual_open_bypasses_trend_gate() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());
        {
            let mut op = engine.book().side(Side::Long).lock().await;
            let neutral = op.trend.config.with_mode(TrendMode::Neutral);
            op.set_trend(neutral, None, Utc::now());
        }

        assert_eq!(
            buy(&engine, &paper, dec!(100)).await,
            SignalOutcome::Skipped(SkipReason::TrendForbids)
        );
        assert!(matches!(
            engine.manual_open_next_pending(Side::Long).await.unwrap(),
            SignalOutcome::Opened { .. }
        ));
    }

    #[tokio::test]
    async fn manual_open_refused_when_stopped() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());
        engine.book().side(Side::Short).lock().await.state = OperationState::Stopped;

        let err = engine.manual_open_next_pending(Side::Short).await.unwrap_err();
        assert!(matches!(err, EngineError::OperationStopped { side: Side::Short }));
    }

    #[tokio::test]
    async fn stop_loss_closes_on_risk_check() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());
        buy(&engine, &paper, dec!(100)).await;

        paper.set_price(dec!(89));
        let results = engine.check_risk_triggers(dec!(89)).await;
        let closed = results.long.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_reason, CloseReason::StopLoss);
        assert!(results.short.unwrap().is_empty());
    }

    #[tokio::test]
    async fn operation_roi_breach_stops_the_operation() {
        let paper = paper_at(dec!(100));
        let engine = engine(
            &paper,
            OperationConfig {
                initial_capital: dec!(5),
                roi_tp_pct: Some(dec!(1)),
                ..OperationConfig::default()
            },
        );
        buy(&engine, &paper, dec!(100)).await;

        // 0.1 contracts up 1 is 2% of 5
        paper.set_price(dec!(101));
        let closed = engine.check_risk_triggers(dec!(101)).await.long.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_reason, CloseReason::OperationTpRoi);
        assert_eq!(
            engine.book().side(Side::Long).lock().await.state,
            OperationState::Stopped
        );
    }

    #[tokio::test]
    async fn exit_condition_closes_and_stops_the_operation() {
        let paper = paper_at(dec!(100));
        let engine = engine(
            &paper,
            OperationConfig {
                exit_condition: Some(ExitCondition {
                    crossing: Crossing::Below,
                    price: dec!(98),
                }),
                ..OperationConfig::default()
            },
        );
        buy(&engine, &paper, dec!(100)).await;

        paper.set_price(dec!(99));
        assert!(engine.check_risk_triggers(dec!(99)).await.long.unwrap().is_empty());

        paper.set_price(dec!(97.5));
        let closed = engine.check_risk_triggers(dec!(97.5)).await.long.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_reason, CloseReason::ExitCondition);
        assert_eq!(paper.position_size(SYMBOL, Side::Long), dec!(0));
        assert_eq!(
            engine.book().side(Side::Long).lock().await.state,
            OperationState::Stopped
        );
    }

    #[tokio::test]
    async fn paused_operation_winds_down_to_stopped() {
        let paper = paper_at(dec!(100));
        let engine = engine(&paper, OperationConfig::default());
        buy(&engine, &paper, dec!(100)).await;
        engine.book().side(Side::Long).lock().await.state = OperationState::Paused;

        assert_eq!(
            buy(&engine, &paper, dec!(110)).await,
            SignalOutcome::Skipped(SkipReason::NotActive)
        );
        engine.close_all(Side::Long, CloseReason::Manual).await.unwrap();
        assert_eq!(
            engine.book().side(Side::Long).lock().await.state,
            OperationState::Stopped
        );
    }

    #[tokio::test]
    async fn profitable_close_sweeps_share_to_profit_account() {
        let paper = paper_at(dec!(100));
        paper.fund(AccountPurpose::Longs, dec!(10));
        let engine = engine(
            &paper,
            OperationConfig {
                profit_transfer_pct: dec!(50),
                ..OperationConfig::default()
            },
        );
        buy(&engine, &paper, dec!(100)).await;
        paper.set_price(dec!(110));
        engine.close_all(Side::Long, CloseReason::Manual).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            paper.transfers(),
            vec![(AccountPurpose::Longs, AccountPurpose::Profit, dec!(0.4895))]
        );
    }
}
