use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::position_sizing::{realized_pnl, unrealized_pnl, PnlBreakdown};
use crate::types::{CloseReason, Side};

/// Lifecycle state of a logical position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Pending,
    Opening,
    Open,
    Closing,
    Closed,
    Failed,
}

impl PositionState {
    /// States whose allocated capital is held out of the available pool.
    #[must_use]
    pub const fn holds_capital(self) -> bool {
        !matches!(self, Self::Pending | Self::Closed)
    }
}

/// One capital slice of an Operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalPosition {
    pub id: Uuid,
    pub side: Side,
    pub state: PositionState,
    pub allocated_capital: Decimal,
    pub entry_price: Option<Decimal>,
    pub size: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
    pub trailing_active: bool,
    /// Best price seen since the trailing stop armed (high for long, low for short).
    pub high_water_price: Option<Decimal>,
    pub trailing_stop_price: Option<Decimal>,
    pub order_id: Option<String>,
    pub open_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl LogicalPosition {
    #[must_use]
    pub fn pending(side: Side) -> Self {
        Self {
            id: Uuid::new_v4(),
            side,
            state: PositionState::Pending,
            allocated_capital: Decimal::ZERO,
            entry_price: None,
            size: Decimal::ZERO,
            stop_loss_price: None,
            liquidation_price: None,
            trailing_active: false,
            high_water_price: None,
            trailing_stop_price: None,
            order_id: None,
            open_time: None,
            last_error: None,
        }
    }

    /// Whether the position carries (or may carry) exchange contracts.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            PositionState::Opening | PositionState::Open | PositionState::Closing
        ) || (self.state == PositionState::Failed && self.size > Decimal::ZERO)
    }

    /// Contracts counted against the exchange's physical position.
    #[must_use]
    pub fn tracked_size(&self) -> Decimal {
        match self.state {
            PositionState::Open | PositionState::Closing | PositionState::Failed => self.size,
            _ => Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        match (self.state, self.entry_price) {
            (PositionState::Open | PositionState::Closing, Some(entry)) => {
                unrealized_pnl(self.side, entry, price, self.size)
            }
            _ => Decimal::ZERO,
        }
    }

    fn transition(&mut self, expected: &[PositionState], to: PositionState) -> Result<(), EngineError> {
        if !expected.contains(&self.state) {
            return Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// `PENDING -> OPENING`, capturing the margin at the moment of opening.
    ///
    /// # Errors
    /// Returns `InvalidTransition` unless the position is pending.
    pub fn begin_opening(&mut self, capital: Decimal) -> Result<(), EngineError> {
        self.transition(&[PositionState::Pending], PositionState::Opening)?;
        self.allocated_capital = capital;
        self.last_error = None;
        Ok(())
    }

    /// `OPENING -> OPEN` once the exchange confirmed the fill.
    ///
    /// # Errors
    /// Returns `InvalidTransition` unless the position is opening.
    pub fn confirm_open(
        &mut self,
        fill: OpenFill,
        opened_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.transition(&[PositionState::Opening], PositionState::Open)?;
        self.entry_price = Some(fill.entry_price);
        self.size = fill.size;
        self.stop_loss_price = fill.stop_loss_price;
        self.liquidation_price = fill.liquidation_price;
        self.order_id = Some(fill.order_id);
        self.open_time = Some(opened_at);
        Ok(())
    }

    /// `OPENING -> PENDING` after a failed placement; capital is released.
    ///
    /// # Errors
    /// Returns `InvalidTransition` unless the position is opening.
    pub fn revert_to_pending(&mut self, reason: String) -> Result<(), EngineError> {
        self.transition(&[PositionState::Opening], PositionState::Pending)?;
        self.allocated_capital = Decimal::ZERO;
        self.size = Decimal::ZERO;
        self.last_error = Some(reason);
        Ok(())
    }

    /// `OPEN -> CLOSING` before the close order is dispatched.
    ///
    /// # Errors
    /// Returns `InvalidTransition` unless the position is open.
    pub fn begin_closing(&mut self) -> Result<(), EngineError> {
        self.transition(&[PositionState::Open], PositionState::Closing)
    }

    /// `CLOSING -> OPEN` after a transient close failure.
    ///
    /// # Errors
    /// Returns `InvalidTransition` unless the position is closing.
    pub fn abort_closing(&mut self, reason: String) -> Result<(), EngineError> {
        self.transition(&[PositionState::Closing], PositionState::Open)?;
        self.last_error = Some(reason);
        Ok(())
    }

    /// Any active state `-> FAILED` on an unrecoverable exchange error.
    ///
    /// # Errors
    /// Returns `InvalidTransition` from `PENDING` or `CLOSED`.
    pub fn fail(&mut self, reason: String) -> Result<(), EngineError> {
        self.transition(
            &[
                PositionState::Opening,
                PositionState::Open,
                PositionState::Closing,
            ],
            PositionState::Failed,
        )?;
        self.last_error = Some(reason);
        Ok(())
    }

    /// Final transition to `CLOSED`, producing the audit record.
    ///
    /// Accepted from `CLOSING` for regular closes and from `OPEN`/`FAILED` for
    /// reconciliation force-closes.
    ///
    /// # Errors
    /// Returns `InvalidTransition` from `PENDING`, `OPENING`, or `CLOSED`.
    pub fn close(&mut self, exit: PositionExit) -> Result<ClosedPositionRecord, EngineError> {
        let entry_price = self.entry_price.unwrap_or(exit.price);
        let size = self.size;
        self.transition(
            &[
                PositionState::Closing,
                PositionState::Open,
                PositionState::Failed,
            ],
            PositionState::Closed,
        )?;
        let pnl = realized_pnl(self.side, entry_price, exit.price, size, exit.commission_rate);
        self.size = Decimal::ZERO;
        Ok(ClosedPositionRecord {
            id: self.id,
            side: self.side,
            entry_price,
            exit_price: exit.price,
            size,
            pnl: pnl.net,
            pnl_gross: pnl.gross,
            commission: pnl.commission,
            open_time: self.open_time,
            close_time: exit.time,
            close_reason: exit.reason,
            estimated: exit.estimated,
            log_timestamp_utc: Utc::now(),
        })
    }

    #[must_use]
    pub fn pnl_at(&self, price: Decimal, commission_rate: Decimal) -> Option<PnlBreakdown> {
        self.entry_price
            .map(|entry| realized_pnl(self.side, entry, price, self.size, commission_rate))
    }
}

/// Fill details recorded when an opening is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFill {
    pub order_id: String,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
}

/// Exit details for the final transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionExit {
    pub price: Decimal,
    pub time: DateTime<Utc>,
    pub reason: CloseReason,
    pub commission_rate: Decimal,
    /// Exit price is the last-known price rather than an exchange fill.
    pub estimated: bool,
}

/// One line of `closed_positions.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPositionRecord {
    pub id: Uuid,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
    pub pnl_gross: Decimal,
    pub commission: Decimal,
    pub open_time: Option<DateTime<Utc>>,
    pub close_time: DateTime<Utc>,
    pub close_reason: CloseReason,
    pub estimated: bool,
    pub log_timestamp_utc: DateTime<Utc>,
}
