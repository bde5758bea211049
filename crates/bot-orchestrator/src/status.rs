use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trendline_core::{CloseReason, Operation, OperationState, Side, Sides, Signal, TrendMode};
use trendline_strategy::Bias;

/// Tick pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Idle,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideStatus {
    pub side: Side,
    pub state: OperationState,
    pub trend_mode: TrendMode,
    pub active_positions: usize,
    pub max_slots: usize,
    pub tracked_size: Decimal,
    pub untracked_size: Decimal,
    pub available_capital: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub roi_pct: Decimal,
    pub total_trades: u32,
    pub halt_reason: Option<String>,
}

impl SideStatus {
    #[must_use]
    pub fn from_operation(op: &Operation, price: Option<Decimal>) -> Self {
        let price = price.or(op.last_price);
        Self {
            side: op.side,
            state: op.state,
            trend_mode: op.trend.mode(),
            active_positions: op.active_count(),
            max_slots: op.config.max_slots,
            tracked_size: op.tracked_size(),
            untracked_size: op.untracked_size,
            available_capital: op.available_capital(),
            realized_pnl: op.realized_pnl,
            unrealized_pnl: price.map_or(Decimal::ZERO, |p| op.unrealized_pnl(p)),
            roi_pct: price.map_or(Decimal::ZERO, |p| op.roi_pct(p)),
            total_trades: op.total_trades,
            halt_reason: op.halt_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: OrchestratorState,
    pub session_running: bool,
    pub session_roi_pct: Decimal,
    pub stop_reason: Option<CloseReason>,
    pub ticks_processed: u64,
    pub last_price: Option<Decimal>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_signal: Option<Signal>,
    pub bias: Option<Bias>,
    pub sides: Sides<SideStatus>,
    pub updated_at: DateTime<Utc>,
}
