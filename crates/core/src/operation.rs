use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::OperationConfig;
use crate::error::ConfigError;
use crate::milestone::{MilestoneId, MilestoneTree};
use crate::position::{ClosedPositionRecord, LogicalPosition, PositionState};
use crate::position_sizing::roi_pct;
use crate::trend::{Trend, TrendConfig};
use crate::types::{OperationState, Side, TrendMode};

/// Strategy state for one market side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub side: Side,
    pub state: OperationState,
    pub config: OperationConfig,
    pub trend: Trend,
    /// Always `config.max_slots` entries.
    pub positions: Vec<LogicalPosition>,
    pub realized_pnl: Decimal,
    pub total_trades: u32,
    pub milestones: MilestoneTree,
    pub halt_reason: Option<String>,
    pub last_price: Option<Decimal>,
    /// Exchange size not backed by any local position.
    pub untracked_size: Decimal,
    /// Highest aggregate ROI since the ROI trailing stop armed.
    pub roi_peak_pct: Option<Decimal>,
    pub started_at: DateTime<Utc>,
}

impl Operation {
    #[must_use]
    pub fn new(side: Side, config: OperationConfig, now: DateTime<Utc>) -> Self {
        let state = if config.enabled {
            OperationState::Active
        } else {
            OperationState::Stopped
        };
        let positions = (0..config.max_slots)
            .map(|_| LogicalPosition::pending(side))
            .collect();
        let trend = Trend::start(config.trend.clone(), now, None, Decimal::ZERO);
        Self {
            side,
            state,
            config,
            trend,
            positions,
            realized_pnl: Decimal::ZERO,
            total_trades: 0,
            milestones: MilestoneTree::new(),
            halt_reason: None,
            last_price: None,
            untracked_size: Decimal::ZERO,
            roi_peak_pct: None,
            started_at: now,
        }
    }

    #[must_use]
    pub const fn initial_capital(&self) -> Decimal {
        self.config.initial_capital
    }

    /// Capital not held by `OPENING`/`OPEN`/`CLOSING`/`FAILED` positions.
    #[must_use]
    pub fn available_capital(&self) -> Decimal {
        let held: Decimal = self
            .positions
            .iter()
            .filter(|p| p.state.holds_capital())
            .map(|p| p.allocated_capital)
            .sum();
        self.config.initial_capital + self.realized_pnl - held
    }

    #[must_use]
    pub fn count_in(&self, state: PositionState) -> usize {
        self.positions.iter().filter(|p| p.state == state).count()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_active()).count()
    }

    #[must_use]
    pub fn next_pending_index(&self) -> Option<usize> {
        self.positions
            .iter()
            .position(|p| p.state == PositionState::Pending)
    }

    #[must_use]
    pub fn position_index(&self, id: uuid::Uuid) -> Option<usize> {
        self.positions.iter().position(|p| p.id == id)
    }

    /// Entry price of the most recently opened position still holding contracts.
    #[must_use]
    pub fn latest_open_entry(&self) -> Option<Decimal> {
        self.positions
            .iter()
            .filter(|p| matches!(p.state, PositionState::Open | PositionState::Closing))
            .filter_map(|p| p.open_time.zip(p.entry_price))
            .max_by_key(|(time, _)| *time)
            .map(|(_, entry)| entry)
    }

    /// Sum of contracts the exchange should report for this side.
    #[must_use]
    pub fn tracked_size(&self) -> Decimal {
        self.positions.iter().map(LogicalPosition::tracked_size).sum()
    }

    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.positions.iter().map(|p| p.unrealized_pnl(price)).sum()
    }

    /// Aggregate ROI over the operation's initial capital.
    #[must_use]
    pub fn roi_pct(&self, price: Decimal) -> Decimal {
        roi_pct(
            self.realized_pnl + self.unrealized_pnl(price),
            self.config.initial_capital,
        )
    }

    /// ROI locked in by closed positions.
    #[must_use]
    pub fn realized_roi_pct(&self) -> Decimal {
        roi_pct(self.realized_pnl, self.config.initial_capital)
    }

    /// ROI attributable to the current trend.
    #[must_use]
    pub fn trend_roi_pct(&self, price: Decimal) -> Decimal {
        let realized = self.realized_pnl - self.trend.realized_pnl_at_start;
        roi_pct(realized + self.unrealized_pnl(price), self.config.initial_capital)
    }

    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halt_reason.is_some()
    }

    /// Whether a signal may open a new position.
    #[must_use]
    pub fn accepts_openings(&self) -> bool {
        self.state == OperationState::Active && !self.is_halted()
    }

    /// Books a closed position and recycles its slot.
    ///
    /// Returns `true` when a paused operation has wound down to `STOPPED`.
    pub fn record_close(&mut self, index: usize, record: &ClosedPositionRecord) -> bool {
        self.realized_pnl += record.pnl;
        self.total_trades += 1;
        self.trend.trades_closed += 1;
        if let Some(slot) = self.positions.get_mut(index) {
            *slot = LogicalPosition::pending(self.side);
        }
        if self.state == OperationState::Paused && self.active_count() == 0 {
            self.state = OperationState::Stopped;
            return true;
        }
        false
    }

    /// Swaps in a new config between decisions.
    ///
    /// Capital already allocated to active positions is unaffected.
    ///
    /// # Errors
    /// Rejects invalid configs and slot counts below the active position count.
    pub fn apply_config(&mut self, config: OperationConfig) -> Result<(), ConfigError> {
        config.validate(self.side)?;
        let occupied = self.positions.len() - self.count_in(PositionState::Pending);
        if config.max_slots < occupied {
            return Err(ConfigError::invalid(
                format!("{}.max_slots", self.side),
                format!("{} is below the {occupied} occupied slots", config.max_slots),
            ));
        }

        self.positions.retain(|p| p.state != PositionState::Pending);
        while self.positions.len() < config.max_slots {
            self.positions.push(LogicalPosition::pending(self.side));
        }

        if self.trend.source.is_none() && self.trend.mode() == self.config.trend.mode {
            // Base trend follows the config; milestone trends keep their own
            self.trend.config = config.trend.clone();
        }
        self.config = config;
        Ok(())
    }

    pub fn set_trend(&mut self, config: TrendConfig, source: Option<MilestoneId>, now: DateTime<Utc>) {
        self.trend = Trend::start(config, now, source, self.realized_pnl);
    }

    /// Replaces the trend with a `NEUTRAL` one keeping the same risk parameters.
    pub fn revert_to_neutral(&mut self, now: DateTime<Utc>) {
        let config = self.trend.config.with_mode(TrendMode::Neutral);
        self.set_trend(config, None, now);
    }

    /// Halts trading on this side after a fatal error, without closing.
    pub fn halt(&mut self, reason: String) {
        self.state = OperationState::Stopped;
        self.halt_reason = Some(reason);
    }

    /// `PAUSED`/`STOPPED -> ACTIVE`, clearing any halt and recycling empty failed slots.
    pub fn resume(&mut self) {
        self.state = OperationState::Active;
        self.halt_reason = None;
        for pos in &mut self.positions {
            if pos.state == PositionState::Failed && pos.size.is_zero() {
                *pos = LogicalPosition::pending(self.side);
            }
        }
    }

    /// Restarts a stopped operation with a fresh base trend.
    pub fn restart(&mut self, now: DateTime<Utc>) {
        self.resume();
        self.roi_peak_pct = None;
        self.set_trend(self.config.trend.clone(), None, now);
    }
}

/// The two per-side operations, each behind its own exclusive lock.
#[derive(Debug)]
pub struct OperationBook {
    long: Mutex<Operation>,
    short: Mutex<Operation>,
}

impl OperationBook {
    #[must_use]
    pub fn new(long: Operation, short: Operation) -> Self {
        Self {
            long: Mutex::new(long),
            short: Mutex::new(short),
        }
    }

    #[must_use]
    pub const fn side(&self, side: Side) -> &Mutex<Operation> {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }
}
