//! Small shared vocabulary types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::events::OrderSide;

/// Market side an Operation trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub const ALL: [Self; 2] = [Self::Long, Self::Short];

    /// Order side that opens exposure on this market side.
    #[must_use]
    pub const fn entry_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces exposure on this market side.
    #[must_use]
    pub const fn exit_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }

    /// The directional signal that opens positions on this side.
    #[must_use]
    pub const fn opening_signal(self) -> Signal {
        match self {
            Self::Long => Signal::Buy,
            Self::Short => Signal::Sell,
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Discrete trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Market side a directional signal opens positions on.
    #[must_use]
    pub const fn target_side(self) -> Option<Side> {
        match self {
            Self::Buy => Some(Side::Long),
            Self::Sell => Some(Side::Short),
            Self::Hold => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Operating mode of a Trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendMode {
    LongOnly,
    ShortOnly,
    Both,
    #[default]
    Neutral,
}

impl TrendMode {
    /// Whether new positions may be opened on `side` under this mode.
    #[must_use]
    pub const fn permits(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Self::Both, _) | (Self::LongOnly, Side::Long) | (Self::ShortOnly, Side::Short)
        )
    }
}

impl fmt::Display for TrendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LongOnly => write!(f, "LONG_ONLY"),
            Self::ShortOnly => write!(f, "SHORT_ONLY"),
            Self::Both => write!(f, "BOTH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Lifecycle state of an Operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Active,
    Paused,
    Stopped,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Reason a logical position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TrailingStop,
    OperationSlRoi,
    OperationTpRoi,
    OperationTrailingRoi,
    ExitCondition,
    TrendEnd,
    SessionSlRoi,
    SessionTpRoi,
    SessionDuration,
    Milestone,
    BiasFlip,
    Reconciliation,
    OperationStopped,
    Manual,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::OperationSlRoi => write!(f, "operation_sl_roi"),
            Self::OperationTpRoi => write!(f, "operation_tp_roi"),
            Self::OperationTrailingRoi => write!(f, "operation_trailing_roi"),
            Self::ExitCondition => write!(f, "exit_condition"),
            Self::TrendEnd => write!(f, "trend_end"),
            Self::SessionSlRoi => write!(f, "session_sl_roi"),
            Self::SessionTpRoi => write!(f, "session_tp_roi"),
            Self::SessionDuration => write!(f, "session_duration"),
            Self::Milestone => write!(f, "milestone"),
            Self::BiasFlip => write!(f, "bias_flip"),
            Self::Reconciliation => write!(f, "reconciliation"),
            Self::OperationStopped => write!(f, "operation_stopped"),
            Self::Manual => write!(f, "manual"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Pair of values, one per market side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sides<T> {
    pub long: T,
    pub short: T,
}

impl<T> Sides<T> {
    #[must_use]
    pub const fn new(long: T, short: T) -> Self {
        Self { long, short }
    }

    #[must_use]
    pub const fn get(&self, side: Side) -> &T {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Long => &mut self.long,
            Side::Short => &mut self.short,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_mode_permits_matching_sides() {
        assert!(TrendMode::Both.permits(Side::Long));
        assert!(TrendMode::Both.permits(Side::Short));
        assert!(TrendMode::LongOnly.permits(Side::Long));
        assert!(!TrendMode::LongOnly.permits(Side::Short));
        assert!(!TrendMode::ShortOnly.permits(Side::Long));
        assert!(!TrendMode::Neutral.permits(Side::Long));
        assert!(!TrendMode::Neutral.permits(Side::Short));
    }

    #[test]
    fn close_reason_serializes_snake_case() {
        let json = serde_json::to_string(&CloseReason::TrailingStop).unwrap();
        assert_eq!(json, "\"trailing_stop\"");
        assert_eq!(CloseReason::TrailingStop.to_string(), "trailing_stop");
        assert_eq!(CloseReason::SessionTpRoi.to_string(), "session_tp_roi");
    }

    #[test]
    fn side_order_mapping() {
        assert_eq!(Side::Long.entry_order_side(), OrderSide::Buy);
        assert_eq!(Side::Short.entry_order_side(), OrderSide::Sell);
        assert_eq!(Side::Long.exit_order_side(), OrderSide::Sell);
        assert_eq!(Signal::Sell.target_side(), Some(Side::Short));
        assert_eq!(Signal::Hold.target_side(), None);
    }
}
