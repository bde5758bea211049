use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::milestone::MilestoneId;
use crate::types::{CloseReason, OperationState, Side, Signal, TrendMode};

/// A single price update from the ticker source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    #[must_use]
    pub const fn new(price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self { price, timestamp }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Sub-account an exchange call is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountPurpose {
    Main,
    Longs,
    Shorts,
    Profit,
}

impl AccountPurpose {
    #[must_use]
    pub const fn for_side(side: Side) -> Self {
        match side {
            Side::Long => Self::Longs,
            Side::Short => Self::Shorts,
        }
    }
}

/// Exchange-agnostic order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub client_id: Option<String>,
}

impl StandardOrder {
    /// Market order that opens exposure on `side`.
    #[must_use]
    pub fn market_entry(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.entry_order_side(),
            position_side: side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
            client_id: None,
        }
    }

    /// Reduce-only market order that closes exposure on `side`.
    #[must_use]
    pub fn market_exit(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.exit_order_side(),
            position_side: side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: true,
            client_id: None,
        }
    }

    #[must_use]
    pub fn with_client_id(mut self, id: Uuid) -> Self {
        self.client_id = Some(id.to_string());
        self
    }
}

/// Exchange-agnostic view of a live position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardPosition {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub liquidation_price: Option<Decimal>,
}

/// Outcome of an order placement the exchange did answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderResult {
    Accepted {
        order_id: String,
        fill_price: Option<Decimal>,
        filled_size: Option<Decimal>,
    },
    Rejected {
        reason: String,
    },
}

impl OrderResult {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Events published by the engines for subscribers (status views, audit, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradingEvent {
    SignalGenerated {
        signal: Signal,
        price: Decimal,
        suppressed_by_bias: bool,
        timestamp: DateTime<Utc>,
    },
    PositionOpened {
        side: Side,
        id: Uuid,
        entry_price: Decimal,
        size: Decimal,
    },
    PositionClosed {
        side: Side,
        id: Uuid,
        exit_price: Decimal,
        pnl: Decimal,
        reason: CloseReason,
        estimated: bool,
    },
    OrderFailed {
        side: Side,
        message: String,
    },
    ReconciliationCorrection {
        side: Side,
        local_size: Decimal,
        exchange_size: Decimal,
        closed: usize,
    },
    MilestoneFired {
        side: Side,
        id: MilestoneId,
        price: Decimal,
    },
    TrendActivated {
        side: Side,
        mode: TrendMode,
    },
    TrendFinalized {
        side: Side,
        reason: String,
    },
    OperationStateChanged {
        side: Side,
        state: OperationState,
    },
    SideHalted {
        side: Side,
        reason: String,
    },
    SessionBreach {
        reason: CloseReason,
        roi_pct: Decimal,
    },
    ConfigApplied,
    ConfigRejected {
        side: Option<Side>,
        message: String,
    },
}

/// Broadcast fan-out for [`TradingEvent`]s. Emitting never blocks and never fails.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TradingEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TradingEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
