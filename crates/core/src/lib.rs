pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod events;
pub mod journal;
pub mod milestone;
pub mod operation;
pub mod position;
pub mod position_sizing;
pub mod session;
pub mod traits;
pub mod trend;
pub mod types;
pub mod validation;

pub use config::{
    AppConfig, BiasConfig, DurationAction, ExitCondition, IndicatorConfig, OperationConfig,
    RoiTrailingConfig, SessionConfig, SignalConfig, TrendEndAction,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use error::{ConfigError, EngineError, ErrorKind, ExchangeError};
pub use events::{
    AccountPurpose, EventBus, OrderResult, OrderSide, OrderType, StandardOrder, StandardPosition,
    Tick, TradingEvent,
};
pub use journal::{Journal, SignalRecord};
pub use milestone::{Crossing, Milestone, MilestoneAction, MilestoneId, MilestoneSpec, MilestoneStatus, MilestoneTree};
pub use operation::{Operation, OperationBook};
pub use position::{ClosedPositionRecord, LogicalPosition, OpenFill, PositionExit, PositionState};
pub use session::Session;
pub use traits::ExchangePort;
pub use trend::{Trend, TrendConfig, TrendEnd, TrendLimits};
pub use types::{CloseReason, OperationState, Side, Sides, Signal, TrendMode};
