pub mod paper;
pub mod position_engine;
pub mod reconciliation;
pub mod risk;
pub mod timed;

pub use paper::{PaperExchange, PaperExchangeConfig};
pub use position_engine::{PositionEngine, SignalOutcome, SkipReason};
pub use reconciliation::{ReconcileOutcome, SIZE_TOLERANCE};
pub use risk::{operation_exit, operation_roi_breach, position_trigger};
pub use timed::TimedExchange;
