pub mod indicators;
pub mod signal_engine;
pub mod ut_bot;

pub use indicators::{IndicatorEngine, IndicatorSnapshot};
pub use signal_engine::{GeneratedSignal, SignalEngine, SignalReason};
pub use ut_bot::{Bias, TrendBias};
