use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use trendline_core::{Sides, Tick};

use crate::status::ControllerStatus;

/// Messages on the tick queue, handled strictly in arrival order.
#[derive(Debug)]
pub enum TickMessage {
    Tick(Tick),
    /// Answered once every message queued before it has been handled.
    Fence(oneshot::Sender<ControllerStatus>),
}

#[derive(Debug)]
pub enum ControllerCommand {
    GetStatus(oneshot::Sender<ControllerStatus>),
    Shutdown(oneshot::Sender<ShutdownReport>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Ticks that were still queued when shutdown began.
    pub ticks_drained: usize,
    pub closed: Sides<usize>,
    pub errors: Vec<String>,
}
