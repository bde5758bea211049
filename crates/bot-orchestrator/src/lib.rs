pub mod commands;
pub mod controller_actor;
pub mod controller_handle;
pub mod operation_engine;
pub mod session_controller;
pub mod status;

pub use commands::{ControllerCommand, ShutdownReport, TickMessage};
pub use controller_actor::ControllerActor;
pub use controller_handle::ControllerHandle;
pub use operation_engine::OperationEngine;
pub use session_controller::SessionController;
pub use status::{ControllerStatus, OrchestratorState, SideStatus};

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use trendline_core::{
    AppConfig, EventBus, ExchangePort, Journal, Operation, OperationBook, Side, Sides,
};
use trendline_execution::{PositionEngine, TimedExchange};

/// Validates `config`, builds both Operations, and starts the controller task.
///
/// `config_rx` delivers hot reloads; they are applied between ticks.
///
/// # Errors
/// Returns an error when `config` is invalid.
pub fn spawn(
    config: AppConfig,
    exchange: Arc<dyn ExchangePort>,
    journal: Journal,
    config_rx: Option<watch::Receiver<AppConfig>>,
) -> Result<(ControllerHandle, JoinHandle<()>)> {
    config.validate()?;
    let now = Utc::now();
    let long = Operation::new(Side::Long, config.long.clone(), now);
    let short = Operation::new(Side::Short, config.short.clone(), now);
    let initial = ControllerStatus {
        state: OrchestratorState::Idle,
        session_running: true,
        session_roi_pct: rust_decimal::Decimal::ZERO,
        stop_reason: None,
        ticks_processed: 0,
        last_price: None,
        last_tick_at: None,
        last_signal: None,
        bias: None,
        sides: Sides::new(
            SideStatus::from_operation(&long, None),
            SideStatus::from_operation(&short, None),
        ),
        updated_at: now,
    };

    let timeout = Duration::from_millis(config.session.exchange_timeout_ms);
    let positions = Arc::new(PositionEngine::new(
        Arc::new(OperationBook::new(long, short)),
        TimedExchange::new(exchange, timeout),
        journal,
        EventBus::default(),
        config.session.symbol.clone(),
    ));
    let operations = Arc::new(OperationEngine::new(positions.clone()));

    let (tick_tx, tick_rx) = mpsc::channel(config.session.tick_queue_capacity.max(1));
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (status_tx, status_rx) = watch::channel(initial);

    let actor = ControllerActor::new(
        config,
        config_rx,
        tick_rx,
        cmd_rx,
        positions,
        operations.clone(),
        status_tx,
        now,
    );
    let task = tokio::spawn(actor.run());
    let handle = ControllerHandle::new(tick_tx, cmd_tx, operations, status_rx);
    Ok((handle, task))
}
