use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use trendline_core::{
    ClosedPositionRecord, CloseReason, EngineError, MilestoneId, MilestoneSpec, Operation,
    OperationConfig, OperationState, Side, Sides, Tick, TradingEvent,
};
use trendline_execution::{PositionEngine, ReconcileOutcome, SignalOutcome};
use uuid::Uuid;

use crate::commands::{ControllerCommand, ShutdownReport, TickMessage};
use crate::operation_engine::OperationEngine;
use crate::status::ControllerStatus;

/// Cloneable operator path into a running controller.
///
/// Ticks go through the actor's queue. Manual actions lock the affected side
/// directly, so they serialize with tick processing on that side only.
#[derive(Clone)]
pub struct ControllerHandle {
    tick_tx: mpsc::Sender<TickMessage>,
    cmd_tx: mpsc::Sender<ControllerCommand>,
    operations: Arc<OperationEngine>,
    status_rx: watch::Receiver<ControllerStatus>,
}

impl ControllerHandle {
    #[must_use]
    pub const fn new(
        tick_tx: mpsc::Sender<TickMessage>,
        cmd_tx: mpsc::Sender<ControllerCommand>,
        operations: Arc<OperationEngine>,
        status_rx: watch::Receiver<ControllerStatus>,
    ) -> Self {
        Self {
            tick_tx,
            cmd_tx,
            operations,
            status_rx,
        }
    }

    fn positions(&self) -> &PositionEngine {
        self.operations.positions()
    }

    /// Queues a price tick. Waits for room when the queue is full.
    ///
    /// # Errors
    /// Returns an error once the controller has shut down.
    pub async fn submit_tick(&self, tick: Tick) -> Result<()> {
        self.tick_tx.send(TickMessage::Tick(tick)).await?;
        Ok(())
    }

    /// Waits until every tick queued so far has been processed.
    ///
    /// # Errors
    /// Returns an error if the controller has shut down.
    pub async fn settle(&self) -> Result<ControllerStatus> {
        let (tx, rx) = oneshot::channel();
        self.tick_tx.send(TickMessage::Fence(tx)).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the command cannot be sent or the response cannot be received.
    pub async fn status(&self) -> Result<ControllerStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(ControllerCommand::GetStatus(tx)).await?;
        Ok(rx.await?)
    }

    /// Status as last published by the controller.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ControllerStatus> {
        self.status_rx.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.positions().events().subscribe()
    }

    pub async fn pause(&self, side: Side) -> OperationState {
        self.operations.pause(side).await
    }

    pub async fn resume(&self, side: Side) -> OperationState {
        self.operations.resume(side).await
    }

    /// # Errors
    /// Returns an error when the closeout fails fatally or no price is known.
    pub async fn stop(&self, side: Side) -> Result<Vec<ClosedPositionRecord>> {
        Ok(self.operations.stop(side).await?)
    }

    /// # Errors
    /// Returns an error when the side is stopped, halted or has no free slot.
    pub async fn manual_open(&self, side: Side) -> Result<SignalOutcome> {
        Ok(self.positions().manual_open_next_pending(side).await?)
    }

    /// # Errors
    /// Returns an error when a close fails fatally or no price is known.
    pub async fn close_all(&self, side: Side) -> Result<Vec<ClosedPositionRecord>> {
        Ok(self.positions().close_all(side, CloseReason::Manual).await?)
    }

    /// # Errors
    /// Returns an error for unknown or non-open positions.
    pub async fn close_position(
        &self,
        side: Side,
        id: Uuid,
    ) -> Result<Option<ClosedPositionRecord>> {
        Ok(self
            .positions()
            .close_position(side, id, CloseReason::Manual)
            .await?)
    }

    /// # Errors
    /// Returns an error when the parent milestone is unknown or resolved.
    pub async fn add_milestone(&self, side: Side, spec: MilestoneSpec) -> Result<MilestoneId> {
        Ok(self.operations.add_milestone(side, spec).await?)
    }

    /// # Errors
    /// Returns an error for unknown milestones.
    pub async fn cancel_milestone(&self, side: Side, id: MilestoneId) -> Result<()> {
        Ok(self.operations.cancel_milestone(side, id).await?)
    }

    /// # Errors
    /// Returns an error when the config is rejected.
    pub async fn update_operation(
        &self,
        side: Side,
        config: OperationConfig,
    ) -> Result<OperationState> {
        Ok(self
            .operations
            .create_or_update_operation(side, config)
            .await?)
    }

    pub async fn get_operation(&self, side: Side) -> Operation {
        self.operations.get_operation(side).await
    }

    /// Reconciles both sides now instead of waiting for the heartbeat.
    pub async fn sync_now(&self) -> Sides<Result<ReconcileOutcome, EngineError>> {
        self.positions().sync_physical_positions().await
    }

    /// Drains queued ticks, closes positions, and stops the controller.
    ///
    /// # Errors
    /// Returns an error if the controller is already gone.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(ControllerCommand::Shutdown(tx)).await?;
        Ok(rx.await?)
    }
}
