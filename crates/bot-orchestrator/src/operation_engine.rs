//! Per-side lifecycle, milestone evaluation and trend finalization.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use trendline_core::{
    ClosedPositionRecord, CloseReason, EngineError, MilestoneAction, MilestoneId, MilestoneSpec,
    Operation, OperationConfig, OperationState, Side, Sides, TradingEvent, Trend, TrendEnd,
    TrendEndAction, TrendMode,
};
use trendline_execution::PositionEngine;

pub struct OperationEngine {
    positions: Arc<PositionEngine>,
}

impl OperationEngine {
    #[must_use]
    pub const fn new(positions: Arc<PositionEngine>) -> Self {
        Self { positions }
    }

    #[must_use]
    pub const fn positions(&self) -> &Arc<PositionEngine> {
        &self.positions
    }

    fn emit(&self, event: TradingEvent) {
        self.positions.events().emit(event);
    }

    /// Applies `config` to the side; a stopped Operation is restarted.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] when the config is rejected. The
    /// previous config stays in effect.
    pub async fn create_or_update_operation(
        &self,
        side: Side,
        config: OperationConfig,
    ) -> Result<OperationState, EngineError> {
        let mut op = self.positions.book().side(side).lock().await;
        let enabled = config.enabled;
        op.apply_config(config)?;
        if op.state == OperationState::Stopped && enabled {
            op.restart(Utc::now());
            tracing::info!(side = %side, "Operation restarted");
            self.emit(TradingEvent::OperationStateChanged {
                side,
                state: op.state,
            });
        } else {
            tracing::info!(side = %side, state = %op.state, "Operation config updated");
        }
        Ok(op.state)
    }

    /// Swaps the side's config without touching its lifecycle state.
    ///
    /// # Errors
    /// See [`OperationEngine::create_or_update_operation`].
    pub async fn apply_config(&self, side: Side, config: OperationConfig) -> Result<(), EngineError> {
        let mut op = self.positions.book().side(side).lock().await;
        op.apply_config(config)?;
        Ok(())
    }

    /// Snapshot of the side's Operation.
    pub async fn get_operation(&self, side: Side) -> Operation {
        self.positions.book().side(side).lock().await.clone()
    }

    /// Stops new openings; existing positions keep running under their stops.
    /// The side winds down to `STOPPED` once its last position closes.
    pub async fn pause(&self, side: Side) -> OperationState {
        let mut op = self.positions.book().side(side).lock().await;
        if op.state != OperationState::Active {
            tracing::warn!(side = %side, state = %op.state, "Operation not active, ignoring pause");
            return op.state;
        }
        op.state = OperationState::Paused;
        tracing::info!(side = %side, active = op.active_count(), "Operation paused");
        self.emit(TradingEvent::OperationStateChanged {
            side,
            state: op.state,
        });
        op.state
    }

    /// Back to `ACTIVE`, clearing any halt.
    pub async fn resume(&self, side: Side) -> OperationState {
        let mut op = self.positions.book().side(side).lock().await;
        if op.state == OperationState::Active && !op.is_halted() {
            tracing::warn!(side = %side, "Operation already active, ignoring resume");
            return op.state;
        }
        if let Some(reason) = &op.halt_reason {
            tracing::info!(side = %side, halt_reason = %reason, "Clearing halt");
        }
        op.resume();
        tracing::info!(side = %side, "Operation resumed");
        self.emit(TradingEvent::OperationStateChanged {
            side,
            state: op.state,
        });
        op.state
    }

    /// Closes every open position and moves the side to `STOPPED`.
    ///
    /// # Errors
    /// Fails when no price is known or a close hits a fatal exchange error.
    pub async fn stop(&self, side: Side) -> Result<Vec<ClosedPositionRecord>, EngineError> {
        let mut op = self.positions.book().side(side).lock().await;
        let price = self.positions.price_for(&op).await?;
        let closed = self
            .positions
            .close_all_on(&mut op, CloseReason::OperationStopped, price, Utc::now())
            .await?;
        op.state = OperationState::Stopped;
        tracing::info!(side = %side, closed = closed.len(), "Operation stopped");
        self.emit(TradingEvent::OperationStateChanged {
            side,
            state: OperationState::Stopped,
        });
        Ok(closed)
    }

    /// # Errors
    /// Rejects unknown or already resolved parents.
    pub async fn add_milestone(
        &self,
        side: Side,
        spec: MilestoneSpec,
    ) -> Result<MilestoneId, EngineError> {
        let mut op = self.positions.book().side(side).lock().await;
        let id = op.milestones.add(spec, Utc::now())?;
        tracing::info!(side = %side, id = %id, "Milestone added");
        Ok(id)
    }

    /// Cancels a milestone and everything below it.
    ///
    /// # Errors
    /// Returns [`EngineError::UnknownMilestone`] for unknown ids.
    pub async fn cancel_milestone(&self, side: Side, id: MilestoneId) -> Result<(), EngineError> {
        let mut op = self.positions.book().side(side).lock().await;
        op.milestones.cancel(id)?;
        tracing::info!(side = %side, id = %id, "Milestone cancelled");
        Ok(())
    }

    /// Evaluates milestones on both sides at `price`.
    pub async fn evaluate_milestones(
        &self,
        price: Decimal,
    ) -> Sides<Result<Option<Trend>, EngineError>> {
        let now = Utc::now();
        let (long, short) = tokio::join!(
            async {
                let mut op = self.positions.book().side(Side::Long).lock().await;
                self.evaluate_milestones_on(&mut op, price, now).await
            },
            async {
                let mut op = self.positions.book().side(Side::Short).lock().await;
                self.evaluate_milestones_on(&mut op, price, now).await
            }
        );
        Sides::new(long, short)
    }

    /// Fires at most one eligible milestone and returns the Trend it activated.
    ///
    /// # Errors
    /// Fails when a `CloseAll` milestone hits a fatal exchange error.
    pub async fn evaluate_milestones_on(
        &self,
        op: &mut Operation,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Trend>, EngineError> {
        let Some(id) = op.milestones.next_trigger(price) else {
            return Ok(None);
        };
        let side = op.side;
        let milestone = op.milestones.fire(id, now)?.clone();
        tracing::info!(
            side = %side,
            id = %id,
            threshold = %milestone.threshold,
            price = %price,
            "Milestone fired"
        );
        self.emit(TradingEvent::MilestoneFired { side, id, price });

        match milestone.action {
            MilestoneAction::ActivateTrend(config) => {
                op.set_trend(config, Some(id), now);
            }
            MilestoneAction::CloseAll => {
                self.positions
                    .close_all_on(op, CloseReason::Milestone, price, now)
                    .await?;
                op.revert_to_neutral(now);
            }
        }
        tracing::info!(side = %side, mode = %op.trend.mode(), "Trend activated");
        self.emit(TradingEvent::TrendActivated {
            side,
            mode: op.trend.mode(),
        });
        Ok(Some(op.trend.clone()))
    }

    /// Ends the active trend once it hits one of its bounds, then applies the
    /// side's `trend_end_action`.
    ///
    /// # Errors
    /// Fails when a `Stop` closeout hits a fatal exchange error.
    pub async fn check_trend_limits_on(
        &self,
        op: &mut Operation,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<TrendEnd>, EngineError> {
        if op.trend.mode() == TrendMode::Neutral {
            return Ok(None);
        }
        let Some(end) = op.trend.finalization(now, op.trend_roi_pct(price)) else {
            return Ok(None);
        };
        let side = op.side;
        let action = op.config.trend_end_action;
        tracing::info!(side = %side, mode = %op.trend.mode(), reason = %end, action = ?action, "Trend finalized");
        self.emit(TradingEvent::TrendFinalized {
            side,
            reason: end.to_string(),
        });

        match action {
            TrendEndAction::Neutral => op.revert_to_neutral(now),
            TrendEndAction::Pause => {
                // resumes under a fresh base trend
                op.set_trend(op.config.trend.clone(), None, now);
                if op.state == OperationState::Active {
                    op.state = OperationState::Paused;
                    self.emit(TradingEvent::OperationStateChanged {
                        side,
                        state: OperationState::Paused,
                    });
                }
            }
            TrendEndAction::Stop => {
                op.revert_to_neutral(now);
                self.positions
                    .close_all_on(op, CloseReason::TrendEnd, price, now)
                    .await?;
                op.state = OperationState::Stopped;
                self.emit(TradingEvent::OperationStateChanged {
                    side,
                    state: OperationState::Stopped,
                });
            }
        }
        Ok(Some(end))
    }
}
