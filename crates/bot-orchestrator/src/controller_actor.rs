use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use trendline_core::{
    AppConfig, CloseReason, EngineError, ExchangePort, OperationState, Side, Sides, Signal,
    SignalRecord, Tick, TradingEvent,
};
use trendline_execution::PositionEngine;
use trendline_strategy::{Bias, GeneratedSignal, IndicatorEngine, SignalEngine, TrendBias};

use crate::commands::{ControllerCommand, ShutdownReport, TickMessage};
use crate::operation_engine::OperationEngine;
use crate::session_controller::SessionController;
use crate::status::{ControllerStatus, OrchestratorState, SideStatus};

/// The single task that turns ticks into trading decisions.
pub struct ControllerActor {
    config: AppConfig,
    config_rx: Option<watch::Receiver<AppConfig>>,
    tick_rx: mpsc::Receiver<TickMessage>,
    cmd_rx: mpsc::Receiver<ControllerCommand>,
    positions: Arc<PositionEngine>,
    operations: Arc<OperationEngine>,
    session: SessionController,
    indicators: IndicatorEngine,
    signals: SignalEngine,
    state: OrchestratorState,
    status_tx: watch::Sender<ControllerStatus>,
    last_reconcile: Option<DateTime<Utc>>,
    ticks_processed: u64,
    last_tick: Option<Tick>,
    last_signal: Option<Signal>,
}

impl ControllerActor {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: AppConfig,
        config_rx: Option<watch::Receiver<AppConfig>>,
        tick_rx: mpsc::Receiver<TickMessage>,
        cmd_rx: mpsc::Receiver<ControllerCommand>,
        positions: Arc<PositionEngine>,
        operations: Arc<OperationEngine>,
        status_tx: watch::Sender<ControllerStatus>,
        now: DateTime<Utc>,
    ) -> Self {
        let session = SessionController::new(&config.session, positions.clone(), now);
        let indicators = IndicatorEngine::new(config.indicators.clone());
        let signals = SignalEngine::new(config.signal.clone(), &config.bias);
        Self {
            config,
            config_rx,
            tick_rx,
            cmd_rx,
            positions,
            operations,
            session,
            indicators,
            signals,
            state: OrchestratorState::Idle,
            status_tx,
            last_reconcile: None,
            ticks_processed: 0,
            last_tick: None,
            last_signal: None,
        }
    }

    /// Runs until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(
            symbol = %self.config.session.symbol,
            exchange = self.positions.exchange().name(),
            "Controller starting"
        );
        self.configure_leverage().await;

        let period = Duration::from_secs(self.config.session.heartbeat_interval_secs.max(1));
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ControllerCommand::GetStatus(tx)) => {
                        let _ = tx.send(self.status().await);
                    }
                    Some(ControllerCommand::Shutdown(tx)) => {
                        let report = self.shutdown().await;
                        let _ = tx.send(report);
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                msg = self.tick_rx.recv() => match msg {
                    Some(msg) => self.handle_tick_message(msg).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = heartbeat.tick() => self.heartbeat().await,
            }
        }
        tracing::info!("Controller stopped");
    }

    async fn configure_leverage(&self) {
        let exchange = self.positions.exchange();
        for side in Side::ALL {
            let leverage = self.config.operation(side).leverage;
            if let Err(e) = exchange
                .set_leverage(&self.config.session.symbol, side, leverage)
                .await
            {
                tracing::warn!(side = %side, leverage = %leverage, error = %e, "Failed to set leverage");
            }
        }
    }

    async fn handle_tick_message(&mut self, msg: TickMessage) {
        match msg {
            TickMessage::Tick(tick) => self.process_tick(tick).await,
            TickMessage::Fence(tx) => {
                let _ = tx.send(self.status().await);
            }
        }
    }

    async fn heartbeat(&mut self) {
        if self.session.is_running() || self.has_active_positions().await {
            self.reconcile().await;
        }
        self.publish_status().await;
    }

    async fn has_active_positions(&self) -> bool {
        for side in Side::ALL {
            if self.positions.book().side(side).lock().await.active_count() > 0 {
                return true;
            }
        }
        false
    }

    async fn process_tick(&mut self, tick: Tick) {
        self.state = OrchestratorState::Processing;
        self.apply_pending_config().await;

        let now = tick.timestamp;
        if !self.session.is_running() {
            self.wind_down(tick).await;
            return;
        }

        if self.reconcile_due(now) {
            self.reconcile().await;
            self.last_reconcile = Some(now);
        }

        let snapshot = self.indicators.ingest(tick.price, now);
        let generated = self.signals.generate(&snapshot);
        self.positions.journal().log_signal(&SignalRecord {
            timestamp: now,
            side: generated.signal.target_side(),
            signal: generated.signal,
            price: tick.price,
            indicators: snapshot.to_json(),
            suppressed_by_bias: generated.suppressed_by_bias,
        });
        if generated.signal != Signal::Hold || generated.suppressed_by_bias {
            tracing::debug!(
                signal = %generated.signal,
                reason = ?generated.reason,
                price = %tick.price,
                "Signal generated"
            );
            self.positions.events().emit(TradingEvent::SignalGenerated {
                signal: generated.signal,
                price: tick.price,
                suppressed_by_bias: generated.suppressed_by_bias,
                timestamp: now,
            });
        }

        let (long, short) = tokio::join!(
            self.process_side(Side::Long, tick.price, now, &generated),
            self.process_side(Side::Short, tick.price, now, &generated)
        );
        for (side, result) in [(Side::Long, long), (Side::Short, short)] {
            if let Err(e) = result {
                tracing::warn!(side = %side, error = %e, "Tick processing failed for side");
            }
        }

        self.session.check(tick.price, now).await;
        self.finish_tick(tick, Some(generated.signal)).await;
    }

    /// Tick handling after the session stopped: no signals, but leftover
    /// positions keep their stops and failed closes are retried.
    async fn wind_down(&mut self, tick: Tick) {
        let now = tick.timestamp;
        if !self.has_active_positions().await {
            tracing::debug!(price = %tick.price, "Session stopped, ignoring tick");
            self.finish_tick(tick, None).await;
            return;
        }
        if self.reconcile_due(now) {
            self.reconcile().await;
            self.last_reconcile = Some(now);
        }

        let reason = self
            .session
            .session()
            .stop_reason
            .unwrap_or(CloseReason::OperationStopped);
        let (long, short) = tokio::join!(
            self.wind_down_side(Side::Long, tick.price, now, reason),
            self.wind_down_side(Side::Short, tick.price, now, reason)
        );
        for (side, result) in [(Side::Long, long), (Side::Short, short)] {
            if let Err(e) = result {
                tracing::warn!(side = %side, error = %e, "Closeout retry failed for side");
            }
        }
        self.finish_tick(tick, None).await;
    }

    async fn wind_down_side(
        &self,
        side: Side,
        price: Decimal,
        now: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<(), EngineError> {
        let mut op = self.positions.book().side(side).lock().await;
        op.last_price = Some(price);
        if op.is_halted() || op.active_count() == 0 {
            return Ok(());
        }
        if op.state == OperationState::Stopped {
            tracing::info!(side = %side, active = op.active_count(), "Retrying session closeout");
            self.positions.close_all_on(&mut op, reason, price, now).await?;
        }
        self.positions.check_risk_on(&mut op, price, now).await?;
        Ok(())
    }

    async fn finish_tick(&mut self, tick: Tick, signal: Option<Signal>) {
        self.ticks_processed += 1;
        self.last_tick = Some(tick);
        if signal.is_some() {
            self.last_signal = signal;
        }
        self.state = OrchestratorState::Idle;
        self.publish_status().await;
    }

    /// Milestones, trend bounds, bias-flip closes, signal dispatch, then risk.
    async fn process_side(
        &self,
        side: Side,
        price: Decimal,
        now: DateTime<Utc>,
        generated: &GeneratedSignal,
    ) -> Result<(), EngineError> {
        let mut op = self.positions.book().side(side).lock().await;
        op.last_price = Some(price);
        if op.is_halted() {
            return Ok(());
        }

        self.operations
            .evaluate_milestones_on(&mut op, price, now)
            .await?;
        self.operations
            .check_trend_limits_on(&mut op, price, now)
            .await?;

        if let Some(flip) = generated.bias_flip {
            let opposed = match flip {
                Bias::Bullish => Side::Short,
                Bias::Bearish => Side::Long,
            };
            if self.config.bias.close_on_flip && opposed == side && op.active_count() > 0 {
                tracing::info!(side = %side, bias = ?flip, "Bias flipped against side, closing");
                self.positions
                    .close_all_on(&mut op, CloseReason::BiasFlip, price, now)
                    .await?;
            }
        }

        if op.state == OperationState::Stopped && op.active_count() > 0 {
            // a stop whose closes failed earlier
            self.positions
                .close_all_on(&mut op, CloseReason::OperationStopped, price, now)
                .await?;
        }

        self.positions
            .handle_signal_on(&mut op, generated.signal, price, now)
            .await?;
        self.positions.check_risk_on(&mut op, price, now).await?;
        Ok(())
    }

    fn reconcile_due(&self, now: DateTime<Utc>) -> bool {
        let interval = i64::try_from(self.config.session.heartbeat_interval_secs).unwrap_or(i64::MAX);
        self.last_reconcile
            .map_or(true, |last| (now - last).num_seconds() >= interval)
    }

    async fn reconcile(&self) {
        let outcomes = self.positions.sync_physical_positions().await;
        for (side, outcome) in [(Side::Long, outcomes.long), (Side::Short, outcomes.short)] {
            match outcome {
                Ok(outcome) => tracing::debug!(side = %side, outcome = ?outcome, "Reconciled"),
                Err(e) => tracing::warn!(side = %side, error = %e, "Reconciliation failed"),
            }
        }
    }

    async fn apply_pending_config(&mut self) {
        let Some(rx) = self.config_rx.as_mut() else {
            return;
        };
        if !rx.has_changed().unwrap_or(false) {
            return;
        }
        let new_config = rx.borrow_and_update().clone();
        self.apply_config(new_config).await;
    }

    /// Swaps in a validated config between ticks. A side whose config is
    /// rejected keeps its previous one.
    async fn apply_config(&mut self, mut new_config: AppConfig) {
        if let Err(e) = new_config.validate() {
            tracing::error!(error = %e, "Rejected config, keeping previous config");
            self.positions.events().emit(TradingEvent::ConfigRejected {
                side: None,
                message: e.to_string(),
            });
            return;
        }

        if new_config.indicators != self.config.indicators {
            tracing::info!("Indicator windows changed, restarting warm-up");
            self.indicators = IndicatorEngine::new(new_config.indicators.clone());
        }
        self.signals
            .apply_config(new_config.signal.clone(), &new_config.bias);
        self.session.apply_config(&new_config.session);

        for side in Side::ALL {
            // operator updates bypass `self.config`
            let previous = self.operations.get_operation(side).await.config;
            let candidate = new_config.operation(side).clone();
            if candidate == previous {
                continue;
            }
            if let Err(e) = self.operations.apply_config(side, candidate).await {
                tracing::error!(side = %side, error = %e, "Rejected operation config");
                self.positions.events().emit(TradingEvent::ConfigRejected {
                    side: Some(side),
                    message: e.to_string(),
                });
                match side {
                    Side::Long => new_config.long = previous,
                    Side::Short => new_config.short = previous,
                }
            }
        }

        self.config = new_config;
        tracing::info!("Config applied");
        self.positions.events().emit(TradingEvent::ConfigApplied);
    }

    async fn shutdown(&mut self) -> ShutdownReport {
        tracing::info!("Controller shutting down");
        self.tick_rx.close();
        let mut report = ShutdownReport::default();
        while let Some(msg) = self.tick_rx.recv().await {
            if matches!(msg, TickMessage::Tick(_)) {
                report.ticks_drained += 1;
            }
            self.handle_tick_message(msg).await;
        }

        for side in Side::ALL {
            let op = self.positions.book().side(side).lock().await;
            self.positions
                .journal()
                .log_open_positions(op.positions.iter().filter(|p| p.is_active()));
        }

        if self.config.session.close_on_shutdown {
            let (long, short) = tokio::join!(
                self.positions.close_all(Side::Long, CloseReason::Shutdown),
                self.positions.close_all(Side::Short, CloseReason::Shutdown)
            );
            for (side, result) in [(Side::Long, long), (Side::Short, short)] {
                match result {
                    Ok(closed) => *report.closed.get_mut(side) = closed.len(),
                    Err(e) => {
                        tracing::error!(side = %side, error = %e, "Shutdown closeout failed");
                        report.errors.push(format!("{side}: {e}"));
                    }
                }
            }
        }

        self.positions.journal().flush().await;
        self.state = OrchestratorState::Idle;
        self.publish_status().await;
        tracing::info!(
            ticks_drained = report.ticks_drained,
            closed_long = report.closed.long,
            closed_short = report.closed.short,
            "Shutdown complete"
        );
        report
    }

    async fn status(&self) -> ControllerStatus {
        let price = self.last_tick.map(|t| t.price);
        let long = {
            let op = self.positions.book().side(Side::Long).lock().await;
            SideStatus::from_operation(&op, price)
        };
        let short = {
            let op = self.positions.book().side(Side::Short).lock().await;
            SideStatus::from_operation(&op, price)
        };
        let session = self.session.session();
        ControllerStatus {
            state: self.state,
            session_running: session.running,
            session_roi_pct: session.last_roi_pct,
            stop_reason: session.stop_reason,
            ticks_processed: self.ticks_processed,
            last_price: price,
            last_tick_at: self.last_tick.map(|t| t.timestamp),
            last_signal: self.last_signal,
            bias: self.signals.bias().and_then(TrendBias::current),
            sides: Sides::new(long, short),
            updated_at: Utc::now(),
        }
    }

    async fn publish_status(&self) {
        let status = self.status().await;
        // No receivers is fine
        let _ = self.status_tx.send(status);
    }
}
