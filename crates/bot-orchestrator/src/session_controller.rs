//! Global ROI breakers across both Operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use trendline_core::position_sizing::roi_pct;
use trendline_core::{
    CloseReason, DurationAction, OperationState, Session, SessionConfig, Side, TradingEvent,
};
use trendline_execution::PositionEngine;

pub struct SessionController {
    session: Session,
    positions: Arc<PositionEngine>,
}

impl SessionController {
    #[must_use]
    pub fn new(config: &SessionConfig, positions: Arc<PositionEngine>, now: DateTime<Utc>) -> Self {
        Self {
            session: Session::new(config, now),
            positions,
        }
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.session.running
    }

    pub fn apply_config(&mut self, config: &SessionConfig) {
        self.session.apply_config(config);
    }

    /// Recomputes session ROI at `price` and trips the breakers.
    ///
    /// Returns the reason the session stopped on this call, if it did.
    pub async fn check(&mut self, price: Decimal, now: DateTime<Utc>) -> Option<CloseReason> {
        if !self.session.running {
            return None;
        }

        let roi = {
            let long = self.positions.book().side(Side::Long).lock().await;
            let short = self.positions.book().side(Side::Short).lock().await;
            let realized = long.realized_pnl + short.realized_pnl;
            let unrealized = long.unrealized_pnl(price) + short.unrealized_pnl(price);
            let capital = long.initial_capital() + short.initial_capital();
            self.session.realized_pnl = realized;
            roi_pct(realized + unrealized, capital)
        };
        self.session.last_roi_pct = roi;

        if let Some(reason) = self.session.breach(roi) {
            tracing::warn!(roi_pct = %roi, reason = %reason, "Session ROI limit reached");
            self.stop_all(reason, roi, price, now).await;
            return Some(reason);
        }

        if !self.session.duration_elapsed && self.session.duration_reached(now) {
            self.session.duration_elapsed = true;
            match self.session.duration_action {
                DurationAction::Neutral => {
                    tracing::info!("Session duration reached, reverting both sides to neutral");
                    for side in Side::ALL {
                        let mut op = self.positions.book().side(side).lock().await;
                        op.revert_to_neutral(now);
                        self.positions.events().emit(TradingEvent::TrendFinalized {
                            side,
                            reason: "session duration reached".to_string(),
                        });
                    }
                }
                DurationAction::Stop => {
                    tracing::warn!("Session duration reached, stopping");
                    self.stop_all(CloseReason::SessionDuration, roi, price, now)
                        .await;
                    return Some(CloseReason::SessionDuration);
                }
            }
        }
        None
    }

    /// Closes both sides and stops them. A failure on one side does not
    /// prevent the other side's closeout.
    async fn stop_all(&mut self, reason: CloseReason, roi: Decimal, price: Decimal, now: DateTime<Utc>) {
        for side in Side::ALL {
            let mut op = self.positions.book().side(side).lock().await;
            match self.positions.close_all_on(&mut op, reason, price, now).await {
                Ok(closed) => {
                    tracing::info!(side = %side, closed = closed.len(), "Side closed by session breaker");
                }
                Err(e) => {
                    tracing::error!(side = %side, error = %e, "Session closeout failed");
                }
            }
            op.state = OperationState::Stopped;
            self.positions.events().emit(TradingEvent::OperationStateChanged {
                side,
                state: OperationState::Stopped,
            });
        }
        self.session.running = false;
        self.session.stop_reason = Some(reason);
        self.positions.events().emit(TradingEvent::SessionBreach {
            reason,
            roi_pct: roi,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use trendline_core::{EventBus, Journal, Operation, OperationBook, OperationConfig, TrendMode};
    use trendline_execution::{PaperExchange, TimedExchange};

    fn setup(config: &SessionConfig) -> (Arc<PaperExchange>, SessionController) {
        let paper = Arc::new(PaperExchange::new());
        paper.set_price(dec!(100));
        let now = Utc::now();
        let book = Arc::new(OperationBook::new(
            Operation::new(Side::Long, OperationConfig::default(), now),
            Operation::new(Side::Short, OperationConfig::default(), now),
        ));
        let positions = Arc::new(PositionEngine::new(
            book,
            TimedExchange::new(paper.clone(), Duration::from_secs(1)),
            Journal::disabled(),
            EventBus::default(),
            "BTCUSDT",
        ));
        (paper, SessionController::new(config, positions, now))
    }

    #[tokio::test]
    async fn stop_loss_breach_closes_and_stops_both_sides() {
        let config = SessionConfig {
            sl_roi_pct: dec!(5),
            ..SessionConfig::default()
        };
        let (paper, mut controller) = setup(&config);
        let positions = controller.positions.clone();
        positions.manual_open_next_pending(Side::Long).await.unwrap();
        positions.manual_open_next_pending(Side::Long).await.unwrap();

        // two 0.1 longs down 3 each over 10 capital: -6%
        paper.set_price(dec!(97));
        let reason = controller.check(dec!(97), Utc::now()).await;
        assert_eq!(reason, Some(CloseReason::SessionSlRoi));
        assert!(!controller.is_running());

        for side in Side::ALL {
            let op = positions.book().side(side).lock().await;
            assert_eq!(op.state, OperationState::Stopped);
            assert_eq!(op.active_count(), 0);
        }
        assert_eq!(controller.check(dec!(50), Utc::now()).await, None);
    }

    #[tokio::test]
    async fn roi_inside_band_keeps_running() {
        let (_paper, mut controller) = setup(&SessionConfig::default());
        assert_eq!(controller.check(dec!(100), Utc::now()).await, None);
        assert!(controller.is_running());
        assert_eq!(controller.session().last_roi_pct, dec!(0));
    }

    #[tokio::test]
    async fn duration_limit_neutralizes_once() {
        let config = SessionConfig {
            max_duration_minutes: Some(30),
            ..SessionConfig::default()
        };
        let (_paper, mut controller) = setup(&config);
        let later = controller.session().started_at + chrono::Duration::minutes(31);

        assert_eq!(controller.check(dec!(100), later).await, None);
        assert!(controller.is_running());
        assert!(controller.session().duration_elapsed);
        for side in Side::ALL {
            let op = controller.positions.book().side(side).lock().await;
            assert_eq!(op.trend.mode(), TrendMode::Neutral);
        }
    }

    #[tokio::test]
    async fn duration_stop_acts_as_breach() {
        let config = SessionConfig {
            max_duration_minutes: Some(30),
            duration_action: DurationAction::Stop,
            ..SessionConfig::default()
        };
        let (_paper, mut controller) = setup(&config);
        let later = controller.session().started_at + chrono::Duration::minutes(30);

        assert_eq!(
            controller.check(dec!(100), later).await,
            Some(CloseReason::SessionDuration)
        );
        assert_eq!(controller.session().stop_reason, Some(CloseReason::SessionDuration));
    }
}
