//! Reconciliation of logical positions against the exchange's physical position.
//!
//! The exchange is the source of truth for size. A side whose exchange size
//! dropped below the tracked size gets its newest positions force-closed at
//! an estimated price. Surplus exchange size is never adopted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use trendline_core::{
    CloseReason, EngineError, ExchangePort, Operation, PositionExit, PositionState, Side, Sides,
    TradingEvent,
};

use crate::position_engine::PositionEngine;

/// Size differences at or below this are treated as rounding noise.
pub const SIZE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    InSync,
    /// Halted sides are left untouched.
    Skipped,
    /// The position query failed transiently; local state is unchanged.
    QueryFailed(String),
    /// The exchange holds more than the local positions account for.
    Untracked { excess: Decimal },
    Corrected {
        local_size: Decimal,
        exchange_size: Decimal,
        closed: usize,
        shrunk: bool,
    },
}

impl PositionEngine {
    /// Reconciles both sides independently.
    pub async fn sync_physical_positions(&self) -> Sides<Result<ReconcileOutcome, EngineError>> {
        let (long, short) = tokio::join!(self.sync_side(Side::Long), self.sync_side(Side::Short));
        Sides::new(long, short)
    }

    /// # Errors
    /// Returns [`EngineError::SideHalted`] when the query fails fatally.
    pub async fn sync_side(&self, side: Side) -> Result<ReconcileOutcome, EngineError> {
        let mut op = self.book().side(side).lock().await;
        self.sync_on(&mut op, Utc::now()).await
    }

    /// # Errors
    /// See [`PositionEngine::sync_side`].
    pub async fn sync_on(
        &self,
        op: &mut Operation,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, EngineError> {
        if op.is_halted() {
            return Ok(ReconcileOutcome::Skipped);
        }
        let side = op.side;
        let reported = match self.exchange().get_positions(self.symbol(), side).await {
            Ok(positions) => positions,
            Err(err) if err.is_fatal() => return Err(self.halt(op, &err)),
            Err(err) => {
                tracing::warn!(side = %side, error = %err, "Position query failed, keeping local state");
                return Ok(ReconcileOutcome::QueryFailed(err.to_string()));
            }
        };

        let exchange_size: Decimal = reported.iter().map(|p| p.size.abs()).sum();
        let local_size = op.tracked_size();
        let diff = exchange_size - local_size;

        if diff.abs() <= SIZE_TOLERANCE {
            op.untracked_size = Decimal::ZERO;
            return Ok(ReconcileOutcome::InSync);
        }

        if diff > Decimal::ZERO {
            if op.untracked_size != diff {
                tracing::warn!(
                    side = %side,
                    local_size = %local_size,
                    exchange_size = %exchange_size,
                    excess = %diff,
                    "Exchange holds untracked size, not adopting it"
                );
                op.untracked_size = diff;
                self.events().emit(TradingEvent::ReconciliationCorrection {
                    side,
                    local_size,
                    exchange_size,
                    closed: 0,
                });
            }
            return Ok(ReconcileOutcome::Untracked { excess: diff });
        }

        op.untracked_size = Decimal::ZERO;
        let (closed, shrunk) = self.shed_missing_size(op, -diff, now)?;
        tracing::warn!(
            side = %side,
            local_size = %local_size,
            exchange_size = %exchange_size,
            closed,
            shrunk,
            "Reconciled local positions down to exchange size"
        );
        self.events().emit(TradingEvent::ReconciliationCorrection {
            side,
            local_size,
            exchange_size,
            closed,
        });
        Ok(ReconcileOutcome::Corrected {
            local_size,
            exchange_size,
            closed,
            shrunk,
        })
    }

    /// Removes `missing` contracts from the newest positions first.
    ///
    /// Whole positions are force-closed; the last one is shrunk when only part
    /// of it is gone.
    fn shed_missing_size(
        &self,
        op: &mut Operation,
        mut missing: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(usize, bool), EngineError> {
        let mut candidates: Vec<usize> = op
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.state == PositionState::Open
                    || (p.state == PositionState::Failed && p.size > Decimal::ZERO)
            })
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by_key(|&i| std::cmp::Reverse(op.positions[i].open_time));

        let commission_rate = op.config.commission_rate;
        let mut closed = 0;
        let mut shrunk = false;
        for index in candidates {
            if missing <= SIZE_TOLERANCE {
                break;
            }
            let position = &mut op.positions[index];
            if position.size > missing + SIZE_TOLERANCE {
                position.size -= missing;
                shrunk = true;
                break;
            }
            missing -= position.size;
            let price = op
                .last_price
                .or(position.entry_price)
                .unwrap_or(Decimal::ZERO);
            let record = position.close(PositionExit {
                price,
                time: now,
                reason: CloseReason::Reconciliation,
                commission_rate,
                estimated: true,
            })?;
            self.book_close(op, index, record);
            closed += 1;
        }
        Ok((closed, shrunk))
    }
}
