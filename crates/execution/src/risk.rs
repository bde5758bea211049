//! Per-position stop rules and the operation-level ROI breaker.

use rust_decimal::Decimal;
use trendline_core::{CloseReason, LogicalPosition, Operation, PositionState, Side, TrendConfig};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Checks stop-loss then trailing stop. Ratchets the trailing state in place.
pub fn position_trigger(
    position: &mut LogicalPosition,
    price: Decimal,
    trend: &TrendConfig,
) -> Option<CloseReason> {
    if position.state != PositionState::Open {
        return None;
    }
    let entry = position.entry_price?;

    if let Some(stop) = position.stop_loss_price {
        let hit = match position.side {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        };
        if hit {
            tracing::warn!(
                side = %position.side,
                id = %position.id,
                price = %price,
                stop = %stop,
                "Stop loss triggered"
            );
            return Some(CloseReason::StopLoss);
        }
    }

    if check_trailing_stop(position, entry, price, trend) {
        tracing::warn!(
            side = %position.side,
            id = %position.id,
            price = %price,
            high_water = ?position.high_water_price,
            stop = ?position.trailing_stop_price,
            "Trailing stop triggered"
        );
        return Some(CloseReason::TrailingStop);
    }
    None
}

fn check_trailing_stop(
    position: &mut LogicalPosition,
    entry: Decimal,
    price: Decimal,
    trend: &TrendConfig,
) -> bool {
    let activation = trend.trailing_activation_pct / HUNDRED;
    let distance = trend.trailing_distance_pct / HUNDRED;

    match position.side {
        Side::Long => {
            if !position.trailing_active && price >= entry * (Decimal::ONE + activation) {
                position.trailing_active = true;
                tracing::info!(side = %position.side, id = %position.id, price = %price, "Trailing stop armed");
            }
            if !position.trailing_active {
                return false;
            }
            let high = position.high_water_price.map_or(price, |h| h.max(price));
            let stop = high * (Decimal::ONE - distance);
            position.high_water_price = Some(high);
            position.trailing_stop_price = Some(stop);
            price <= stop
        }
        Side::Short => {
            if !position.trailing_active && price <= entry * (Decimal::ONE - activation) {
                position.trailing_active = true;
                tracing::info!(side = %position.side, id = %position.id, price = %price, "Trailing stop armed");
            }
            if !position.trailing_active {
                return false;
            }
            let low = position.high_water_price.map_or(price, |l| l.min(price));
            let stop = low * (Decimal::ONE + distance);
            position.high_water_price = Some(low);
            position.trailing_stop_price = Some(stop);
            price >= stop
        }
    }
}

/// Operation-level exits in priority order: the price exit condition, the
/// ROI take-profit and stop-loss, then the ROI trailing stop.
pub fn operation_exit(operation: &mut Operation, price: Decimal) -> Option<CloseReason> {
    if let Some(exit) = operation.config.exit_condition {
        if exit.is_met(price) {
            tracing::warn!(
                side = %operation.side,
                price = %price,
                level = %exit.price,
                "Exit condition met"
            );
            return Some(CloseReason::ExitCondition);
        }
    }
    if let Some(reason) = operation_roi_breach(operation, price) {
        return Some(reason);
    }
    roi_trailing_stop(operation, price).then_some(CloseReason::OperationTrailingRoi)
}

/// Aggregate ROI stop-loss / take-profit of an operation, if breached.
///
/// With `roi_sl_trail_pct` set the stop sits that many points below the
/// realized ROI instead of at `-roi_sl_pct`.
#[must_use]
pub fn operation_roi_breach(operation: &Operation, price: Decimal) -> Option<CloseReason> {
    let roi = operation.roi_pct(price);
    if let Some(tp) = operation.config.roi_tp_pct {
        if roi >= tp {
            return Some(CloseReason::OperationTpRoi);
        }
    }
    let stop = match operation.config.roi_sl_trail_pct {
        Some(trail) => Some(operation.realized_roi_pct() - trail),
        None => operation.config.roi_sl_pct.map(|sl| -sl.abs()),
    };
    match stop {
        Some(stop) if roi <= stop => Some(CloseReason::OperationSlRoi),
        _ => None,
    }
}

/// Arms at `activation_pct` ROI, then ratchets the peak and fires once ROI
/// gives back `distance_pct` points from it.
fn roi_trailing_stop(operation: &mut Operation, price: Decimal) -> bool {
    let Some(trailing) = operation.config.roi_trailing else {
        return false;
    };
    let roi = operation.roi_pct(price);
    let peak = match operation.roi_peak_pct {
        Some(peak) => peak.max(roi),
        None if roi >= trailing.activation_pct => {
            tracing::info!(side = %operation.side, roi_pct = %roi, "ROI trailing stop armed");
            roi
        }
        None => return false,
    };
    operation.roi_peak_pct = Some(peak);
    let hit = roi <= peak - trailing.distance_pct;
    if hit {
        tracing::warn!(side = %operation.side, roi_pct = %roi, peak_pct = %peak, "ROI trailing stop triggered");
    }
    hit
}
