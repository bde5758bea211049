use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Maintenance margin rate used for the liquidation estimate.
const MAINTENANCE_MARGIN_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Margin to commit to the next opening.
///
/// # Arguments
/// * `capital_per_position` - Configured margin per logical position
/// * `available_capital` - Operation capital not held by active positions
/// * `pending_slots` - Number of slots still waiting to be opened
///
/// # Returns
/// `min(capital_per_position, available / pending_slots)`, never negative
#[must_use]
pub fn position_margin(
    capital_per_position: Decimal,
    available_capital: Decimal,
    pending_slots: usize,
) -> Decimal {
    if pending_slots == 0 || available_capital <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let share = available_capital / Decimal::from(pending_slots);
    capital_per_position.min(share).max(Decimal::ZERO)
}

/// Contract quantity for a margin at `leverage`, rounded down to `decimals`.
#[must_use]
pub fn contract_size(margin: Decimal, leverage: Decimal, price: Decimal, decimals: u32) -> Decimal {
    if price <= Decimal::ZERO || margin <= Decimal::ZERO || leverage <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (margin * leverage / price).round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Per-position stop-loss price `sl_pct` percent against the entry.
#[must_use]
pub fn stop_loss_price(side: Side, entry: Decimal, sl_pct: Decimal) -> Decimal {
    let offset = sl_pct / HUNDRED;
    match side {
        Side::Long => entry * (Decimal::ONE - offset),
        Side::Short => entry * (Decimal::ONE + offset),
    }
}

/// Isolated-margin liquidation estimate.
///
/// Returns `None` for non-positive inputs.
#[must_use]
pub fn liquidation_price(side: Side, entry: Decimal, leverage: Decimal) -> Option<Decimal> {
    if entry <= Decimal::ZERO || leverage <= Decimal::ZERO {
        return None;
    }
    let inverse = Decimal::ONE / leverage;
    match side {
        Side::Long => {
            Some((entry * (Decimal::ONE - inverse + MAINTENANCE_MARGIN_RATE)).max(Decimal::ZERO))
        }
        Side::Short => Some(entry * (Decimal::ONE + inverse - MAINTENANCE_MARGIN_RATE)),
    }
}

/// Mark-to-market PNL of `size` contracts held since `entry`.
#[must_use]
pub fn unrealized_pnl(side: Side, entry: Decimal, price: Decimal, size: Decimal) -> Decimal {
    match side {
        Side::Long => (price - entry) * size,
        Side::Short => (entry - price) * size,
    }
}

/// Realized PNL split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlBreakdown {
    pub gross: Decimal,
    pub commission: Decimal,
    pub net: Decimal,
}

/// PNL of a round trip, commission charged on both legs' notional.
#[must_use]
pub fn realized_pnl(
    side: Side,
    entry: Decimal,
    exit: Decimal,
    size: Decimal,
    commission_rate: Decimal,
) -> PnlBreakdown {
    let gross = unrealized_pnl(side, entry, exit, size);
    let commission = ((entry * size).abs() + (exit * size).abs()) * commission_rate;
    PnlBreakdown {
        gross,
        commission,
        net: gross - commission,
    }
}

/// Return on `capital` as a percentage; zero capital yields zero.
#[must_use]
pub fn roi_pct(pnl: Decimal, capital: Decimal) -> Decimal {
    if capital <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    pnl / capital * HUNDRED
}

/// Absolute percent distance of `price` from `reference`.
#[must_use]
pub fn distance_pct(reference: Decimal, price: Decimal) -> Decimal {
    if reference <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((price - reference) / reference * HUNDRED).abs()
}
