//! Multiplier growth curve.
//!
//! The displayed multiplier is a pure function of elapsed time, and the
//! inverse is used to pre-estimate how long a round will run so the tick
//! scheduler knows when it can stop early.

/// Exponential growth rate per millisecond.
const GROWTH_RATE: f64 = 0.000_06;

/// Inverse growth constant: `1 / (100 * GROWTH_RATE)`.
const INVERSE_FACTOR: f64 = 16_666.666_667;

/// Multiplier (x100 fixed point) after `elapsed_ms` milliseconds.
///
/// `multiplier_at(0) == 100` (1.00x) and the curve is monotonically
/// non-decreasing.
pub fn multiplier_at(elapsed_ms: u64) -> u64 {
    (100.0 * (GROWTH_RATE * elapsed_ms as f64).exp()).floor() as u64
}

/// Milliseconds until the curve reaches `multiplier` (x100 fixed point).
///
/// Only used for scheduling estimates; callers round up to stay on the safe
/// side of the tick boundary.
pub fn duration_for(multiplier: u64) -> f64 {
    INVERSE_FACTOR * (0.01 * multiplier as f64).ln()
}
