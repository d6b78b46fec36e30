//! Retry delays for failed passes

use std::time::Duration;

/// Exponential delay for the `attempt`-th retry (starting at 1), capped at `max`
#[must_use]
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 2u32.saturating_pow(exponent);
    base.saturating_mul(factor).min(max)
}
