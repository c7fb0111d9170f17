//! Reconnect schedule

use std::time::Duration;

/// Delay before reconnect attempt `attempt` (1-based): `base × 2^(attempt−1)`.
///
/// Returns `None` for attempt 0 and for any attempt past `max_attempts`.
pub fn reconnect_delay(base: Duration, attempt: u32, max_attempts: u32) -> Option<Duration> {
    if attempt == 0 || attempt > max_attempts {
        return None;
    }
    let factor = 1u32.checked_shl(attempt - 1)?;
    base.checked_mul(factor)
}
