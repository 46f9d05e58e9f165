//! Wall-clock helpers. All scheduler timestamps are milliseconds since the Unix epoch.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before the epoch reads as `0` rather than failing.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Timestamp `duration` after `base_ms`.
#[must_use]
pub fn after_ms(base_ms: u128, duration: Duration) -> u128 {
    base_ms.saturating_add(duration.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_ms_adds_duration() {
        assert_eq!(after_ms(1_000, Duration::from_millis(250)), 1_250);
        assert_eq!(after_ms(u128::MAX, Duration::from_secs(1)), u128::MAX);
    }

    #[test]
    fn now_is_monotone_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 0);
    }
}
