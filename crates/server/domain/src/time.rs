//! Wall-clock abstraction.
//!
//! Cooldowns, grace periods, SLO ages and token-bucket refills all compare
//! wall-clock milliseconds. Hiding the clock behind a trait keeps every one
//! of those comparisons deterministic under test.

use chrono::Utc;

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn wall_time(&self) -> i64;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_time(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Returns true when `elapsed_ms` has passed between `since` and `now`.
///
/// A `since` of zero (never happened) always qualifies.
pub fn has_elapsed(since: i64, now: i64, elapsed_ms: u64) -> bool {
    now.saturating_sub(since) >= elapsed_ms as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_elapsed_boundaries() {
        assert!(has_elapsed(0, 1_000, 1_000));
        assert!(has_elapsed(500, 1_500, 1_000));
        assert!(!has_elapsed(600, 1_500, 1_000));
    }

    #[test]
    fn never_happened_always_qualifies() {
        assert!(has_elapsed(0, 1, 0));
        assert!(has_elapsed(0, 60_000, 30_000));
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.wall_time();
        let b = clock.wall_time();
        assert!(b >= a);
    }
}
