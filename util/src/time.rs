//! General time utility functions

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Number of whole fixed-period ticks which fit in the given duration.
///
/// Fractional ticks are rounded to the nearest whole tick, with a minimum of one tick so that
/// a non-zero duration always lasts at least a single cycle.
pub fn seconds_to_ticks(duration_s: f64, tick_period_s: f64) -> usize {
    if !(tick_period_s > 0.0) || !(duration_s > 0.0) {
        return 0;
    }

    ((duration_s / tick_period_s).round() as usize).max(1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seconds_to_ticks() {
        assert_eq!(seconds_to_ticks(5.0, 0.1), 50);
        assert_eq!(seconds_to_ticks(0.01, 0.1), 1);
        assert_eq!(seconds_to_ticks(0.0, 0.1), 0);
        assert_eq!(seconds_to_ticks(1.0, 0.0), 0);
        assert_eq!(duration_to_seconds(chrono::Duration::milliseconds(1500)), Some(1.5));
    }
}
