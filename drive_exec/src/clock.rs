//! # Clock
//!
//! All waits in the drive manager are deadlines compared against an injected [`Clock`], there are
//! no timer callbacks. The clock is advanced once per step by the manager itself.

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Tolerance used when comparing a deadline against accumulated fixed ticks.
const DEADLINE_EPSILON_S: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Source of episode time.
pub trait Clock {
    /// Current episode time in seconds.
    fn now_s(&self) -> f64;

    /// Move the clock forward by one step.
    fn advance(&mut self, dt_s: f64);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A clock which only moves when advanced, accumulating the fixed simulation ticks.
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    now_s: f64,
    num_ticks: u64,
}

/// A point in episode time at which some action becomes due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadline {
    at_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the clock has been advanced.
    pub fn num_ticks(&self) -> u64 {
        self.num_ticks
    }
}

impl Clock for TickClock {
    fn now_s(&self) -> f64 {
        self.now_s
    }

    fn advance(&mut self, dt_s: f64) {
        self.now_s += dt_s;
        self.num_ticks += 1;
    }
}

impl Deadline {
    pub fn at(at_s: f64) -> Self {
        Self { at_s }
    }

    /// A deadline `delay_s` after the clock's current time.
    pub fn after<C: Clock + ?Sized>(clock: &C, delay_s: f64) -> Self {
        Self::at(clock.now_s() + delay_s)
    }

    pub fn at_s(&self) -> f64 {
        self.at_s
    }

    /// Returns true if the deadline has been reached.
    pub fn is_due<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now_s() + DEADLINE_EPSILON_S >= self.at_s
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_deadline_after_fixed_ticks() {
        let mut clock = TickClock::new();
        let deadline = Deadline::after(&clock, 1.0);

        // 0.1 doesn't sum exactly to 1.0, the deadline must still be hit on the 10th tick
        for _ in 0..9 {
            clock.advance(0.1);
            assert!(!deadline.is_due(&clock));
        }
        clock.advance(0.1);

        assert!(deadline.is_due(&clock));
        assert_eq!(clock.num_ticks(), 10);
    }
}
