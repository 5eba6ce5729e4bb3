//! # Trial cost function

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use super::SearchParams;
use crate::veh::{Pose, VehicleState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The parts of a vehicle's state compared by the loss.
#[derive(Debug, Clone, Copy)]
pub struct TickSample {
    pub pose: Pose,
    pub rpm: f64,
}

/// Individual terms of a trial's cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrialCost {
    /// Weighted distance from the trial's end to the goal
    pub end: f64,

    /// Weighted quadratic loss at the horizon tick
    pub horizon: f64,

    /// Correction size penalty
    pub regularisation: f64,

    /// Bonus subtracted if the trial reached the goal
    pub goal_bonus: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TickSample {
    pub fn new(pose: Pose, rpm: f64) -> Self {
        Self { pose, rpm }
    }
}

impl From<&VehicleState> for TickSample {
    fn from(state: &VehicleState) -> Self {
        Self::new(state.pose, state.engine_rpm)
    }
}

impl TrialCost {
    pub fn total(&self) -> f64 {
        self.end + self.horizon + self.regularisation - self.goal_bonus
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Squared error of both the trial and the live vehicle against the expected state.
///
/// Each comparison sums the squared ground plane distance, the squared angular distance and the
/// squared RPM difference.
pub fn quadratic_loss(expected: &TickSample, test: &TickSample, actual: &TickSample) -> f64 {
    squared_error(test, expected) + squared_error(actual, expected)
}

/// Penalty on the size of a correction.
pub fn regularisation(throttle_delta: f64, steer_delta: f64, throttle_weight: f64) -> f64 {
    throttle_weight * throttle_delta.abs() + steer_delta.abs()
}

/// Full cost of a trial.
///
/// `distance_to_goal` is `None` if the scene has no goal, in which case only the horizon loss
/// and regularisation apply.
pub fn trial_cost(
    params: &SearchParams,
    distance_to_goal: Option<f64>,
    horizon_loss: f64,
    deltas: (f64, f64),
    reached_goal: bool,
) -> TrialCost {
    TrialCost {
        end: params.end_weight * distance_to_goal.unwrap_or(0.0),
        horizon: params.horizon_weight * horizon_loss,
        regularisation: regularisation(deltas.0, deltas.1, params.throttle_reg_weight),
        goal_bonus: if reached_goal { params.goal_bonus } else { 0.0 },
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn squared_error(a: &TickSample, b: &TickSample) -> f64 {
    a.pose.dist_2d(&b.pose).powi(2)
        + a.pose.angular_distance(&b.pose).powi(2)
        + (a.rpm - b.rpm).powi(2)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(x: f64, y: f64, heading: f64, rpm: f64) -> TickSample {
        TickSample::new(Pose::from_xy_heading(x, y, heading), rpm)
    }

    #[test]
    fn test_quadratic_loss_position_only() {
        let expected = sample(0.0, 0.0, 0.0, 1000.0);
        let test = sample(1.0, 0.0, 0.0, 1000.0);
        let actual = sample(0.0, 0.0, 0.0, 1000.0);

        assert_relative_eq!(quadratic_loss(&expected, &test, &actual), 1.0);
    }

    #[test]
    fn test_quadratic_loss_all_terms() {
        let expected = sample(0.0, 0.0, 0.0, 1000.0);
        let test = sample(0.0, 2.0, 0.5, 1000.0);
        let actual = sample(0.0, 0.0, 0.0, 1003.0);

        // 2^2 + 0.5^2 from the trial, 3^2 from the live vehicle
        assert_relative_eq!(
            quadratic_loss(&expected, &test, &actual),
            4.0 + 0.25 + 9.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_trial_cost_terms() {
        let params = SearchParams::default();

        let cost = trial_cost(&params, Some(500.0), 10.0, (-0.2, 0.1), false);
        assert_relative_eq!(cost.total(), 500.0 + 10.0 + 0.02 + 0.1, epsilon = 1e-9);

        let cost = trial_cost(&params, Some(100.0), 0.0, (0.0, 0.0), true);
        assert_relative_eq!(cost.total(), 100.0 - params.goal_bonus);

        let cost = trial_cost(&params, None, 4.0, (0.0, 0.0), false);
        assert_relative_eq!(cost.total(), 4.0);
    }
}
