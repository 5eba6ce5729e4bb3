//! # Control laws
//!
//! The nominal driver holds a constant throttle and steers towards the goal with a proportional
//! heading controller. The live vehicle, its predictions, the target run and the diagnostic
//! trials all drive under this law, each with its own correction added on top. Calibration runs
//! hold fixed controls instead.
//!
//! A law is evaluated against the instance's own state every tick, so a shadow started from the
//! live vehicle's state issues the same demands the live vehicle would.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Vector2, Vector3};
use util::maths::{clamp, get_ang_dist_2pi};

use crate::veh::{Controls, VehicleState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Proportional heading-to-goal driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NominalDriver {
    throttle: f64,

    /// Steer demand with zero heading error
    steer: f64,

    /// Steer demand per radian of heading error
    heading_gain: f64,

    goal: Option<Vector2<f64>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How an instance's controls are chosen each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlLaw {
    /// The same demands on every tick
    Fixed(Controls),

    /// The nominal driver plus a correction
    Nominal {
        driver: NominalDriver,
        adjust: Controls,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NominalDriver {
    pub fn new(throttle: f64, steer: f64, heading_gain: f64, goal: Option<&Vector3<f64>>) -> Self {
        Self {
            throttle,
            steer,
            heading_gain,
            goal: goal.map(|g| Vector2::new(g[0], g[1])),
        }
    }

    /// Signed heading error to the goal, positive when the goal lies to the left.
    ///
    /// `None` if there is no goal or the vehicle is sitting on it.
    pub fn head_error_rad(&self, state: &VehicleState) -> Option<f64> {
        let rel = self.goal? - state.pose.position2();
        if rel.norm() <= f64::EPSILON {
            return None;
        }

        Some(get_ang_dist_2pi(state.pose.heading(), rel[1].atan2(rel[0])))
    }

    /// Uncorrected demands for the given state.
    pub fn controls(&self, state: &VehicleState) -> Controls {
        // Positive steer turns right, so a goal to the left needs negative steer
        let steer = match self.head_error_rad(state) {
            Some(err) if self.heading_gain != 0.0 => {
                clamp(&(self.steer - self.heading_gain * err), &-1.0, &1.0)
            }
            _ => self.steer,
        };

        Controls::new(self.throttle, steer)
    }

    /// This driver with the given correction on top.
    pub fn with_adjust(self, adjust: Controls) -> ControlLaw {
        ControlLaw::Nominal {
            driver: self,
            adjust,
        }
    }
}

impl ControlLaw {
    /// Demands for an instance in the given state, limited to the actuator range.
    pub fn controls(&self, state: &VehicleState) -> Controls {
        match self {
            ControlLaw::Fixed(c) => c.clamped(),
            ControlLaw::Nominal { driver, adjust } => driver
                .controls(state)
                .adjusted(adjust.throttle, adjust.steer)
                .clamped(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::veh::Pose;
    use approx::assert_relative_eq;

    fn at(x: f64, y: f64, heading: f64) -> VehicleState {
        VehicleState::at_rest(Pose::from_xy_heading(x, y, heading))
    }

    #[test]
    fn test_steers_towards_goal() {
        let goal = Vector3::new(1000.0, 0.0, 0.0);
        let driver = NominalDriver::new(0.5, 0.0, 0.5, Some(&goal));

        // On the line to the goal nothing is demanded
        assert_eq!(driver.controls(&at(0.0, 0.0, 0.0)), Controls::new(0.5, 0.0));

        // Left of the line the goal is to the right, which is positive steer
        let c = driver.controls(&at(0.0, 1000.0, 0.0));
        assert_relative_eq!(c.steer, 0.5 * std::f64::consts::FRAC_PI_4, epsilon = 1e-9);

        // Pointing away the demand saturates
        let c = driver.controls(&at(0.0, 0.0, 3.0));
        assert_eq!(c.steer, 1.0);
        assert_eq!(c.throttle, 0.5);
    }

    #[test]
    fn test_without_goal_or_gain() {
        let goal = Vector3::new(1000.0, 0.0, 0.0);
        let state = at(0.0, 500.0, 0.3);

        assert_eq!(NominalDriver::new(0.5, 0.1, 0.5, None).controls(&state).steer, 0.1);
        assert_eq!(NominalDriver::new(0.5, 0.1, 0.0, Some(&goal)).controls(&state).steer, 0.1);

        let on_goal = at(1000.0, 0.0, 1.0);
        assert!(NominalDriver::new(0.5, 0.0, 0.5, Some(&goal))
            .head_error_rad(&on_goal)
            .is_none());
    }

    #[test]
    fn test_law_adds_correction() {
        let goal = Vector3::new(1000.0, 0.0, 0.0);
        let driver = NominalDriver::new(0.5, 0.0, 0.5, Some(&goal));
        let state = at(0.0, 0.0, 0.0);

        let law = driver.with_adjust(Controls::new(0.2, -0.1));
        assert_relative_eq!(law.controls(&state).throttle, 0.7);
        assert_relative_eq!(law.controls(&state).steer, -0.1);

        let law = driver.with_adjust(Controls::new(0.8, 0.0));
        assert_eq!(law.controls(&state).throttle, 1.0);

        assert_eq!(
            ControlLaw::Fixed(Controls::new(1.5, -0.25)).controls(&state),
            Controls::new(1.0, -0.25)
        );
    }
}
