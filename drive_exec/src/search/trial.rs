//! # Diagnostic trials

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use crate::veh::Pose;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A trial about to be launched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialPlan {
    pub index: usize,
    pub throttle_delta: f64,
    pub steer_delta: f64,

    /// True if the deltas came from the control map rather than random sampling
    pub seeded: bool,
}

/// Outcome of one diagnostic trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestRunResult {
    pub index: usize,
    pub throttle_delta: f64,
    pub steer_delta: f64,

    /// Final pose of the trial, `None` if the trial instance could not be run
    pub end_pose: Option<Pose>,

    pub reached_goal: bool,
}

/// Inclusive sampling ranges for trial deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingRanges {
    pub throttle: (f64, f64),
    pub steer: (f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TestRunResult {
    /// The result of a trial which ran to completion.
    pub fn completed(plan: &TrialPlan, end_pose: Pose, reached_goal: bool) -> Self {
        Self {
            index: plan.index,
            throttle_delta: plan.throttle_delta,
            steer_delta: plan.steer_delta,
            end_pose: Some(end_pose),
            reached_goal,
        }
    }

    /// The result of a trial whose instance could not be spawned or sampled.
    pub fn failed(plan: &TrialPlan) -> Self {
        Self {
            index: plan.index,
            throttle_delta: plan.throttle_delta,
            steer_delta: plan.steer_delta,
            end_pose: None,
            reached_goal: false,
        }
    }
}

impl SamplingRanges {
    /// Clamp a pair of deltas into the ranges.
    pub fn clamp(&self, throttle_delta: f64, steer_delta: f64) -> (f64, f64) {
        (
            util::maths::clamp(&throttle_delta, &self.throttle.0, &self.throttle.1),
            util::maths::clamp(&steer_delta, &self.steer.0, &self.steer.1),
        )
    }
}
