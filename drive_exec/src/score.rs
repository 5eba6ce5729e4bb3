//! # Run scoring
//!
//! Once the live vehicle reaches the goal its whole run is compared against the target run. The
//! score is the experiment's result, it never feeds back into control.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Display;

use serde::Serialize;
use util::maths::hausdorff;

use crate::{snapshot::TargetRunRecord, veh::Pose};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunScore {
    /// Directed Hausdorff distance from the live positions to the target positions
    pub position_hausdorff: f64,

    /// Directed Hausdorff distance from the live attitudes to the target attitudes
    pub orientation_hausdorff: f64,

    /// Squared difference between the live and target runtimes
    pub runtime_error_sq: f64,

    pub live_runtime_s: f64,

    pub target_runtime_s: f64,

    pub total: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Display for RunScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total {:.3} (position {:.3}, orientation {:.4}, runtime {:.2} s vs {:.2} s)",
            self.total,
            self.position_hausdorff,
            self.orientation_hausdorff,
            self.live_runtime_s,
            self.target_runtime_s
        )
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Score a live run against the target run.
///
/// Returns `None` if either path is empty.
pub fn score_run(
    live_path: &[Pose],
    live_runtime_s: f64,
    target: &TargetRunRecord,
) -> Option<RunScore> {
    let position_hausdorff =
        hausdorff(live_path, &target.path, |a: &Pose, b: &Pose| a.dist_2d(b))?;
    let orientation_hausdorff =
        hausdorff(live_path, &target.path, |a: &Pose, b: &Pose| a.angular_distance(b))?;
    let runtime_error_sq = (live_runtime_s - target.runtime_s).powi(2);

    Some(RunScore {
        position_hausdorff,
        orientation_hausdorff,
        runtime_error_sq,
        live_runtime_s,
        target_runtime_s: target.runtime_s,
        total: position_hausdorff + orientation_hausdorff + runtime_error_sq,
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
