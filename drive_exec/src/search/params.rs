//! Diagnostic search parameters

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Largest throttle correction a trial may try
    pub max_throttle_delta: f64,

    /// Largest steer correction a trial may try
    pub max_steer_delta: f64,

    /// Weight on the trial's final distance to the goal
    pub end_weight: f64,

    /// Weight on the quadratic loss at the horizon tick
    pub horizon_weight: f64,

    /// Weight on the throttle correction magnitude, the steer correction has unit weight
    pub throttle_reg_weight: f64,

    /// Subtracted from the cost of a trial which reached the goal
    pub goal_bonus: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_throttle_delta: 0.5,
            max_steer_delta: 0.2,
            end_weight: 1.0,
            horizon_weight: 1.0,
            throttle_reg_weight: 0.1,
            goal_bonus: 1000.0,
        }
    }
}
