//! # Drive telemetry summary

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::Serialize;

use crate::{diverge::DivergenceFlags, veh::Pose};

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Default)]
pub struct DriveTm {
    pub mode: String,
    pub time_s: f64,

    /// Tick index of the live vehicle within the current prediction
    pub live_tick: usize,

    pub live_pose: Option<Pose>,

    pub goal_reached: bool,

    pub throttle_adjust: f64,
    pub steer_adjust: f64,

    /// Flags raised by the most recent divergence
    pub last_flags: DivergenceFlags,

    pub predictions_completed: usize,
    pub divergences_detected: usize,
    pub searches_completed: usize,
    pub trials_run: usize,
}
