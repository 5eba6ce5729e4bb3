//! # Control calibration
//!
//! Before live driving starts the control space can be sampled by running one calibration shadow
//! per grid point from the start state. Where each one ends up relative to its start is kept in a
//! [`ControlMap`], which the diagnostic search uses to pick a first trial when triage can't say
//! which way the vehicle is off.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

use nalgebra::Vector2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use util::maths::get_ang_dist_2pi;

use crate::veh::{Controls, Pose};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// If false no calibration runs are made and the control map stays empty
    pub enabled: bool,

    /// Throttle values of the grid
    pub throttles: Vec<f64>,

    /// Steer values of the grid
    pub steers: Vec<f64>,

    /// Duration of each calibration run
    pub duration_s: f64,
}

/// Where one grid point's controls took the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationEntry {
    pub controls: Controls,

    /// End position in the start frame (X forward, Y left)
    pub end_offset: Vector2<f64>,

    /// Signed heading change, positive to the left
    pub heading_change_rad: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlMap {
    entries: Vec<CalibrationEntry>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            enabled: false,
            throttles: vec![0.25, 0.5, 0.75, 1.0],
            steers: vec![-0.5, -0.25, 0.0, 0.25, 0.5],
            duration_s: 2.0,
        }
    }
}

impl CalibrationParams {
    /// Every (throttle, steer) point of the grid, throttle major.
    pub fn grid(&self) -> VecDeque<Controls> {
        self.throttles
            .iter()
            .flat_map(|t| self.steers.iter().map(move |s| Controls::new(*t, *s)))
            .collect()
    }
}

impl ControlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one calibration run.
    pub fn insert(&mut self, controls: Controls, start: &Pose, end: &Pose) -> CalibrationEntry {
        let entry = CalibrationEntry {
            controls,
            end_offset: start.to_local_2d(&end.position2()),
            heading_change_rad: get_ang_dist_2pi(start.heading(), end.heading()),
        };

        self.entries.push(entry);
        entry
    }

    /// The entry whose end offset is closest to the given offset.
    pub fn nearest(&self, offset: &Vector2<f64>) -> Option<&CalibrationEntry> {
        self.entries
            .iter()
            .min_by_key(|e| OrderedFloat((e.end_offset - offset).norm()))
    }

    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
