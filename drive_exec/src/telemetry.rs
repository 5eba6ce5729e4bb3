//! # Telemetry buffer
//!
//! Append-only per-tick record of a single recording instance. Each shadow run owns its own
//! buffer, buffers are never shared between instances.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Vector3;
use serde::Serialize;

use crate::{
    veh::{Pose, VehicleState},
    world::{LandmarkId, Sensing},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryBuffer {
    pub(crate) path: Vec<Pose>,
    pub(crate) velocities: Vec<Vector3<f64>>,
    pub(crate) rpms: Vec<f64>,

    /// Landmarks visible at each landmark sample. Sample `k` is taken at tick
    /// `k * landmark_interval_ticks`.
    pub(crate) landmarks: BTreeMap<usize, BTreeSet<LandmarkId>>,

    pub(crate) last_gear: i32,

    landmark_interval_ticks: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TelemetryBuffer {
    pub fn new(landmark_interval_ticks: usize) -> Self {
        Self {
            path: Vec::new(),
            velocities: Vec::new(),
            rpms: Vec::new(),
            landmarks: BTreeMap::new(),
            last_gear: 0,
            landmark_interval_ticks: landmark_interval_ticks.max(1),
        }
    }

    /// Append one tick's sample, sweeping for landmarks if this tick falls on a landmark sample.
    pub fn record<S: Sensing + ?Sized>(&mut self, state: &VehicleState, sensing: &S) {
        let tick = self.len();

        if tick % self.landmark_interval_ticks == 0 {
            self.landmarks.insert(
                tick / self.landmark_interval_ticks,
                sensing.sweep_for_landmarks(&state.pose),
            );
        }

        self.path.push(state.pose);
        self.velocities.push(state.linear_velocity);
        self.rpms.push(state.engine_rpm);
        self.last_gear = state.gear;
    }

    /// Number of ticks recorded.
    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn landmark_interval_ticks(&self) -> usize {
        self.landmark_interval_ticks
    }

    pub fn path(&self) -> &[Pose] {
        &self.path
    }

    pub fn rpms(&self) -> &[f64] {
        &self.rpms
    }

    pub fn last_pose(&self) -> Option<&Pose> {
        self.path.last()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
