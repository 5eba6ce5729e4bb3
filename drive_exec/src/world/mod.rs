//! # World interfaces
//!
//! The core never simulates vehicles itself. Physics, instance spawning, sensing and scene queries
//! are provided by the hosting engine through the traits in this module. Anything implementing all
//! four traits is a [`World`].
//!
//! All calls are made from the single cooperative tick, there is no requirement for
//! implementations to be thread safe.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod toy_sim;

pub use params::*;
pub use toy_sim::ToySim;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeSet;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::veh::{InstanceId, Pose, VehicleRole, VehicleState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Identifier of a landmark in the scene.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LandmarkId(pub u32);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Side of the road a landmark stands on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoadSide {
    Left,
    Right,
}

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("No instance with id {0} exists")]
    NoSuchInstance(InstanceId),

    #[error("There is no controller to transfer")]
    NoController,

    #[error("The instance could not be spawned: {0}")]
    SpawnFailed(String),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Control inputs and state readback for a single instance.
///
/// For a fixed start state and fixed inputs the resulting trajectory is assumed to be repeatable,
/// which is what makes comparing shadow runs against the live vehicle meaningful.
pub trait Actuation {
    fn apply_throttle(&mut self, id: InstanceId, throttle: f64) -> Result<(), WorldError>;

    fn apply_steer(&mut self, id: InstanceId, steer: f64) -> Result<(), WorldError>;

    fn pose(&self, id: InstanceId) -> Option<Pose>;

    fn linear_velocity(&self, id: InstanceId) -> Option<Vector3<f64>>;

    fn angular_velocity(&self, id: InstanceId) -> Option<Vector3<f64>>;

    fn engine_rpm(&self, id: InstanceId) -> Option<f64>;

    fn gear(&self, id: InstanceId) -> Option<i32>;

    /// Sample the full kinematic state of an instance, or `None` if any part is unavailable.
    fn vehicle_state(&self, id: InstanceId) -> Option<VehicleState> {
        Some(VehicleState {
            pose: self.pose(id)?,
            linear_velocity: self.linear_velocity(id)?,
            angular_velocity: self.angular_velocity(id)?,
            gear: self.gear(id)?,
            engine_rpm: self.engine_rpm(id)?,
        })
    }
}

/// Creation, destruction and possession of instances.
pub trait Lifecycle {
    /// Spawn a new instance in exactly the given state.
    ///
    /// A [`VehicleRole::DiagnosticTrial`] clone must behave like the live vehicle it was taken
    /// from, including any fault the live vehicle is suffering. Every other role is a healthy copy
    /// of the vehicle.
    fn spawn_clone(
        &mut self,
        template: &VehicleState,
        role: VehicleRole,
    ) -> Result<InstanceId, WorldError>;

    fn destroy(&mut self, id: InstanceId) -> Result<(), WorldError>;

    /// Hand the player/AI controller to the given instance.
    ///
    /// Returns [`WorldError::NoController`] if there is no controller to transfer.
    fn transfer_control(&mut self, to: InstanceId) -> Result<(), WorldError>;

    /// Enable or disable physics simulation for an instance. A disabled instance keeps its state.
    fn set_physics_enabled(&mut self, id: InstanceId, enabled: bool) -> Result<(), WorldError>;

    /// Force an instance back into the given state.
    fn restore_state(&mut self, id: InstanceId, state: &VehicleState) -> Result<(), WorldError>;
}

/// Forward-looking landmark detection.
pub trait Sensing {
    /// Sweep the sensor forward from the given pose, returning every landmark in view.
    fn sweep_for_landmarks(&self, from: &Pose) -> BTreeSet<LandmarkId>;

    fn landmark_side(&self, id: LandmarkId) -> Option<RoadSide>;
}

/// Queries about the static scene.
pub trait SceneQuery {
    /// Position of the goal. There is assumed to be exactly one goal in the scene.
    fn find_goal_position(&self) -> Option<Vector3<f64>>;
}

/// Everything the core needs from the hosting engine.
pub trait World: Actuation + Lifecycle + Sensing + SceneQuery {}

impl<T> World for T where T: Actuation + Lifecycle + Sensing + SceneQuery {}
