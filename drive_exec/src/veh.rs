//! # Vehicle types
//!
//! Kinematic state sampled from the physics engine, control inputs, and the per-instance role and
//! status bookkeeping used to keep exactly one instance in control of the episode.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Display;

use nalgebra::{UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Position and attitude of a vehicle in the world frame.
///
/// Distances are in engine distance units (centimetres in the reference world). The ground plane
/// is XY with Z up, X forward at zero heading and Y to the left.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// The position in the world frame
    pub position: Vector3<f64>,

    /// The attitude of the vehicle in the world frame
    pub attitude_q: UnitQuaternion<f64>,
}

/// Full kinematic state of one vehicle instance, captured by value.
///
/// This is both the per-tick sample read from the physics engine and the template used to spawn
/// shadow instances, so it must contain everything required to restart a vehicle in the same
/// condition.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub pose: Pose,

    /// Linear velocity in the world frame, distance units per second
    pub linear_velocity: Vector3<f64>,

    /// Angular velocity in the world frame, radians per second
    pub angular_velocity: Vector3<f64>,

    /// Current gear, negative for reverse, 0 for neutral
    pub gear: i32,

    /// Engine speed in revolutions per minute
    pub engine_rpm: f64,
}

/// Control inputs applied to a vehicle every tick.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    /// Throttle demand in [-1, 1]
    pub throttle: f64,

    /// Steering demand in [-1, 1], positive steers right
    pub steer: f64,
}

/// Handle to a vehicle instance owned by the world.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

/// Bookkeeping for one vehicle instance known to the core.
///
/// The role is fixed at construction. Temporarily suspending an instance is expressed through
/// its [`InstanceStatus`], never by changing its role.
#[derive(Debug, Clone)]
pub struct VehicleInstance {
    id: InstanceId,
    role: VehicleRole,
    status: InstanceStatus,
}

/// The set of instances currently known to the core.
///
/// There is always exactly one live instance and at most one shadow instance.
#[derive(Debug, Clone)]
pub struct Fleet {
    live: VehicleInstance,
    shadow: Option<VehicleInstance>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Role of a vehicle instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleRole {
    /// The vehicle being driven, whose control inputs are corrected.
    LiveVehicle,

    /// Produces the expected future under current control.
    PredictionShadow,

    /// Runs a perturbed control input during a diagnostic search.
    DiagnosticTrial,

    /// Produces the baseline run to the goal used for end of episode scoring.
    TargetShadow,

    /// Samples the control space to build the control map.
    CalibrationShadow,
}

/// Lifecycle status of an instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Advancing and producing domain-relevant state changes
    Running,

    /// Physics and domain logic suspended, state frozen
    Paused,

    /// Removed from the world
    Destroyed,
}

#[derive(Debug, thiserror::Error)]
pub enum VehError {
    #[error("A shadow instance cannot take the LiveVehicle role")]
    LiveRoleForShadow,

    #[error("A shadow instance ({0}) is already present in the fleet")]
    ShadowAlreadyPresent(InstanceId),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(position: Vector3<f64>, attitude_q: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            attitude_q,
        }
    }

    /// Pose on the ground plane at `(x, y)` with the given heading.
    pub fn from_xy_heading(x: f64, y: f64, heading_rad: f64) -> Self {
        Self {
            position: Vector3::new(x, y, 0.0),
            attitude_q: UnitQuaternion::from_euler_angles(0.0, 0.0, heading_rad),
        }
    }

    /// Return the heading (yaw about +Z, measured from +X) in radians.
    pub fn heading(&self) -> f64 {
        self.attitude_q.euler_angles().2
    }

    /// Return the ground plane position.
    pub fn position2(&self) -> Vector2<f64> {
        Vector2::new(self.position[0], self.position[1])
    }

    /// Ground plane distance between two poses.
    pub fn dist_2d(&self, other: &Pose) -> f64 {
        (self.position2() - other.position2()).norm()
    }

    /// Smallest rotation angle between the two attitudes, in radians.
    pub fn angular_distance(&self, other: &Pose) -> f64 {
        self.attitude_q.angle_to(&other.attitude_q)
    }

    /// Express a world-frame ground plane point in this pose's frame (X forward, Y left).
    pub fn to_local_2d(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let d = point - self.position2();
        let (s, c) = self.heading().sin_cos();
        Vector2::new(c * d[0] + s * d[1], -s * d[0] + c * d[1])
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            attitude_q: UnitQuaternion::identity(),
        }
    }
}

impl VehicleState {
    /// A vehicle at rest in the given pose.
    pub fn at_rest(pose: Pose) -> Self {
        Self {
            pose,
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            gear: 0,
            engine_rpm: 0.0,
        }
    }

    /// Speed along the ground plane.
    pub fn speed(&self) -> f64 {
        Vector2::new(self.linear_velocity[0], self.linear_velocity[1]).norm()
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self::at_rest(Pose::default())
    }
}

impl Controls {
    pub fn new(throttle: f64, steer: f64) -> Self {
        Self { throttle, steer }
    }

    /// Return these controls limited to the actuator range [-1, 1].
    pub fn clamped(&self) -> Self {
        Self {
            throttle: util::maths::clamp(&self.throttle, &-1.0, &1.0),
            steer: util::maths::clamp(&self.steer, &-1.0, &1.0),
        }
    }

    /// Add a correction to these controls.
    pub fn adjusted(&self, throttle_delta: f64, steer_delta: f64) -> Self {
        Self {
            throttle: self.throttle + throttle_delta,
            steer: self.steer + steer_delta,
        }
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl VehicleInstance {
    /// Create the record for the live vehicle.
    pub fn live(id: InstanceId) -> Self {
        Self {
            id,
            role: VehicleRole::LiveVehicle,
            status: InstanceStatus::Running,
        }
    }

    /// Create the record for a shadow instance, which may take any role except the live one.
    pub fn shadow(id: InstanceId, role: VehicleRole) -> Result<Self, VehError> {
        if role == VehicleRole::LiveVehicle {
            return Err(VehError::LiveRoleForShadow);
        }

        Ok(Self {
            id,
            role,
            status: InstanceStatus::Running,
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn role(&self) -> VehicleRole {
        self.role
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    pub fn pause(&mut self) {
        if self.status == InstanceStatus::Running {
            self.status = InstanceStatus::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.status == InstanceStatus::Paused {
            self.status = InstanceStatus::Running;
        }
    }

    pub fn mark_destroyed(&mut self) {
        self.status = InstanceStatus::Destroyed;
    }
}

impl Fleet {
    pub fn new(live_id: InstanceId) -> Self {
        Self {
            live: VehicleInstance::live(live_id),
            shadow: None,
        }
    }

    pub fn live(&self) -> &VehicleInstance {
        &self.live
    }

    pub fn live_mut(&mut self) -> &mut VehicleInstance {
        &mut self.live
    }

    pub fn shadow(&self) -> Option<&VehicleInstance> {
        self.shadow.as_ref()
    }

    /// Register a new shadow instance. Only one shadow may exist at a time.
    pub fn add_shadow(&mut self, shadow: VehicleInstance) -> Result<(), VehError> {
        if let Some(ref s) = self.shadow {
            return Err(VehError::ShadowAlreadyPresent(s.id()));
        }

        self.shadow = Some(shadow);
        Ok(())
    }

    /// Remove the shadow instance, returning it marked as destroyed.
    pub fn remove_shadow(&mut self) -> Option<VehicleInstance> {
        self.shadow.take().map(|mut s| {
            s.mark_destroyed();
            s
        })
    }

    /// Iterate over every instance in the fleet.
    pub fn instances(&self) -> impl Iterator<Item = &VehicleInstance> {
        std::iter::once(&self.live).chain(self.shadow.iter())
    }

    /// Number of instances holding the given role.
    pub fn count_role(&self, role: VehicleRole) -> usize {
        self.instances().filter(|i| i.role() == role).count()
    }

    /// The instance currently allowed to produce domain-relevant state changes.
    pub fn active(&self) -> Option<&VehicleInstance> {
        self.instances().find(|i| i.is_running())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
