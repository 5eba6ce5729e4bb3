//! # Reference world
//!
//! A small deterministic kinematic bicycle model standing in for the physics engine. It is used by
//! the `drive_exec` binary and by tests, and implements every world trait so the core can be run
//! end to end without a game engine.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Vector2, Vector3};
use util::maths::{clamp, get_ang_dist_2pi, lin_map};

use super::*;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ToySim {
    params: ToySimParams,

    /// Simulation time
    time_s: f64,

    instances: BTreeMap<InstanceId, SimVehicle>,

    next_id: u32,

    live_id: InstanceId,

    /// The instance currently possessed by the controller
    possessed: Option<InstanceId>,
}

#[derive(Debug, Clone)]
struct SimVehicle {
    x: f64,
    y: f64,
    yaw: f64,

    /// Signed forward speed
    speed: f64,

    yaw_rate: f64,

    throttle: f64,
    steer: f64,

    physics_enabled: bool,

    /// Subject to injected faults, true for the live vehicle and its diagnostic trials
    faulted: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ToySim {
    /// Create a new world containing only the live vehicle at the start position.
    pub fn new(params: ToySimParams) -> Self {
        let live_id = InstanceId(1);
        let start = params.start;

        let mut instances = BTreeMap::new();
        instances.insert(
            live_id,
            SimVehicle {
                x: start.x,
                y: start.y,
                yaw: start.heading_rad,
                speed: start.speed,
                yaw_rate: 0.0,
                throttle: 0.0,
                steer: 0.0,
                physics_enabled: true,
                faulted: true,
            },
        );

        let possessed = if params.controller_present {
            Some(live_id)
        } else {
            None
        };

        Self {
            params,
            time_s: 0.0,
            instances,
            next_id: live_id.0 + 1,
            live_id,
            possessed,
        }
    }

    /// Id of the vehicle created with the world.
    pub fn live_id(&self) -> InstanceId {
        self.live_id
    }

    pub fn time_s(&self) -> f64 {
        self.time_s
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn possessed(&self) -> Option<InstanceId> {
        self.possessed
    }

    pub fn params(&self) -> &ToySimParams {
        &self.params
    }

    /// Advance every physics-enabled instance by one fixed step.
    pub fn advance(&mut self, dt_s: f64) {
        let (drag_factor, steer_bias) = self.active_faults();
        let p = &self.params;

        for veh in self.instances.values_mut() {
            if !veh.physics_enabled {
                continue;
            }

            let (drag_factor, steer_bias) = if veh.faulted {
                (drag_factor, steer_bias)
            } else {
                (1.0, 0.0)
            };

            let steer_angle =
                clamp(&(veh.steer + steer_bias), &-1.0, &1.0) * p.max_steer_angle_rad;
            let accel = p.engine_accel * veh.throttle - p.drag * drag_factor * veh.speed;

            veh.speed += accel * dt_s;

            // Positive steer turns right, which is a negative yaw rate with Z up
            veh.yaw_rate = -veh.speed * steer_angle.tan() / p.wheelbase;
            veh.yaw += veh.yaw_rate * dt_s;

            veh.x += veh.speed * veh.yaw.cos() * dt_s;
            veh.y += veh.speed * veh.yaw.sin() * dt_s;
        }

        self.time_s += dt_s;
    }

    /// Combined drag factor and steering bias from every fault active at the current time.
    fn active_faults(&self) -> (f64, f64) {
        let mut drag_factor = 1.0;
        let mut steer_bias = 0.0;

        for fault in self.params.faults.iter().filter(|f| f.start_s <= self.time_s) {
            match fault.kind {
                FaultKind::Drag { factor } => drag_factor *= factor,
                FaultKind::SteerDrift { bias } => steer_bias += bias,
            }
        }

        (drag_factor, steer_bias)
    }

    fn get(&self, id: InstanceId) -> Result<&SimVehicle, WorldError> {
        self.instances.get(&id).ok_or(WorldError::NoSuchInstance(id))
    }

    fn get_mut(&mut self, id: InstanceId) -> Result<&mut SimVehicle, WorldError> {
        self.instances
            .get_mut(&id)
            .ok_or(WorldError::NoSuchInstance(id))
    }

    fn gear_for(&self, speed: f64) -> i32 {
        if speed < -1e-6 {
            -1
        } else if speed.abs() <= 1e-6 {
            0
        } else {
            ((speed / self.params.gear_span).floor() as i32 + 1).min(self.params.num_gears)
        }
    }

    fn rpm_for(&self, speed: f64) -> f64 {
        let gear = self.gear_for(speed);
        if gear == 0 {
            return self.params.idle_rpm;
        }

        let band_lo = ((gear.max(1) - 1) as f64) * self.params.gear_span;
        let rpm = lin_map(
            (band_lo, band_lo + self.params.gear_span),
            (self.params.idle_rpm, self.params.max_rpm),
            speed.abs(),
        );

        rpm.min(self.params.max_rpm)
    }
}

impl SimVehicle {
    fn set_state(&mut self, state: &VehicleState) {
        let heading = state.pose.heading();
        let dir = Vector2::new(heading.cos(), heading.sin());

        self.x = state.pose.position[0];
        self.y = state.pose.position[1];
        self.yaw = heading;
        self.speed = Vector2::new(state.linear_velocity[0], state.linear_velocity[1]).dot(&dir);
        self.yaw_rate = state.angular_velocity[2];
    }
}

impl Actuation for ToySim {
    fn apply_throttle(&mut self, id: InstanceId, throttle: f64) -> Result<(), WorldError> {
        self.get_mut(id)?.throttle = clamp(&throttle, &-1.0, &1.0);
        Ok(())
    }

    fn apply_steer(&mut self, id: InstanceId, steer: f64) -> Result<(), WorldError> {
        self.get_mut(id)?.steer = clamp(&steer, &-1.0, &1.0);
        Ok(())
    }

    fn pose(&self, id: InstanceId) -> Option<Pose> {
        let v = self.get(id).ok()?;
        Some(Pose::from_xy_heading(v.x, v.y, v.yaw))
    }

    fn linear_velocity(&self, id: InstanceId) -> Option<Vector3<f64>> {
        let v = self.get(id).ok()?;
        Some(Vector3::new(
            v.speed * v.yaw.cos(),
            v.speed * v.yaw.sin(),
            0.0,
        ))
    }

    fn angular_velocity(&self, id: InstanceId) -> Option<Vector3<f64>> {
        let v = self.get(id).ok()?;
        Some(Vector3::new(0.0, 0.0, v.yaw_rate))
    }

    fn engine_rpm(&self, id: InstanceId) -> Option<f64> {
        let v = self.get(id).ok()?;
        Some(self.rpm_for(v.speed))
    }

    fn gear(&self, id: InstanceId) -> Option<i32> {
        let v = self.get(id).ok()?;
        Some(self.gear_for(v.speed))
    }
}

impl Lifecycle for ToySim {
    fn spawn_clone(
        &mut self,
        template: &VehicleState,
        role: VehicleRole,
    ) -> Result<InstanceId, WorldError> {
        let id = InstanceId(self.next_id);
        self.next_id += 1;

        let mut veh = SimVehicle {
            x: 0.0,
            y: 0.0,
            yaw: 0.0,
            speed: 0.0,
            yaw_rate: 0.0,
            throttle: 0.0,
            steer: 0.0,
            physics_enabled: true,
            faulted: role == VehicleRole::DiagnosticTrial,
        };
        veh.set_state(template);

        self.instances.insert(id, veh);

        Ok(id)
    }

    fn destroy(&mut self, id: InstanceId) -> Result<(), WorldError> {
        self.instances
            .remove(&id)
            .map(|_| ())
            .ok_or(WorldError::NoSuchInstance(id))?;

        if self.possessed == Some(id) {
            self.possessed = Some(self.live_id);
        }

        Ok(())
    }

    fn transfer_control(&mut self, to: InstanceId) -> Result<(), WorldError> {
        self.get(to)?;

        match self.possessed {
            Some(_) => {
                self.possessed = Some(to);
                Ok(())
            }
            None => Err(WorldError::NoController),
        }
    }

    fn set_physics_enabled(&mut self, id: InstanceId, enabled: bool) -> Result<(), WorldError> {
        self.get_mut(id)?.physics_enabled = enabled;
        Ok(())
    }

    fn restore_state(&mut self, id: InstanceId, state: &VehicleState) -> Result<(), WorldError> {
        self.get_mut(id)?.set_state(state);
        Ok(())
    }
}

impl Sensing for ToySim {
    fn sweep_for_landmarks(&self, from: &Pose) -> BTreeSet<LandmarkId> {
        let heading = from.heading();
        let origin = from.position2();

        self.params
            .landmarks
            .iter()
            .filter(|lm| {
                let rel = Vector2::new(lm.x, lm.y) - origin;
                if rel.norm() > self.params.sensor_range {
                    return false;
                }
                let bearing = rel[1].atan2(rel[0]);
                get_ang_dist_2pi(heading, bearing).abs() <= self.params.sensor_half_fov_rad
            })
            .map(|lm| LandmarkId(lm.id))
            .collect()
    }

    fn landmark_side(&self, id: LandmarkId) -> Option<RoadSide> {
        self.params
            .landmarks
            .iter()
            .find(|lm| lm.id == id.0)
            .map(|lm| lm.side)
    }
}

impl SceneQuery for ToySim {
    fn find_goal_position(&self) -> Option<Vector3<f64>> {
        self.params.goal.map(|g| Vector3::new(g[0], g[1], 0.0))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const DT: f64 = 0.05;

    fn drive(sim: &mut ToySim, id: InstanceId, secs: f64) {
        sim.apply_throttle(id, 0.5).unwrap();
        sim.apply_steer(id, 0.0).unwrap();
        for _ in 0..((secs / DT) as usize) {
            sim.advance(DT);
        }
    }

    #[test]
    fn test_clone_replays_live() {
        let mut sim = ToySim::new(ToySimParams::default());
        let live = sim.live_id();
        drive(&mut sim, live, 2.0);

        // Freeze the live vehicle and clone it
        let state = sim.vehicle_state(live).unwrap();
        sim.set_physics_enabled(live, false).unwrap();
        let clone = sim.spawn_clone(&state, VehicleRole::PredictionShadow).unwrap();
        drive(&mut sim, clone, 3.0);
        let clone_end = sim.pose(clone).unwrap();

        // Live hasn't moved while frozen
        assert_eq!(sim.pose(live).unwrap(), state.pose);

        // Restarting live from the same state gives the same trajectory
        sim.destroy(clone).unwrap();
        sim.set_physics_enabled(live, true).unwrap();
        sim.restore_state(live, &state).unwrap();
        drive(&mut sim, live, 3.0);

        assert!(sim.pose(live).unwrap().dist_2d(&clone_end) < 1e-6);
    }

    fn steer_faulted_sim() -> ToySim {
        let mut params = ToySimParams::default();
        params.faults.push(FaultSpec {
            start_s: 0.0,
            kind: FaultKind::SteerDrift { bias: -0.05 },
        });
        ToySim::new(params)
    }

    #[test]
    fn test_healthy_clones_ignore_faults() {
        let mut sim = steer_faulted_sim();
        let live = sim.live_id();
        let state = sim.vehicle_state(live).unwrap();

        for role in [
            VehicleRole::PredictionShadow,
            VehicleRole::TargetShadow,
            VehicleRole::CalibrationShadow,
        ]
        .iter()
        {
            let clone = sim.spawn_clone(&state, *role).unwrap();
            sim.apply_throttle(clone, 0.5).unwrap();
        }
        drive(&mut sim, live, 5.0);

        // Negative steer is a left turn, so the live vehicle ends up to the left (+Y)
        assert!(sim.pose(live).unwrap().position[1] > 10.0);
        for id in (2..5).map(InstanceId) {
            assert!(sim.pose(id).unwrap().position[1].abs() < 1e-9);
        }
    }

    #[test]
    fn test_trial_clone_shares_live_fault() {
        let mut sim = steer_faulted_sim();
        let live = sim.live_id();
        drive(&mut sim, live, 1.0);

        let state = sim.vehicle_state(live).unwrap();
        sim.set_physics_enabled(live, false).unwrap();
        let trial = sim.spawn_clone(&state, VehicleRole::DiagnosticTrial).unwrap();
        drive(&mut sim, trial, 4.0);
        let trial_end = sim.pose(trial).unwrap();

        // The trial drifts exactly as the live vehicle does from the same state
        sim.destroy(trial).unwrap();
        sim.set_physics_enabled(live, true).unwrap();
        sim.restore_state(live, &state).unwrap();
        drive(&mut sim, live, 4.0);

        assert!(trial_end.position[1] > 10.0);
        assert!(sim.pose(live).unwrap().dist_2d(&trial_end) < 1e-6);
    }

    #[test]
    fn test_gear_and_rpm() {
        let mut params = ToySimParams::default();
        params.start.speed = 450.0;
        let sim = ToySim::new(params);
        let live = sim.live_id();

        assert_eq!(sim.gear(live), Some(1));
        assert!((sim.engine_rpm(live).unwrap() - 2750.0).abs() < 1e-6);
    }

    #[test]
    fn test_sweep_and_controller() {
        let mut params = ToySimParams::default();
        params.controller_present = false;
        let mut sim = ToySim::new(params);
        let live = sim.live_id();

        let seen = sim.sweep_for_landmarks(&sim.pose(live).unwrap());
        assert!(seen.contains(&LandmarkId(0)));
        assert!(seen.contains(&LandmarkId(1)));
        assert!(!seen.contains(&LandmarkId(4)));
        assert_eq!(sim.landmark_side(LandmarkId(1)), Some(RoadSide::Right));

        assert!(matches!(sim.transfer_control(live), Err(WorldError::NoController)));
        assert!(matches!(
            sim.destroy(InstanceId(99)),
            Err(WorldError::NoSuchInstance(_))
        ));
    }
}
