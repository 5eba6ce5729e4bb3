//! # Shadow run manager
//!
//! A shadow run spawns a copy of a vehicle state as a new instance, lets it drive under its own
//! control law while recording its telemetry, and then harvests that telemetry and destroys the
//! instance. While a shadow runs the live vehicle is paused and its physics disabled, so that
//! exactly one instance is producing domain-relevant state changes at any time. When the run is
//! resolved the live vehicle is resumed in the state it was paused in.
//!
//! Only one shadow run may be in flight at a time, a request to begin another is rejected.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crate::{
    control::ControlLaw,
    events::{DriveEvent, EventSink},
    snapshot::{SimulationSnapshot, SnapshotError},
    telemetry::TelemetryBuffer,
    veh::{Fleet, InstanceId, Pose, VehError, VehicleInstance, VehicleRole, VehicleState},
    world::{World, WorldError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Owner of the fleet bookkeeping and of the shadow run in flight, if any.
#[derive(Debug)]
pub struct ShadowRunMgr {
    fleet: Fleet,
    active: Option<ShadowRun>,
    landmark_interval_ticks: usize,
}

/// Identifies a shadow run in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowHandle {
    pub instance: InstanceId,
    pub role: VehicleRole,
}

/// Everything harvested from a resolved shadow run.
#[derive(Debug, Clone)]
pub struct ShadowOutcome {
    pub instance: InstanceId,
    pub role: VehicleRole,
    pub law: ControlLaw,
    pub telemetry: TelemetryBuffer,

    /// Episode time the run began at
    pub started_s: f64,
}

#[derive(Debug)]
struct ShadowRun {
    handle: ShadowHandle,
    law: ControlLaw,
    telemetry: TelemetryBuffer,
    horizon_ticks: usize,

    /// Live state at the moment the run began
    live_restore: VehicleState,

    started_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunProgress {
    /// The run is still recording
    Recording,

    /// The run has a full horizon (or can't record any further) and should be resolved
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum ShadowError {
    #[error("A {0:?} run is already in progress")]
    RunInProgress(VehicleRole),

    #[error("No shadow run is in progress")]
    NoRunInProgress,

    #[error("The handle ({0}) does not match the run in progress")]
    HandleMismatch(InstanceId),

    #[error("The state of the live vehicle is unavailable")]
    LiveStateUnavailable,

    #[error("Could not spawn the shadow instance: {0}")]
    SpawnFailed(WorldError),

    #[error("Invalid shadow instance: {0}")]
    InvalidInstance(VehError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ShadowRunMgr {
    pub fn new(live_id: InstanceId, landmark_interval_ticks: usize) -> Self {
        Self {
            fleet: Fleet::new(live_id),
            active: None,
            landmark_interval_ticks,
        }
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn live_id(&self) -> InstanceId {
        self.fleet.live().id()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_handle(&self) -> Option<ShadowHandle> {
        self.active.as_ref().map(|r| r.handle)
    }

    /// Number of samples recorded by the run in flight.
    pub fn recorded(&self) -> usize {
        self.active.as_ref().map_or(0, |r| r.telemetry.len())
    }

    /// Most recent pose recorded by the run in flight.
    pub fn latest_pose(&self) -> Option<&Pose> {
        self.active.as_ref().and_then(|r| r.telemetry.last_pose())
    }

    /// Begin a shadow run from `template`.
    ///
    /// The live vehicle is paused, a new instance with the given role is spawned in the template
    /// state and the law's demands for that state are applied to it. The template's sample is
    /// recorded as tick 0. The run completes once `horizon_ticks` samples have been recorded.
    ///
    /// A missing controller is not an error, control transfer is skipped and the run proceeds.
    #[allow(clippy::too_many_arguments)]
    pub fn begin<W, E>(
        &mut self,
        world: &mut W,
        template: &VehicleState,
        horizon_ticks: usize,
        role: VehicleRole,
        law: ControlLaw,
        now_s: f64,
        sink: &mut E,
    ) -> Result<ShadowHandle, ShadowError>
    where
        W: World + ?Sized,
        E: EventSink + ?Sized,
    {
        if let Some(ref run) = self.active {
            return Err(ShadowError::RunInProgress(run.handle.role));
        }
        if role == VehicleRole::LiveVehicle {
            return Err(ShadowError::InvalidInstance(VehError::LiveRoleForShadow));
        }

        let live_id = self.live_id();
        let live_restore = world
            .vehicle_state(live_id)
            .ok_or(ShadowError::LiveStateUnavailable)?;

        let id = world
            .spawn_clone(template, role)
            .map_err(ShadowError::SpawnFailed)?;

        let registered = VehicleInstance::shadow(id, role)
            .and_then(|instance| self.fleet.add_shadow(instance));
        if let Err(e) = registered {
            world.destroy(id).ok();
            return Err(ShadowError::InvalidInstance(e));
        }

        // Pause the live vehicle
        soft(sink, now_s, "Pausing live physics", world.set_physics_enabled(live_id, false));
        self.fleet.live_mut().pause();

        soft(sink, now_s, "Control transfer to shadow", world.transfer_control(id));

        let mut telemetry = TelemetryBuffer::new(self.landmark_interval_ticks);
        let first = world.vehicle_state(id).unwrap_or(*template);
        telemetry.record(&first, &*world);
        drive(world, id, &law, &first, now_s, sink);

        let handle = ShadowHandle { instance: id, role };

        self.active = Some(ShadowRun {
            handle,
            law,
            telemetry,
            horizon_ticks: horizon_ticks.max(1),
            live_restore,
            started_s: now_s,
        });

        Ok(handle)
    }

    /// Record one tick of the run in flight and apply the law's demands for it.
    ///
    /// If the shadow's state can no longer be read the run is reported complete with what has
    /// been recorded so far.
    pub fn step<W, E>(
        &mut self,
        world: &mut W,
        now_s: f64,
        sink: &mut E,
    ) -> Result<RunProgress, ShadowError>
    where
        W: World + ?Sized,
        E: EventSink + ?Sized,
    {
        let run = self.active.as_mut().ok_or(ShadowError::NoRunInProgress)?;

        if run.telemetry.len() >= run.horizon_ticks {
            return Ok(RunProgress::Complete);
        }

        match world.vehicle_state(run.handle.instance) {
            Some(state) => {
                run.telemetry.record(&state, &*world);
                drive(world, run.handle.instance, &run.law, &state, now_s, sink);
                Ok(RunProgress::Recording)
            }
            None => {
                sink.emit(
                    now_s,
                    DriveEvent::SoftFailure {
                        context: format!("Recording shadow {}", run.handle.instance),
                        reason: "instance state unavailable".into(),
                    },
                );
                Ok(RunProgress::Complete)
            }
        }
    }

    /// Resolve the run in flight, destroying the shadow and resuming the live vehicle in its
    /// pre-shadow state.
    pub fn resolve<W, E>(
        &mut self,
        world: &mut W,
        handle: ShadowHandle,
        now_s: f64,
        sink: &mut E,
    ) -> Result<ShadowOutcome, ShadowError>
    where
        W: World + ?Sized,
        E: EventSink + ?Sized,
    {
        let run = match self.active.take() {
            Some(r) if r.handle == handle => r,
            Some(r) => {
                self.active = Some(r);
                return Err(ShadowError::HandleMismatch(handle.instance));
            }
            None => return Err(ShadowError::NoRunInProgress),
        };

        soft(sink, now_s, "Shadow destruction", world.destroy(handle.instance));
        self.fleet.remove_shadow();

        // Resume the live vehicle exactly where it was paused
        let live_id = self.live_id();
        soft(sink, now_s, "Resuming live physics", world.set_physics_enabled(live_id, true));
        soft(sink, now_s, "Live state restore", world.restore_state(live_id, &run.live_restore));
        self.fleet.live_mut().resume();

        soft(sink, now_s, "Control transfer to live", world.transfer_control(live_id));

        Ok(ShadowOutcome {
            instance: handle.instance,
            role: handle.role,
            law: run.law,
            telemetry: run.telemetry,
            started_s: run.started_s,
        })
    }
}

impl ShadowOutcome {
    pub fn into_snapshot(self) -> Result<SimulationSnapshot, SnapshotError> {
        SimulationSnapshot::from_telemetry(self.telemetry)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Apply the law's demands for `state` to a shadow.
fn drive<W, E>(
    world: &mut W,
    id: InstanceId,
    law: &ControlLaw,
    state: &VehicleState,
    now_s: f64,
    sink: &mut E,
) where
    W: World + ?Sized,
    E: EventSink + ?Sized,
{
    let controls = law.controls(state);
    soft(sink, now_s, "Shadow throttle", world.apply_throttle(id, controls.throttle));
    soft(sink, now_s, "Shadow steer", world.apply_steer(id, controls.steer));
}

/// Report a failed lifecycle step as a soft failure and carry on.
fn soft<E: EventSink + ?Sized>(sink: &mut E, now_s: f64, context: &str, res: Result<(), WorldError>) {
    if let Err(e) = res {
        sink.emit(
            now_s,
            DriveEvent::SoftFailure {
                context: context.into(),
                reason: e.to_string(),
            },
        );
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        control::NominalDriver,
        events::MemorySink,
        veh::Controls,
        world::{Actuation, FaultKind, FaultSpec, Lifecycle, SceneQuery, ToySim, ToySimParams},
    };

    const DT: f64 = 0.05;

    fn moving_sim(params: ToySimParams) -> ToySim {
        let mut sim = ToySim::new(params);
        let live = sim.live_id();
        sim.apply_throttle(live, 0.5).unwrap();
        for _ in 0..20 {
            sim.advance(DT);
        }
        sim
    }

    /// Run a shadow of the live vehicle to completion and return its telemetry.
    fn run_shadow(
        sim: &mut ToySim,
        role: VehicleRole,
        law: ControlLaw,
        ticks: usize,
    ) -> TelemetryBuffer {
        let mut sink = MemorySink::new();
        let mut mgr = ShadowRunMgr::new(sim.live_id(), 10);
        let template = sim.vehicle_state(sim.live_id()).unwrap();

        let handle = mgr.begin(sim, &template, ticks, role, law, 0.0, &mut sink).unwrap();
        while mgr.step(sim, 0.0, &mut sink).unwrap() == RunProgress::Recording {
            sim.advance(DT);
        }
        let outcome = mgr.resolve(sim, handle, 0.0, &mut sink).unwrap();

        assert_eq!(sink.count("SoftFailure"), 0);
        outcome.telemetry
    }

    #[test]
    fn test_shadow_predicts_live() {
        let mut sim = moving_sim(ToySimParams::default());
        let mut sink = MemorySink::new();
        let mut mgr = ShadowRunMgr::new(sim.live_id(), 10);
        let live = sim.live_id();
        let template = sim.vehicle_state(live).unwrap();

        let handle = mgr
            .begin(
                &mut sim,
                &template,
                30,
                VehicleRole::PredictionShadow,
                ControlLaw::Fixed(Controls::new(0.5, 0.0)),
                0.0,
                &mut sink,
            )
            .unwrap();

        assert_eq!(mgr.fleet().count_role(VehicleRole::LiveVehicle), 1);
        assert_eq!(mgr.fleet().active().unwrap().id(), handle.instance);
        assert_eq!(mgr.recorded(), 1);
        assert_eq!(sim.num_instances(), 2);

        // Overlapping requests are rejected without disturbing the run in flight
        assert!(matches!(
            mgr.begin(
                &mut sim,
                &template,
                30,
                VehicleRole::PredictionShadow,
                ControlLaw::Fixed(Controls::default()),
                0.0,
                &mut sink,
            ),
            Err(ShadowError::RunInProgress(VehicleRole::PredictionShadow))
        ));
        assert_eq!(sim.num_instances(), 2);

        let mut steps = 0;
        while mgr.step(&mut sim, 0.0, &mut sink).unwrap() == RunProgress::Recording {
            sim.advance(DT);
            steps += 1;
        }
        assert_eq!(steps, 29);

        // The live vehicle hasn't moved while paused
        assert_eq!(sim.pose(live).unwrap(), template.pose);

        let snapshot = mgr
            .resolve(&mut sim, handle, 0.0, &mut sink)
            .unwrap()
            .into_snapshot()
            .unwrap();
        assert_eq!(snapshot.len(), 30);
        assert_eq!(sim.num_instances(), 1);
        assert!(mgr.fleet().shadow().is_none());
        assert_eq!(mgr.fleet().active().unwrap().role(), VehicleRole::LiveVehicle);
        assert_eq!(sim.possessed(), Some(live));

        // Driving the live vehicle under the same controls reproduces the prediction
        for tick in 0..30 {
            let pose = sim.pose(live).unwrap();
            assert!(pose.dist_2d(snapshot.pose_at(tick).unwrap()) < 1e-6);
            sim.advance(DT);
        }

        assert_eq!(sink.count("SoftFailure"), 0);
    }

    #[test]
    fn test_missing_controller_is_soft() {
        let mut params = ToySimParams::default();
        params.controller_present = false;
        let mut sim = moving_sim(params);
        let mut sink = MemorySink::new();
        let mut mgr = ShadowRunMgr::new(sim.live_id(), 10);
        let template = sim.vehicle_state(sim.live_id()).unwrap();

        let handle = mgr
            .begin(
                &mut sim,
                &template,
                5,
                VehicleRole::TargetShadow,
                ControlLaw::Fixed(Controls::new(0.5, 0.0)),
                0.0,
                &mut sink,
            )
            .unwrap();
        while mgr.step(&mut sim, 0.0, &mut sink).unwrap() == RunProgress::Recording {
            sim.advance(DT);
        }
        let outcome = mgr.resolve(&mut sim, handle, 0.0, &mut sink).unwrap();

        assert_eq!(outcome.telemetry.len(), 5);
        assert_eq!(outcome.role, VehicleRole::TargetShadow);

        // Once to the shadow and once back to the live vehicle
        assert_eq!(sink.count("SoftFailure"), 2);
    }

    #[test]
    fn test_vanished_shadow_completes_early() {
        let mut sim = moving_sim(ToySimParams::default());
        let mut sink = MemorySink::new();
        let mut mgr = ShadowRunMgr::new(sim.live_id(), 10);
        let template = sim.vehicle_state(sim.live_id()).unwrap();

        let handle = mgr
            .begin(
                &mut sim,
                &template,
                50,
                VehicleRole::DiagnosticTrial,
                ControlLaw::Fixed(Controls::default()),
                0.0,
                &mut sink,
            )
            .unwrap();
        assert_eq!(mgr.step(&mut sim, 0.0, &mut sink).unwrap(), RunProgress::Recording);

        // Something else removed the instance
        sim.destroy(handle.instance).unwrap();
        assert_eq!(mgr.step(&mut sim, 0.0, &mut sink).unwrap(), RunProgress::Complete);

        let outcome = mgr.resolve(&mut sim, handle, 0.0, &mut sink).unwrap();
        assert_eq!(outcome.telemetry.len(), 2);
        assert_eq!(mgr.fleet().count_role(VehicleRole::LiveVehicle), 1);
        assert!(!mgr.is_active());

        assert!(matches!(
            mgr.resolve(&mut sim, handle, 0.0, &mut sink),
            Err(ShadowError::NoRunInProgress)
        ));
    }

    #[test]
    fn test_live_role_rejected() {
        let mut sim = moving_sim(ToySimParams::default());
        let mut sink = MemorySink::new();
        let mut mgr = ShadowRunMgr::new(sim.live_id(), 10);
        let template = sim.vehicle_state(sim.live_id()).unwrap();

        assert!(mgr
            .begin(
                &mut sim,
                &template,
                5,
                VehicleRole::LiveVehicle,
                ControlLaw::Fixed(Controls::default()),
                0.0,
                &mut sink,
            )
            .is_err());
        assert_eq!(sim.num_instances(), 1);
    }

    #[test]
    fn test_trials_share_live_faults() {
        let mut params = ToySimParams::default();
        params.faults.push(FaultSpec {
            start_s: 0.0,
            kind: FaultKind::SteerDrift { bias: -0.1 },
        });
        let mut sim = moving_sim(params);
        let live = sim.live_id();
        let law = ControlLaw::Fixed(Controls::new(0.5, 0.0));

        let trial = run_shadow(&mut sim, VehicleRole::DiagnosticTrial, law, 40);
        let prediction = run_shadow(&mut sim, VehicleRole::PredictionShadow, law, 40);
        assert_eq!(trial.len(), 40);

        // The live vehicle resumes where it was paused and drifts exactly as its trial did
        for tick in 0..40 {
            let pose = sim.pose(live).unwrap();
            assert!(pose.dist_2d(&trial.path()[tick]) < 1e-6);
            sim.advance(DT);
        }

        // While the prediction shows the healthy vehicle holding its heading
        let start_heading = prediction.path()[0].heading();
        let live_end = trial.last_pose().unwrap();
        let predicted_end = prediction.last_pose().unwrap();
        assert!((predicted_end.heading() - start_heading).abs() < 1e-9);
        assert!(live_end.heading() > start_heading + 0.05);
        assert!(live_end.dist_2d(predicted_end) > 10.0);
    }

    #[test]
    fn test_law_applied_every_tick() {
        let mut params = ToySimParams::default();
        params.start.y = 1000.0;
        params.goal = Some([3000.0, 0.0]);
        let mut sim = moving_sim(params);
        let goal = sim.find_goal_position();
        let driver = NominalDriver::new(0.5, 0.0, 0.5, goal.as_ref());

        // Held controls keep the vehicle parallel to the road
        let fixed = run_shadow(
            &mut sim,
            VehicleRole::PredictionShadow,
            ControlLaw::Fixed(Controls::new(0.5, 0.0)),
            40,
        );
        assert!(fixed.last_pose().unwrap().heading().abs() < 1e-9);

        // The nominal driver turns it towards the goal, which is to the right
        let steered = run_shadow(
            &mut sim,
            VehicleRole::PredictionShadow,
            driver.with_adjust(Controls::default()),
            40,
        );
        assert!(steered.last_pose().unwrap().heading() < -0.05);
        assert!(steered.last_pose().unwrap().position[1] < fixed.last_pose().unwrap().position[1]);

        // Starting from the live state, the first demand is the driver's demand for that state
        let template = sim.vehicle_state(sim.live_id()).unwrap();
        assert!(driver.controls(&template).steer > 0.0);
    }
}
