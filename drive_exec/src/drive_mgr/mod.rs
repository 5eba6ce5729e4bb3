//! # DriveMgr module
//!
//! This module implements the [`DriveMgr`] state machine, which runs the whole prediction,
//! detection and correction loop for one live vehicle. It is stepped once per fixed simulation
//! tick through [`DriveMgr::step`], every wait is a deadline or sample count checked there. The
//! modes are:
//!
//! - `Calibrate` - Calibration shadows sample the control space to build the control map.
//! - `TargetRun` - A target shadow drives from the start to the goal to record the baseline run.
//! - `Live` - The live vehicle drives, is compared against the current prediction, and new
//!   predictions are started when due.
//! - `Predict` - A prediction shadow is running, the live vehicle is paused.
//! - `Search` - Diagnostic trials are running one after the other, the live vehicle is paused.
//! - `Finished` - The goal has been reached or the episode has timed out.
//!
//! While any shadow runs the live vehicle is paused, and when a run resolves back into `Live` the
//! live logic runs in the same step so the live tick count lines up with the prediction's samples.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
pub mod tm;

pub use params::{DriveParams, TargetRunParams};
pub use tm::DriveTm;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::VecDeque, fmt::Display};

use nalgebra::{Vector2, Vector3};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    calib::ControlMap,
    clock::{Clock, Deadline},
    control::{ControlLaw, NominalDriver},
    diverge::DivergenceDetector,
    events::{DriveEvent, EventSink},
    score::{score_run, RunScore},
    search::{infinite_cost, DiagnosticSearch, TestRunResult, TrialPlan},
    shadow::{RunProgress, ShadowError, ShadowHandle, ShadowRunMgr},
    snapshot::{SimulationSnapshot, TargetRunRecord},
    telemetry::TelemetryBuffer,
    triage::{ErrorTriage, TriageInput},
    veh::{Controls, Fleet, InstanceId, Pose, VehicleRole, VehicleState},
    world::{World, WorldError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Drive Manager
///
/// Owns every piece of state that persists across modes: the current prediction, the correction
/// applied to the live vehicle, the control map and the target run record.
pub struct DriveMgr<C: Clock, S: EventSink> {
    params: DriveParams,

    clock: C,

    sink: S,

    rng: StdRng,

    shadows: ShadowRunMgr,

    detector: DivergenceDetector,

    triage: ErrorTriage,

    control_map: ControlMap,

    mode: DriveMode,

    /// The prediction the live vehicle is currently compared against
    snapshot: SimulationSnapshot,

    /// Live tick index within the current prediction
    live_tick: usize,

    /// Uncorrected control law shared by the live vehicle and its shadows
    driver: NominalDriver,

    /// Correction added to the nominal controls, written only at the end of a search
    adjust: Controls,

    /// Demands last applied to the live vehicle
    live_controls: Controls,

    next_prediction: Deadline,

    /// Live state at the start of the episode
    start_state: VehicleState,

    goal: Option<Vector3<f64>>,

    target_record: Option<TargetRunRecord>,

    /// Every pose the live vehicle has been sampled at
    live_path: Vec<Pose>,

    /// Number of ticks the live vehicle has actually driven for
    live_ticks: usize,

    run_score: Option<RunScore>,

    tm: DriveTm,
}

/// Calibration progress.
#[derive(Debug)]
pub struct Calibrate {
    pending: VecDeque<Controls>,
    current: Option<(ShadowHandle, Controls)>,
}

/// A diagnostic search round and the trial in flight.
#[derive(Debug)]
pub struct SearchRound {
    search: DiagnosticSearch,
    current: Option<(ShadowHandle, TrialPlan)>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DriveMgrError {
    #[error("Failed to load DriveParams: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Invalid DriveParams: {0}")]
    InvalidParams(String),

    #[error("The state of the live vehicle ({0}) is unavailable")]
    LiveStateUnavailable(InstanceId),
}

#[derive(Debug)]
pub enum DriveMode {
    Calibrate(Calibrate),

    /// `None` until the target shadow has been spawned
    TargetRun(Option<ShadowHandle>),

    Live,

    Predict(ShadowHandle),

    // In a box to reduce the size of the mode enum
    Search(Box<SearchRound>),

    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    Running,
    Finished,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<C: Clock, S: EventSink> DriveMgr<C, S> {
    /// Create a new manager loading its parameters from the given parameter file.
    pub fn init<W: World + ?Sized>(
        params_path: &str,
        clock: C,
        sink: S,
        world: &W,
        live_id: InstanceId,
    ) -> Result<Self, DriveMgrError> {
        let params: DriveParams = match util::params::load(params_path) {
            Ok(p) => p,
            Err(e) => return Err(DriveMgrError::ParamLoadError(e)),
        };

        Self::new(params, clock, sink, world, live_id)
    }

    pub fn new<W: World + ?Sized>(
        params: DriveParams,
        clock: C,
        sink: S,
        world: &W,
        live_id: InstanceId,
    ) -> Result<Self, DriveMgrError> {
        params.validate().map_err(DriveMgrError::InvalidParams)?;

        let start_state = world
            .vehicle_state(live_id)
            .ok_or(DriveMgrError::LiveStateUnavailable(live_id))?;

        let goal = world.find_goal_position();
        let driver = NominalDriver::new(
            params.default_throttle,
            params.default_steer,
            params.heading_gain,
            goal.as_ref(),
        );

        let mut mgr = Self {
            rng: StdRng::seed_from_u64(params.rng_seed),
            shadows: ShadowRunMgr::new(live_id, params.divergence.landmark_sample_interval_ticks),
            detector: DivergenceDetector::new(params.divergence.clone()),
            triage: ErrorTriage::new(params.triage.clone(), params.num_test_cars),
            control_map: ControlMap::new(),
            mode: DriveMode::Live,
            snapshot: SimulationSnapshot::default(),
            live_tick: 0,
            driver,
            adjust: Controls::default(),
            live_controls: Controls::default(),
            next_prediction: Deadline::at(clock.now_s()),
            start_state,
            goal,
            target_record: None,
            live_path: Vec::new(),
            live_ticks: 0,
            run_score: None,
            tm: DriveTm::default(),
            params,
            clock,
            sink,
        };

        if mgr.goal.is_none() {
            mgr.soft_failure("Goal lookup", "there is no goal in the scene");
        }

        let grid = mgr.params.calibration.grid();
        mgr.mode = if mgr.params.calibration.enabled && !grid.is_empty() {
            DriveMode::Calibrate(Calibrate {
                pending: grid,
                current: None,
            })
        } else {
            mgr.after_calibration()
        };
        mgr.tm.mode = mgr.mode.to_string();

        Ok(mgr)
    }

    /// Step the manager by one fixed tick.
    ///
    /// Must be called once per tick before the world advances by `dt_s`.
    pub fn step<W: World + ?Sized>(&mut self, world: &mut W, dt_s: f64) -> DriveStatus {
        let was_live = matches!(self.mode, DriveMode::Live);

        let mode = std::mem::replace(&mut self.mode, DriveMode::Finished);
        self.mode = match mode {
            DriveMode::Calibrate(cal) => self.mode_calibrate(world, cal),
            DriveMode::TargetRun(handle) => self.mode_target_run(world, handle),
            DriveMode::Live => self.mode_live(world),
            DriveMode::Predict(handle) => self.mode_predict(world, handle),
            DriveMode::Search(round) => self.mode_search(world, round),
            DriveMode::Finished => DriveMode::Finished,
        };

        // A shadow resolved back into Live, so the live vehicle takes this tick
        if !was_live && matches!(self.mode, DriveMode::Live) {
            self.mode = self.mode_live(world);
        }

        self.update_tm(&*world);
        self.clock.advance(dt_s);

        self.status()
    }

    pub fn status(&self) -> DriveStatus {
        match self.mode {
            DriveMode::Finished => DriveStatus::Finished,
            _ => DriveStatus::Running,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status() == DriveStatus::Finished
    }

    pub fn mode(&self) -> &DriveMode {
        &self.mode
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn fleet(&self) -> &Fleet {
        self.shadows.fleet()
    }

    pub fn live_id(&self) -> InstanceId {
        self.shadows.live_id()
    }

    /// Correction currently added to the nominal controls.
    pub fn adjust(&self) -> Controls {
        self.adjust
    }

    pub fn snapshot(&self) -> &SimulationSnapshot {
        &self.snapshot
    }

    pub fn control_map(&self) -> &ControlMap {
        &self.control_map
    }

    pub fn target_record(&self) -> Option<&TargetRunRecord> {
        self.target_record.as_ref()
    }

    pub fn run_score(&self) -> Option<&RunScore> {
        self.run_score.as_ref()
    }

    pub fn live_path(&self) -> &[Pose] {
        &self.live_path
    }

    pub fn search_in_progress(&self) -> bool {
        self.triage.in_progress()
    }

    pub fn get_tm(&self) -> DriveTm {
        self.tm.clone()
    }

    /// Demands last applied to the live vehicle, the nominal law's plus the current correction.
    pub fn live_controls(&self) -> Controls {
        self.live_controls
    }

    /// The nominal law without any correction, which predictions and the target run follow.
    fn nominal_law(&self) -> ControlLaw {
        self.driver.with_adjust(Controls::default())
    }

    // ---- MODES ----

    fn mode_calibrate<W: World + ?Sized>(&mut self, world: &mut W, mut cal: Calibrate) -> DriveMode {
        let now_s = self.clock.now_s();

        if let Some((handle, controls)) = cal.current.take() {
            match self.shadows.step(world, now_s, &mut self.sink) {
                Ok(RunProgress::Recording) => {
                    cal.current = Some((handle, controls));
                    return DriveMode::Calibrate(cal);
                }
                Ok(RunProgress::Complete) => (),
                Err(e) => self.soft_failure("Calibration run", e),
            }

            match self.shadows.resolve(world, handle, now_s, &mut self.sink) {
                Ok(outcome) => self.record_calibration(controls, &outcome.telemetry),
                Err(e) => self.soft_failure("Calibration resolve", e),
            }
        }

        let ticks = self.params.calibration_ticks();
        while let Some(controls) = cal.pending.pop_front() {
            match self.shadows.begin(
                world,
                &self.start_state,
                ticks,
                VehicleRole::CalibrationShadow,
                ControlLaw::Fixed(controls),
                now_s,
                &mut self.sink,
            ) {
                Ok(handle) => {
                    cal.current = Some((handle, controls));
                    return DriveMode::Calibrate(cal);
                }
                Err(e) => self.soft_failure("Calibration run", e),
            }
        }

        self.emit(DriveEvent::CalibrationComplete {
            entries: self.control_map.len(),
        });

        self.after_calibration()
    }

    fn mode_target_run<W: World + ?Sized>(
        &mut self,
        world: &mut W,
        handle: Option<ShadowHandle>,
    ) -> DriveMode {
        let now_s = self.clock.now_s();

        let handle = match handle {
            Some(h) => h,
            None => {
                let ticks = self.params.target_run_ticks();
                let law = self.nominal_law();
                return match self.shadows.begin(
                    world,
                    &self.start_state,
                    ticks,
                    VehicleRole::TargetShadow,
                    law,
                    now_s,
                    &mut self.sink,
                ) {
                    Ok(h) => {
                        self.emit(DriveEvent::TargetRunStarted {
                            instance: h.instance,
                        });
                        DriveMode::TargetRun(Some(h))
                    }
                    Err(e) => {
                        self.soft_failure("Target run", e);
                        DriveMode::Live
                    }
                };
            }
        };

        let reached = self
            .shadows
            .latest_pose()
            .map_or(false, |p| within_goal(self.goal.as_ref(), self.params.goal_radius, p));

        if !reached {
            match self.shadows.step(world, now_s, &mut self.sink) {
                Ok(RunProgress::Recording) => return DriveMode::TargetRun(Some(handle)),
                Ok(RunProgress::Complete) => (),
                Err(e) => self.soft_failure("Target run", e),
            }
        }

        let outcome = match self.shadows.resolve(world, handle, now_s, &mut self.sink) {
            Ok(o) => o,
            Err(e) => {
                self.soft_failure("Target run resolve", e);
                return DriveMode::Live;
            }
        };

        let samples = outcome.telemetry.len();
        if reached {
            let runtime_s = (samples - 1) as f64 * self.params.tick_period_s;
            match TargetRunRecord::from_telemetry(outcome.telemetry, runtime_s) {
                Ok(record) => {
                    self.target_record = Some(record);
                    self.emit(DriveEvent::TargetRunCaptured { runtime_s, samples });
                }
                Err(e) => self.soft_failure("Target run record", e),
            }
        } else {
            self.emit(DriveEvent::TargetRunMissed { samples });
        }

        DriveMode::Live
    }

    fn mode_live<W: World + ?Sized>(&mut self, world: &mut W) -> DriveMode {
        let now_s = self.clock.now_s();
        let live_id = self.live_id();

        if now_s >= self.params.max_episode_s {
            self.emit(DriveEvent::EpisodeTimedOut { elapsed_s: now_s });
            return DriveMode::Finished;
        }

        let live = match world.vehicle_state(live_id) {
            Some(s) => s,
            None => {
                self.soft_failure("Live sampling", WorldError::NoSuchInstance(live_id));
                self.live_ticks += 1;
                return DriveMode::Live;
            }
        };
        self.live_path.push(live.pose);

        // Drive, with the same law a shadow started from this state would apply
        self.live_controls = self.driver.with_adjust(self.adjust).controls(&live);
        if let Err(e) = world.apply_throttle(live_id, self.live_controls.throttle) {
            self.soft_failure("Live throttle", e);
        }
        if let Err(e) = world.apply_steer(live_id, self.live_controls.steer) {
            self.soft_failure("Live steer", e);
        }

        if within_goal(self.goal.as_ref(), self.params.goal_radius, &live.pose) {
            self.finish_at_goal();
            return DriveMode::Finished;
        }

        // Compare against the prediction
        if self.snapshot.is_ready() {
            let tick = self.live_tick;
            self.live_tick += 1;

            let report = self.detector.check(tick, &live, &self.snapshot, &*world);

            if report.flags.any() {
                self.tm.divergences_detected += 1;
                self.tm.last_flags = report.flags;
                self.emit(DriveEvent::DivergenceDetected {
                    tick,
                    flags: report.flags,
                });

                let role = self.fleet().active().map(|i| i.role());
                let hypothesis = match role {
                    Some(role) => self.triage.classify(
                        role,
                        &TriageInput {
                            report: &report,
                            live: &live,
                            snapshot: &self.snapshot,
                        },
                    ),
                    None => None,
                };

                if let Some(hypothesis) = hypothesis {
                    self.emit(DriveEvent::SearchStarted {
                        hypothesis,
                        num_trials: self.triage.trials_remaining(),
                    });

                    let search = DiagnosticSearch::new(
                        hypothesis,
                        live,
                        self.driver.controls(&live),
                        self.adjust,
                        self.snapshot.clone(),
                        tick,
                        self.params.horizon_ticks(),
                        &self.params.search,
                        &self.control_map,
                    );

                    return self.mode_search(
                        world,
                        Box::new(SearchRound {
                            search,
                            current: None,
                        }),
                    );
                }
            }
        }

        // Start a new prediction from here if one is due
        if self.next_prediction.is_due(&self.clock) {
            self.next_prediction = Deadline::after(&self.clock, self.params.prediction_period_s);

            let horizon_ticks = self.params.horizon_ticks();
            let law = self.nominal_law();
            match self.shadows.begin(
                world,
                &live,
                horizon_ticks,
                VehicleRole::PredictionShadow,
                law,
                now_s,
                &mut self.sink,
            ) {
                Ok(handle) => {
                    self.emit(DriveEvent::PredictionStarted {
                        instance: handle.instance,
                        horizon_ticks,
                    });
                    return DriveMode::Predict(handle);
                }
                Err(ShadowError::RunInProgress(role)) => self.emit(DriveEvent::RequestIgnored {
                    request: "Prediction".into(),
                    reason: format!("a {:?} run is in flight", role),
                }),
                Err(e) => self.soft_failure("Prediction", e),
            }
        }

        self.live_ticks += 1;
        DriveMode::Live
    }

    fn mode_predict<W: World + ?Sized>(&mut self, world: &mut W, handle: ShadowHandle) -> DriveMode {
        let now_s = self.clock.now_s();

        match self.shadows.step(world, now_s, &mut self.sink) {
            Ok(RunProgress::Recording) => return DriveMode::Predict(handle),
            Ok(RunProgress::Complete) => (),
            Err(e) => {
                self.soft_failure("Prediction", e);
                return DriveMode::Live;
            }
        }

        let outcome = match self.shadows.resolve(world, handle, now_s, &mut self.sink) {
            Ok(o) => o,
            Err(e) => {
                self.soft_failure("Prediction resolve", e);
                return DriveMode::Live;
            }
        };

        // How far the live vehicle ended up from where the last prediction said it would be
        let live_pose = world.pose(self.live_id());
        if let (Some(expected), Some(actual)) = (self.snapshot.final_pose(), live_pose) {
            let distance = expected.dist_2d(&actual);
            let normalised = distance / self.params.progress_scale;
            self.emit(DriveEvent::ProgressChecked {
                distance,
                normalised,
                on_track: normalised < self.params.progress_threshold,
            });
        }

        let samples = outcome.telemetry.len();
        match outcome.into_snapshot() {
            Ok(snapshot) => {
                self.snapshot = snapshot;
                self.live_tick = 0;
                self.tm.predictions_completed += 1;
                self.emit(DriveEvent::PredictionResolved { samples });
            }
            Err(e) => {
                self.snapshot = SimulationSnapshot::default();
                self.soft_failure("Prediction snapshot", e);
            }
        }

        DriveMode::Live
    }

    fn mode_search<W: World + ?Sized>(
        &mut self,
        world: &mut W,
        mut round: Box<SearchRound>,
    ) -> DriveMode {
        let now_s = self.clock.now_s();

        // Score the trial in flight once it's complete
        if let Some((handle, plan)) = round.current.take() {
            let progress = match self.shadows.step(world, now_s, &mut self.sink) {
                Ok(p) => p,
                Err(e) => {
                    self.soft_failure("Diagnostic trial", e);
                    RunProgress::Complete
                }
            };

            if progress == RunProgress::Recording {
                round.current = Some((handle, plan));
                return DriveMode::Search(round);
            }

            let (result, cost) = match self.shadows.resolve(world, handle, now_s, &mut self.sink) {
                Ok(outcome) => round.search.score_trial(
                    &plan,
                    &outcome.telemetry,
                    self.goal.as_ref(),
                    self.params.goal_radius,
                    &self.params.search,
                ),
                Err(e) => {
                    self.soft_failure("Diagnostic trial resolve", e);
                    (TestRunResult::failed(&plan), infinite_cost())
                }
            };

            self.complete_trial(&mut round.search, result, cost.total());
        }

        // Launch the next trial, a trial that can't be spawned still uses up its place
        let ticks = self.params.trial_horizon_ticks();
        while let Some(plan) = round.search.next_trial(&mut self.triage, &mut self.rng) {
            self.emit(DriveEvent::TrialStarted {
                index: plan.index,
                throttle_delta: plan.throttle_delta,
                steer_delta: plan.steer_delta,
                seeded: plan.seeded,
            });

            let template = *round.search.pre_search();
            let law = self
                .driver
                .with_adjust(Controls::new(plan.throttle_delta, plan.steer_delta));
            match self.shadows.begin(
                world,
                &template,
                ticks,
                VehicleRole::DiagnosticTrial,
                law,
                now_s,
                &mut self.sink,
            ) {
                Ok(handle) => {
                    round.current = Some((handle, plan));
                    return DriveMode::Search(round);
                }
                Err(e) => {
                    self.soft_failure("Diagnostic trial", e);
                    self.complete_trial(&mut round.search, TestRunResult::failed(&plan), f64::INFINITY);
                }
            }
        }

        // All trials done
        let outcome = round.search.finish();
        self.triage.finish_search();
        self.tm.searches_completed += 1;

        if outcome.apply_to(&mut self.adjust) {
            self.emit(DriveEvent::CorrectionApplied {
                throttle_adjust: self.adjust.throttle,
                steer_adjust: self.adjust.steer,
                cost: outcome.best_cost,
            });
        } else {
            self.soft_failure("Correction", "no trial produced a finite cost");
        }

        // The old prediction no longer describes the corrected vehicle
        self.snapshot = SimulationSnapshot::default();
        self.live_tick = 0;
        self.next_prediction = Deadline::at(now_s);

        DriveMode::Live
    }

    // ---- HELPERS ----

    fn after_calibration(&self) -> DriveMode {
        if self.params.target_run.enabled && self.goal.is_some() {
            DriveMode::TargetRun(None)
        } else {
            DriveMode::Live
        }
    }

    fn record_calibration(&mut self, controls: Controls, telemetry: &TelemetryBuffer) {
        let (start, end) = match (telemetry.path().first(), telemetry.last_pose()) {
            (Some(s), Some(e)) => (*s, *e),
            _ => {
                self.soft_failure("Calibration point", "the run recorded no samples");
                return;
            }
        };

        let entry = self.control_map.insert(controls, &start, &end);
        self.emit(DriveEvent::CalibrationPoint {
            throttle: controls.throttle,
            steer: controls.steer,
            offset_x: entry.end_offset[0],
            offset_y: entry.end_offset[1],
            heading_change_rad: entry.heading_change_rad,
        });
    }

    fn complete_trial(&mut self, search: &mut DiagnosticSearch, result: TestRunResult, cost: f64) {
        self.emit(DriveEvent::TrialScored {
            index: result.index,
            cost,
            reached_goal: result.reached_goal,
        });
        search.complete_trial(result, cost);
        self.tm.trials_run += 1;
    }

    fn finish_at_goal(&mut self) {
        let runtime_s = self.live_ticks as f64 * self.params.tick_period_s;
        self.tm.goal_reached = true;
        self.emit(DriveEvent::GoalReached { runtime_s });

        let score = self
            .target_record
            .as_ref()
            .map(|target| score_run(&self.live_path, runtime_s, target));

        match score {
            Some(Some(score)) => {
                self.run_score = Some(score);
                self.emit(DriveEvent::RunScored(score));
            }
            Some(None) => self.emit(DriveEvent::ScoreSkipped {
                reason: "the live or target path is empty".into(),
            }),
            None => self.emit(DriveEvent::ScoreSkipped {
                reason: "no target run was captured".into(),
            }),
        }
    }

    fn update_tm<W: World + ?Sized>(&mut self, world: &W) {
        self.tm.mode = self.mode.to_string();
        self.tm.time_s = self.clock.now_s();
        self.tm.live_tick = self.live_tick;
        self.tm.live_pose = world.pose(self.live_id());
        self.tm.throttle_adjust = self.adjust.throttle;
        self.tm.steer_adjust = self.adjust.steer;
    }

    fn emit(&mut self, event: DriveEvent) {
        let now_s = self.clock.now_s();
        self.sink.emit(now_s, event);
    }

    fn soft_failure<E: Display>(&mut self, context: &str, reason: E) {
        self.emit(DriveEvent::SoftFailure {
            context: context.into(),
            reason: reason.to_string(),
        });
    }
}

impl Display for DriveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveMode::Calibrate(_) => write!(f, "DriveMode::Calibrate"),
            DriveMode::TargetRun(_) => write!(f, "DriveMode::TargetRun"),
            DriveMode::Live => write!(f, "DriveMode::Live"),
            DriveMode::Predict(_) => write!(f, "DriveMode::Predict"),
            DriveMode::Search(_) => write!(f, "DriveMode::Search"),
            DriveMode::Finished => write!(f, "DriveMode::Finished"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn within_goal(goal: Option<&Vector3<f64>>, radius: f64, pose: &Pose) -> bool {
    match goal {
        Some(g) => (pose.position2() - Vector2::new(g[0], g[1])).norm() <= radius,
        None => false,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        calib::CalibrationParams,
        clock::TickClock,
        events::MemorySink,
        world::{Actuation, FaultKind, FaultSpec, ToySim, ToySimParams},
    };

    const DT: f64 = 0.05;

    fn test_params() -> DriveParams {
        let mut params = DriveParams::default();
        params.tick_period_s = DT;
        params.horizon_s = 1.0;
        params.prediction_period_s = 2.0;
        params.trial_horizon_s = 2.0;
        params.max_episode_s = 120.0;
        params.divergence.landmark_sample_interval_ticks = 10;
        params
    }

    fn mgr(sim: &ToySim, params: DriveParams) -> DriveMgr<TickClock, MemorySink> {
        DriveMgr::new(params, TickClock::new(), MemorySink::new(), sim, sim.live_id()).unwrap()
    }

    /// Step until the predicate holds or the step limit is hit, returning the number of steps.
    fn run_until<F>(mgr: &mut DriveMgr<TickClock, MemorySink>, sim: &mut ToySim, limit: usize, pred: F) -> usize
    where
        F: Fn(&DriveMgr<TickClock, MemorySink>) -> bool,
    {
        for i in 0..limit {
            if pred(mgr) {
                return i;
            }
            mgr.step(sim, DT);
            sim.advance(DT);
            assert_eq!(mgr.fleet().count_role(VehicleRole::LiveVehicle), 1);
        }
        limit
    }

    #[test]
    fn test_target_run_then_prediction() {
        let mut sim = ToySim::new(ToySimParams::default());
        let mut mgr = mgr(&sim, test_params());
        assert!(matches!(mgr.mode(), DriveMode::TargetRun(None)));

        mgr.step(&mut sim, DT);
        sim.advance(DT);
        assert!(matches!(mgr.mode(), DriveMode::TargetRun(Some(_))));
        assert_eq!(mgr.fleet().count_role(VehicleRole::TargetShadow), 1);

        let steps = run_until(&mut mgr, &mut sim, 5000, |m| matches!(m.mode(), DriveMode::Predict(_)));
        assert!(steps < 5000);

        let record = mgr.target_record().unwrap();
        assert!(record.runtime_s > 0.0);
        assert_eq!(mgr.sink().count("TargetRunCaptured"), 1);
        assert_eq!(mgr.sink().count("PredictionStarted"), 1);

        // The live vehicle hasn't moved yet
        assert_eq!(sim.pose(sim.live_id()).unwrap(), mgr.start_state.pose);
    }

    #[test]
    fn test_nominal_episode() {
        let mut sim = ToySim::new(ToySimParams::default());
        let mut mgr = mgr(&sim, test_params());

        let steps = run_until(&mut mgr, &mut sim, 10_000, |m| m.is_finished());
        assert!(steps < 10_000);

        assert_eq!(mgr.sink().count("GoalReached"), 1);
        assert!(mgr.get_tm().goal_reached);
        assert_eq!(mgr.sink().count("DivergenceDetected"), 0);
        assert_eq!(mgr.sink().count("SoftFailure"), 0);
        assert!(mgr.sink().count("PredictionResolved") > 1);
        assert_eq!(mgr.adjust(), Controls::default());

        // The live run repeats the target run
        let score = mgr.run_score().unwrap();
        assert!(score.position_hausdorff < 1.0);
        assert!(score.orientation_hausdorff < 1e-6);
        assert!(score.runtime_error_sq < 1e-6);
    }

    #[test]
    fn test_steering_fault_is_corrected() {
        let mut sim_params = ToySimParams::default();
        sim_params.faults.push(FaultSpec {
            start_s: 0.0,
            kind: FaultKind::SteerDrift { bias: -0.15 },
        });
        let mut sim = ToySim::new(sim_params);
        let mut params = test_params();
        params.horizon_s = 2.0;
        params.prediction_period_s = 4.0;
        params.max_episode_s = 300.0;
        params.num_test_cars = 4;
        params.divergence.landmark_sample_interval_ticks = 400;
        let mut mgr = mgr(&sim, params);

        let steps = run_until(&mut mgr, &mut sim, 20_000, |m| m.is_finished());
        assert!(steps < 20_000);

        // The drive gets there rather than running out of time
        assert_eq!(mgr.sink().count("GoalReached"), 1);
        assert_eq!(mgr.sink().count("EpisodeTimedOut"), 0);
        assert!(mgr.get_tm().goal_reached);

        let searches = mgr.sink().count("SearchStarted");
        assert!(searches >= 1);
        assert_eq!(mgr.sink().count("TrialStarted"), 4 * searches);
        assert_eq!(mgr.sink().count("TrialScored"), 4 * searches);
        assert_eq!(mgr.sink().count("CorrectionApplied"), searches);
        assert_eq!(mgr.get_tm().searches_completed, searches);
        assert!(!mgr.search_in_progress());

        // The fault pulls left, so the correction steers right
        assert!(mgr.adjust().steer > 0.0);

        // Trials never outlive their search
        assert_eq!(sim.num_instances(), 1);
    }

    #[test]
    fn test_no_goal_times_out() {
        let mut sim_params = ToySimParams::default();
        sim_params.goal = None;
        let mut sim = ToySim::new(sim_params);
        let mut params = test_params();
        params.max_episode_s = 10.0;
        let mut mgr = mgr(&sim, params);

        // No target run without a goal
        assert!(matches!(mgr.mode(), DriveMode::Live));
        assert_eq!(mgr.sink().count("SoftFailure"), 1);

        let steps = run_until(&mut mgr, &mut sim, 1000, |m| m.is_finished());
        assert!(steps < 1000);
        assert_eq!(mgr.sink().count("EpisodeTimedOut"), 1);
        assert!(mgr.run_score().is_none());
    }

    #[test]
    fn test_calibration_builds_control_map() {
        let mut sim = ToySim::new(ToySimParams::default());
        let mut params = test_params();
        params.calibration = CalibrationParams {
            enabled: true,
            throttles: vec![0.5, 1.0],
            steers: vec![-0.5, 0.5],
            duration_s: 0.5,
        };
        let mut mgr = mgr(&sim, params);
        assert!(matches!(mgr.mode(), DriveMode::Calibrate(_)));

        let steps = run_until(&mut mgr, &mut sim, 1000, |m| !matches!(m.mode(), DriveMode::Calibrate(_)));
        assert!(steps < 1000);

        assert_eq!(mgr.control_map().len(), 4);
        assert_eq!(mgr.sink().count("CalibrationComplete"), 1);
        assert!(matches!(mgr.mode(), DriveMode::TargetRun(None)));

        // Steering right ends up to the right
        let right = mgr
            .control_map()
            .entries()
            .iter()
            .find(|e| e.controls == Controls::new(1.0, 0.5))
            .unwrap();
        assert!(right.end_offset[1] < 0.0);
        assert!(right.heading_change_rad < 0.0);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let sim = ToySim::new(ToySimParams::default());
        let mut params = test_params();
        params.num_test_cars = 0;

        assert!(matches!(
            DriveMgr::new(params, TickClock::new(), MemorySink::new(), &sim, sim.live_id()),
            Err(DriveMgrError::InvalidParams(_))
        ));
        assert!(matches!(
            DriveMgr::new(test_params(), TickClock::new(), MemorySink::new(), &sim, InstanceId(42)),
            Err(DriveMgrError::LiveStateUnavailable(_))
        ));
    }
}
