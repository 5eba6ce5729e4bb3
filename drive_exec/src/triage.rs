//! # Error triage
//!
//! Turns a set of divergence flags into a coarse hypothesis about what has gone wrong, which is
//! then used to bias the diagnostic search. Every raised flag contributes to the hypothesis, with
//! the first flag to resolve a direction taking precedence in the order camera, rotation,
//! location, RPM.
//!
//! The triage also owns the search bookkeeping: whether a search is in progress and how many
//! trials remain.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Display;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::{
    diverge::DivergenceReport,
    snapshot::SimulationSnapshot,
    veh::{VehicleRole, VehicleState},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Predictions shorter than this give no usable direction of travel.
const MIN_PREDICTION_LENGTH: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriageParams {
    /// Margin, as a fraction of the predicted path length, within which progress along the path is
    /// considered as expected
    pub progress_tolerance: f64,

    /// Speed difference above which the vehicle is considered too fast or too slow when progress
    /// along the path is inconclusive
    pub speed_threshold: f64,
}

/// Coarse guess at the cause of a divergence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticHypothesis {
    pub try_throttle: bool,
    pub try_steer: bool,
    pub drift: Drift,
    pub speed_bias: SpeedBias,
}

/// Everything triage needs to know about the divergence being classified.
pub struct TriageInput<'a> {
    pub report: &'a DivergenceReport,
    pub live: &'a VehicleState,
    pub snapshot: &'a SimulationSnapshot,
}

/// Error triage classifier and search bookkeeping.
#[derive(Debug, Clone)]
pub struct ErrorTriage {
    params: TriageParams,
    num_test_cars: usize,
    in_progress: bool,
    trial_counter: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Side the live vehicle has drifted to relative to the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Drift {
    Left,
    Right,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedBias {
    Reversed,
    TooSlow,
    Unknown,
    TooFast,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for TriageParams {
    fn default() -> Self {
        Self {
            progress_tolerance: 0.1,
            speed_threshold: 20.0,
        }
    }
}

impl Default for Drift {
    fn default() -> Self {
        Drift::Unknown
    }
}

impl Default for SpeedBias {
    fn default() -> Self {
        SpeedBias::Unknown
    }
}

impl Display for DiagnosticHypothesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "throttle: {}, steer: {}, drift: {:?}, speed: {:?}",
            self.try_throttle, self.try_steer, self.drift, self.speed_bias
        )
    }
}

impl DiagnosticHypothesis {
    fn set_drift(&mut self, drift: Drift) {
        if self.drift == Drift::Unknown {
            self.drift = drift;
        }
    }

    fn set_speed_bias(&mut self, bias: SpeedBias) {
        if self.speed_bias == SpeedBias::Unknown {
            self.speed_bias = bias;
        }
    }
}

impl ErrorTriage {
    pub fn new(params: TriageParams, num_test_cars: usize) -> Self {
        Self {
            params,
            num_test_cars,
            in_progress: false,
            trial_counter: 0,
        }
    }

    /// Classify a divergence, starting a search if the classification is accepted.
    ///
    /// Returns `None` without touching any state if a search is already in progress, if `role`
    /// isn't the live vehicle, or if no flag is raised.
    pub fn classify(
        &mut self,
        role: VehicleRole,
        input: &TriageInput,
    ) -> Option<DiagnosticHypothesis> {
        let flags = input.report.flags;

        if self.in_progress || role != VehicleRole::LiveVehicle || !flags.any() {
            return None;
        }

        let mut hyp = DiagnosticHypothesis::default();

        if flags.camera {
            if let Some(m) = input.report.landmarks {
                // Drifting right loses the left landmarks and picks up new ones on the right
                let right_evidence = m.left_missed + m.right_extra;
                let left_evidence = m.right_missed + m.left_extra;

                if right_evidence > left_evidence {
                    hyp.set_drift(Drift::Right);
                } else if left_evidence > right_evidence {
                    hyp.set_drift(Drift::Left);
                }
            }
            hyp.try_throttle = true;
            hyp.try_steer = true;
        }

        if flags.rotation {
            hyp.try_steer = true;
        }

        if flags.location {
            hyp.set_drift(side_of_prediction(input.snapshot, input.live));

            match progress_bias(
                input.snapshot,
                input.report.tick,
                input.live,
                self.params.progress_tolerance,
            ) {
                SpeedBias::Unknown => hyp.set_speed_bias(speed_bias_from_velocity(
                    input.snapshot,
                    input.report.tick,
                    input.live,
                    self.params.speed_threshold,
                )),
                bias => hyp.set_speed_bias(bias),
            }

            hyp.try_throttle = true;
            hyp.try_steer = true;
        }

        if flags.rpm {
            match progress_bias(
                input.snapshot,
                input.report.tick,
                input.live,
                self.params.progress_tolerance,
            ) {
                SpeedBias::Unknown => match input.report.rpm_error {
                    Some(e) if e > 0.0 => hyp.set_speed_bias(SpeedBias::TooFast),
                    Some(e) if e < 0.0 => hyp.set_speed_bias(SpeedBias::TooSlow),
                    _ => (),
                },
                bias => hyp.set_speed_bias(bias),
            }

            hyp.set_drift(side_of_prediction(input.snapshot, input.live));
            hyp.try_throttle = true;
        }

        self.in_progress = true;
        self.trial_counter = self.num_test_cars;

        Some(hyp)
    }

    /// Account for the start of one trial, returning false if no trials remain.
    pub fn start_trial(&mut self) -> bool {
        if !self.in_progress || self.trial_counter == 0 {
            return false;
        }

        self.trial_counter -= 1;
        true
    }

    /// End the current search, allowing a new one to be triggered.
    pub fn finish_search(&mut self) {
        self.in_progress = false;
        self.trial_counter = 0;
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn trials_remaining(&self) -> usize {
        self.trial_counter
    }

    pub fn num_test_cars(&self) -> usize {
        self.num_test_cars
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Start of the prediction, and the vector from its start to its end.
fn prediction_line(snapshot: &SimulationSnapshot) -> Option<(Vector2<f64>, Vector2<f64>)> {
    let start = snapshot.start_pose()?.position2();
    let dir = snapshot.final_pose()?.position2() - start;

    if dir.norm() < MIN_PREDICTION_LENGTH {
        None
    } else {
        Some((start, dir))
    }
}

/// Which side of the line from the prediction's start to its end the live vehicle is on.
fn side_of_prediction(snapshot: &SimulationSnapshot, live: &VehicleState) -> Drift {
    let (start, dir) = match prediction_line(snapshot) {
        Some(l) => l,
        None => return Drift::Unknown,
    };

    let rel = live.pose.position2() - start;
    let cross = dir[0] * rel[1] - dir[1] * rel[0];

    if cross > 0.0 {
        Drift::Left
    } else if cross < 0.0 {
        Drift::Right
    } else {
        Drift::Unknown
    }
}

/// Compare progress along the predicted path against where the prediction was at this tick.
fn progress_bias(
    snapshot: &SimulationSnapshot,
    tick: usize,
    live: &VehicleState,
    tolerance: f64,
) -> SpeedBias {
    let (start, dir) = match prediction_line(snapshot) {
        Some(l) => l,
        None => return SpeedBias::Unknown,
    };
    let expected = match snapshot.pose_at(tick.min(snapshot.len().saturating_sub(1))) {
        Some(p) => p.position2(),
        None => return SpeedBias::Unknown,
    };

    let len_sq = dir.norm_squared();
    let t_live = (live.pose.position2() - start).dot(&dir) / len_sq;
    let t_expected = (expected - start).dot(&dir) / len_sq;
    let live_vel = Vector2::new(live.linear_velocity[0], live.linear_velocity[1]);

    if t_live < 0.0 && live_vel.dot(&dir) < 0.0 {
        SpeedBias::Reversed
    } else if t_live < t_expected - tolerance {
        SpeedBias::TooSlow
    } else if t_live > t_expected + tolerance {
        SpeedBias::TooFast
    } else {
        SpeedBias::Unknown
    }
}

/// Compare live speed against the predicted speed at this tick.
fn speed_bias_from_velocity(
    snapshot: &SimulationSnapshot,
    tick: usize,
    live: &VehicleState,
    threshold: f64,
) -> SpeedBias {
    let expected = match snapshot.velocity_at(tick.min(snapshot.len().saturating_sub(1))) {
        Some(v) => Vector2::new(v[0], v[1]).norm(),
        None => return SpeedBias::Unknown,
    };

    let diff = live.speed() - expected;
    if diff > threshold {
        SpeedBias::TooFast
    } else if diff < -threshold {
        SpeedBias::TooSlow
    } else {
        SpeedBias::Unknown
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        diverge::{DivergenceFlags, LandmarkMismatch},
        telemetry::TelemetryBuffer,
        veh::Pose,
        world::{LandmarkId, RoadSide, Sensing},
    };
    use nalgebra::Vector3;
    use std::collections::BTreeSet;

    struct Blind;

    impl Sensing for Blind {
        fn sweep_for_landmarks(&self, _from: &Pose) -> BTreeSet<LandmarkId> {
            BTreeSet::new()
        }

        fn landmark_side(&self, _id: LandmarkId) -> Option<RoadSide> {
            None
        }
    }

    /// Prediction moving along +X at 100 units per tick (2000 units per second at 20 Hz).
    fn snapshot() -> SimulationSnapshot {
        let mut buf = TelemetryBuffer::new(400);
        for i in 0..11 {
            let mut s = VehicleState::at_rest(Pose::from_xy_heading(100.0 * i as f64, 0.0, 0.0));
            s.linear_velocity = Vector3::new(2000.0, 0.0, 0.0);
            s.engine_rpm = 1000.0;
            buf.record(&s, &Blind);
        }
        SimulationSnapshot::from_telemetry(buf).unwrap()
    }

    fn live(x: f64, y: f64, vx: f64) -> VehicleState {
        let mut s = VehicleState::at_rest(Pose::from_xy_heading(x, y, 0.0));
        s.linear_velocity = Vector3::new(vx, 0.0, 0.0);
        s
    }

    fn report(tick: usize, flags: DivergenceFlags) -> DivergenceReport {
        DivergenceReport {
            tick,
            flags,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_twice_keeps_trial_counter() {
        let snap = snapshot();
        let live = live(500.0, 900.0, 2000.0);
        let rep = report(5, DivergenceFlags {
            location: true,
            ..Default::default()
        });
        let input = TriageInput {
            report: &rep,
            live: &live,
            snapshot: &snap,
        };
        let mut triage = ErrorTriage::new(TriageParams::default(), 2);

        assert!(triage.classify(VehicleRole::LiveVehicle, &input).is_some());
        assert!(triage.in_progress());
        assert_eq!(triage.trials_remaining(), 2);

        assert!(triage.start_trial());
        assert_eq!(triage.trials_remaining(), 1);

        // Same flags again while searching must not restart anything
        assert!(triage.classify(VehicleRole::LiveVehicle, &input).is_none());
        assert_eq!(triage.trials_remaining(), 1);

        assert!(triage.start_trial());
        assert!(!triage.start_trial());
        assert_eq!(triage.trials_remaining(), 0);

        triage.finish_search();
        assert!(!triage.in_progress());
        assert!(triage.classify(VehicleRole::LiveVehicle, &input).is_some());
    }

    #[test]
    fn test_guards() {
        let snap = snapshot();
        let live = live(500.0, 900.0, 2000.0);
        let mut triage = ErrorTriage::new(TriageParams::default(), 2);

        let rep = report(5, DivergenceFlags {
            rotation: true,
            ..Default::default()
        });
        let input = TriageInput {
            report: &rep,
            live: &live,
            snapshot: &snap,
        };
        assert!(triage
            .classify(VehicleRole::PredictionShadow, &input)
            .is_none());
        assert!(!triage.in_progress());

        let rep = report(5, DivergenceFlags::default());
        let input = TriageInput {
            report: &rep,
            live: &live,
            snapshot: &snap,
        };
        assert!(triage.classify(VehicleRole::LiveVehicle, &input).is_none());
        assert!(!triage.start_trial());
    }

    #[test]
    fn test_location_drift_and_progress() {
        let snap = snapshot();
        let mut triage = ErrorTriage::new(TriageParams::default(), 2);
        let flags = DivergenceFlags {
            location: true,
            ..Default::default()
        };

        // Left of the line and behind where the prediction was at tick 8
        let rep = report(8, flags);
        let live_state = live(200.0, 900.0, 2000.0);
        let hyp = triage
            .classify(VehicleRole::LiveVehicle, &TriageInput {
                report: &rep,
                live: &live_state,
                snapshot: &snap,
            })
            .unwrap();
        assert_eq!(hyp.drift, Drift::Left);
        assert_eq!(hyp.speed_bias, SpeedBias::TooSlow);
        assert!(hyp.try_throttle && hyp.try_steer);
        triage.finish_search();

        // Right of the line, behind the start and moving backwards
        let rep = report(3, flags);
        let live_state = live(-200.0, -900.0, -500.0);
        let hyp = triage
            .classify(VehicleRole::LiveVehicle, &TriageInput {
                report: &rep,
                live: &live_state,
                snapshot: &snap,
            })
            .unwrap();
        assert_eq!(hyp.drift, Drift::Right);
        assert_eq!(hyp.speed_bias, SpeedBias::Reversed);
        triage.finish_search();

        // On schedule along the path, so the speed comparison decides
        let rep = report(5, flags);
        let live_state = live(500.0, 900.0, 2100.0);
        let hyp = triage
            .classify(VehicleRole::LiveVehicle, &TriageInput {
                report: &rep,
                live: &live_state,
                snapshot: &snap,
            })
            .unwrap();
        assert_eq!(hyp.speed_bias, SpeedBias::TooFast);
    }

    #[test]
    fn test_camera_precedes_location() {
        let snap = snapshot();
        let mut triage = ErrorTriage::new(TriageParams::default(), 2);

        // Landmarks suggest a drift right while the location side test says left
        let rep = DivergenceReport {
            tick: 5,
            flags: DivergenceFlags {
                camera: true,
                location: true,
                ..Default::default()
            },
            landmarks: Some(LandmarkMismatch {
                left_missed: 2,
                right_missed: 0,
                left_extra: 0,
                right_extra: 1,
            }),
            ..Default::default()
        };
        let live_state = live(500.0, 900.0, 2000.0);
        let hyp = triage
            .classify(VehicleRole::LiveVehicle, &TriageInput {
                report: &rep,
                live: &live_state,
                snapshot: &snap,
            })
            .unwrap();

        assert_eq!(hyp.drift, Drift::Right);
        assert!(hyp.try_throttle && hyp.try_steer);
    }

    #[test]
    fn test_rotation_and_rpm() {
        let snap = snapshot();
        let mut triage = ErrorTriage::new(TriageParams::default(), 2);

        let rep = report(5, DivergenceFlags {
            rotation: true,
            ..Default::default()
        });
        let live_state = live(500.0, 0.0, 2000.0);
        let hyp = triage
            .classify(VehicleRole::LiveVehicle, &TriageInput {
                report: &rep,
                live: &live_state,
                snapshot: &snap,
            })
            .unwrap();
        assert!(hyp.try_steer);
        assert!(!hyp.try_throttle);
        assert_eq!(hyp.drift, Drift::Unknown);
        triage.finish_search();

        // On the line and on schedule, so the rpm sign decides
        let rep = DivergenceReport {
            tick: 5,
            flags: DivergenceFlags {
                rpm: true,
                ..Default::default()
            },
            rpm_error: Some(-150.0),
            ..Default::default()
        };
        let hyp = triage
            .classify(VehicleRole::LiveVehicle, &TriageInput {
                report: &rep,
                live: &live_state,
                snapshot: &snap,
            })
            .unwrap();
        assert!(hyp.try_throttle);
        assert!(!hyp.try_steer);
        assert_eq!(hyp.speed_bias, SpeedBias::TooSlow);
        assert_eq!(hyp.drift, Drift::Unknown);
    }
}
