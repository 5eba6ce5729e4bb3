//! # Divergence detector
//!
//! Compares the live vehicle against the current prediction once per live tick. Each check is
//! independent and raises its own flag, the combination is passed on to triage.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;

pub use params::DivergenceParams;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::BTreeSet, fmt::Display};

use serde::Serialize;

use crate::{
    snapshot::SimulationSnapshot,
    veh::VehicleState,
    world::{LandmarkId, RoadSide, Sensing},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Which axes the live vehicle has diverged on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DivergenceFlags {
    pub location: bool,
    pub rotation: bool,
    pub rpm: bool,
    pub camera: bool,
}

/// Per-side counts of landmarks which differ from the prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LandmarkMismatch {
    /// Expected on the left but not seen
    pub left_missed: usize,

    /// Expected on the right but not seen
    pub right_missed: usize,

    /// Seen on the left but not expected
    pub left_extra: usize,

    /// Seen on the right but not expected
    pub right_extra: usize,
}

/// Result of one divergence check.
#[derive(Debug, Clone, Default)]
pub struct DivergenceReport {
    pub tick: usize,
    pub flags: DivergenceFlags,

    /// Ground plane distance from the predicted position
    pub location_error: Option<f64>,

    /// Angular distance from the predicted attitude
    pub rotation_error: Option<f64>,

    /// Live RPM minus predicted RPM
    pub rpm_error: Option<f64>,

    pub landmarks: Option<LandmarkMismatch>,

    /// Number of individual comparisons made
    pub comparisons: usize,
}

#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    params: DivergenceParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DivergenceFlags {
    pub fn any(&self) -> bool {
        self.location || self.rotation || self.rpm || self.camera
    }

    pub fn count(&self) -> usize {
        [self.location, self.rotation, self.rpm, self.camera]
            .iter()
            .filter(|f| **f)
            .count()
    }
}

impl Display for DivergenceFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = [
            (self.location, "location"),
            (self.rotation, "rotation"),
            (self.rpm, "rpm"),
            (self.camera, "camera"),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("+"))
        }
    }
}

impl LandmarkMismatch {
    /// Classify the difference between the expected and seen landmark sets by road side.
    ///
    /// Landmarks with no known side are not counted.
    pub fn between<S: Sensing + ?Sized>(
        expected: &BTreeSet<LandmarkId>,
        seen: &BTreeSet<LandmarkId>,
        sensing: &S,
    ) -> Self {
        let mut mismatch = Self::default();

        for id in expected.difference(seen) {
            match sensing.landmark_side(*id) {
                Some(RoadSide::Left) => mismatch.left_missed += 1,
                Some(RoadSide::Right) => mismatch.right_missed += 1,
                None => (),
            }
        }

        for id in seen.difference(expected) {
            match sensing.landmark_side(*id) {
                Some(RoadSide::Left) => mismatch.left_extra += 1,
                Some(RoadSide::Right) => mismatch.right_extra += 1,
                None => (),
            }
        }

        mismatch
    }
}

impl DivergenceDetector {
    pub fn new(params: DivergenceParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DivergenceParams {
        &self.params
    }

    /// Compare the live state at the given tick against the snapshot.
    ///
    /// If the snapshot isn't ready or has no sample for this tick no comparison is made and no
    /// flag is raised.
    pub fn check<S: Sensing + ?Sized>(
        &self,
        tick: usize,
        live: &VehicleState,
        snapshot: &SimulationSnapshot,
        sensing: &S,
    ) -> DivergenceReport {
        let mut report = DivergenceReport {
            tick,
            ..Default::default()
        };

        if tick >= snapshot.len() {
            return report;
        }

        // Location and rotation
        if let Some(expected) = snapshot.pose_at(tick) {
            let location_error = expected.dist_2d(&live.pose);
            let rotation_error = expected.angular_distance(&live.pose);

            report.flags.location = location_error > self.params.location_threshold;
            report.flags.rotation = rotation_error > self.params.rotation_threshold_rad;
            report.location_error = Some(location_error);
            report.rotation_error = Some(rotation_error);
            report.comparisons += 2;
        }

        // RPM
        if let Some(expected_rpm) = snapshot.rpm_at(tick) {
            let rpm_error = live.engine_rpm - expected_rpm;

            report.flags.rpm = rpm_error.abs() > self.params.rpm_threshold;
            report.rpm_error = Some(rpm_error);
            report.comparisons += 1;
        }

        // Landmarks, only on landmark sample ticks which the prediction actually sampled
        let interval = snapshot.landmark_interval_ticks().max(1);
        if tick % interval == 0 {
            if let Some(expected) = snapshot.landmarks_at_sample(tick / interval) {
                let seen = sensing.sweep_for_landmarks(&live.pose);

                report.flags.camera = *expected != seen;
                report.landmarks = Some(LandmarkMismatch::between(expected, &seen, sensing));
                report.comparisons += 1;
            }
        }

        report
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{telemetry::TelemetryBuffer, veh::Pose};
    use std::cell::Cell;

    /// Sensor returning a fixed set and counting sweeps. Odd ids are on the right.
    struct FixedSensor {
        seen: BTreeSet<LandmarkId>,
        sweeps: Cell<usize>,
    }

    impl FixedSensor {
        fn new(ids: &[u32]) -> Self {
            Self {
                seen: ids.iter().map(|i| LandmarkId(*i)).collect(),
                sweeps: Cell::new(0),
            }
        }
    }

    impl Sensing for FixedSensor {
        fn sweep_for_landmarks(&self, _from: &Pose) -> BTreeSet<LandmarkId> {
            self.sweeps.set(self.sweeps.get() + 1);
            self.seen.clone()
        }

        fn landmark_side(&self, id: LandmarkId) -> Option<RoadSide> {
            if id.0 % 2 == 0 {
                Some(RoadSide::Left)
            } else {
                Some(RoadSide::Right)
            }
        }
    }

    fn state(x: f64, y: f64, rpm: f64) -> VehicleState {
        let mut s = VehicleState::at_rest(Pose::from_xy_heading(x, y, 0.0));
        s.engine_rpm = rpm;
        s
    }

    /// Straight line prediction along +X, 100 units per tick at 1000 RPM.
    fn straight_snapshot(len: usize, sensor: &FixedSensor) -> SimulationSnapshot {
        let mut buf = TelemetryBuffer::new(5);
        for i in 0..len {
            buf.record(&state(100.0 * i as f64, 0.0, 1000.0), sensor);
        }
        SimulationSnapshot::from_telemetry(buf).unwrap()
    }

    #[test]
    fn test_no_comparisons_past_snapshot_end() {
        let sensor = FixedSensor::new(&[0, 1]);
        let snap = straight_snapshot(10, &sensor);
        let sweeps_before = sensor.sweeps.get();
        let detector = DivergenceDetector::new(DivergenceParams::default());

        // Wildly different live state, but the snapshot has no tick 15
        let report = detector.check(15, &state(1e6, 1e6, 0.0), &snap, &sensor);

        assert_eq!(report.comparisons, 0);
        assert!(!report.flags.any());
        assert_eq!(sensor.sweeps.get(), sweeps_before);

        // Same for a snapshot that isn't ready
        let report = detector.check(0, &state(1e6, 0.0, 0.0), &SimulationSnapshot::default(), &sensor);
        assert_eq!(report.comparisons, 0);
        assert!(!report.flags.any());
    }

    #[test]
    fn test_location_flags_monotonic_in_threshold() {
        let sensor = FixedSensor::new(&[]);
        let snap = straight_snapshot(20, &sensor);

        // Live run drifting sideways by 100 units per tick
        let live: Vec<VehicleState> = (0..20)
            .map(|i| state(100.0 * i as f64, 100.0 * i as f64, 1000.0))
            .collect();

        let count_flags = |threshold: f64| {
            let detector = DivergenceDetector::new(DivergenceParams {
                location_threshold: threshold,
                ..Default::default()
            });
            live.iter()
                .enumerate()
                .filter(|(i, s)| detector.check(*i, s, &snap, &sensor).flags.location)
                .count()
        };

        let counts: Vec<usize> = [0.0, 200.0, 800.0, 1500.0, 5000.0]
            .iter()
            .map(|t| count_flags(*t))
            .collect();

        for pair in counts.windows(2) {
            assert!(pair[1] <= pair[0]);
        }

        // Ticks 9 to 19 are more than 800 away
        assert_eq!(counts[2], 11);
        assert_eq!(counts[4], 0);
    }

    #[test]
    fn test_rotation_and_rpm_flags() {
        let sensor = FixedSensor::new(&[]);
        let snap = straight_snapshot(10, &sensor);
        let detector = DivergenceDetector::new(DivergenceParams::default());

        let mut live = state(300.0, 0.0, 1100.0);
        live.pose = Pose::from_xy_heading(300.0, 0.0, 0.3);
        let report = detector.check(3, &live, &snap, &sensor);

        assert!(report.flags.rotation);
        assert!(report.flags.rpm);
        assert!(!report.flags.location);
        assert!((report.rpm_error.unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(report.flags.to_string(), "rotation+rpm");
    }

    #[test]
    fn test_landmark_mismatch_by_side() {
        // Prediction saw 2 (left) and 3 (right), live sees 3 and 5 (right)
        let predicted = FixedSensor::new(&[2, 3]);
        let snap = straight_snapshot(10, &predicted);
        let live_sensor = FixedSensor::new(&[3, 5]);
        let detector = DivergenceDetector::new(DivergenceParams::default());

        let report = detector.check(5, &state(500.0, 0.0, 1000.0), &snap, &live_sensor);

        assert!(report.flags.camera);
        assert_eq!(
            report.landmarks,
            Some(LandmarkMismatch {
                left_missed: 1,
                right_missed: 0,
                left_extra: 0,
                right_extra: 1,
            })
        );

        // Off a landmark sample tick no sweep is made
        let sweeps = live_sensor.sweeps.get();
        let report = detector.check(6, &state(600.0, 0.0, 1000.0), &snap, &live_sensor);
        assert!(!report.flags.camera);
        assert_eq!(live_sensor.sweeps.get(), sweeps);
    }
}
