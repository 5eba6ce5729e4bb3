//! # Simulation snapshots
//!
//! Immutable records harvested from completed shadow runs. A [`SimulationSnapshot`] is the
//! expected future the live vehicle is compared against, a [`TargetRunRecord`] is the baseline
//! run to the goal used for the end of episode score.
//!
//! Both are only ever built in one go from a finished [`TelemetryBuffer`] and are replaced
//! wholesale, never mutated in place.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Vector3;
use serde::Serialize;

use crate::{telemetry::TelemetryBuffer, veh::Pose, world::LandmarkId};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One completed prediction run.
///
/// A default snapshot is empty and not ready. A ready snapshot always has a non-empty path of the
/// same length as its velocities and RPMs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationSnapshot {
    final_pose: Pose,
    final_gear: i32,
    path: Vec<Pose>,
    velocities: Vec<Vector3<f64>>,
    rpms: Vec<f64>,
    landmarks_by_sample: BTreeMap<usize, BTreeSet<LandmarkId>>,
    landmark_interval_ticks: usize,
    is_ready: bool,
}

/// The baseline run from the start to the goal under nominal control.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRunRecord {
    pub final_pose: Pose,
    pub path: Vec<Pose>,
    pub velocities: Vec<Vector3<f64>>,
    pub rpms: Vec<f64>,

    /// Time taken to reach the goal
    pub runtime_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("The telemetry buffer is empty")]
    Empty,

    #[error(
        "Telemetry sequences have mismatched lengths (path: {path}, velocities: {velocities}, \
         rpms: {rpms})"
    )]
    LengthMismatch {
        path: usize,
        velocities: usize,
        rpms: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimulationSnapshot {
    /// Build a ready snapshot from a completed telemetry buffer.
    pub fn from_telemetry(buffer: TelemetryBuffer) -> Result<Self, SnapshotError> {
        check_lengths(&buffer)?;

        let landmark_interval_ticks = buffer.landmark_interval_ticks();
        let final_pose = *buffer.path.last().ok_or(SnapshotError::Empty)?;

        Ok(Self {
            final_pose,
            final_gear: buffer.last_gear,
            path: buffer.path,
            velocities: buffer.velocities,
            rpms: buffer.rpms,
            landmarks_by_sample: buffer.landmarks,
            landmark_interval_ticks,
            is_ready: true,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// Number of ticks in the snapshot, zero if not ready.
    pub fn len(&self) -> usize {
        if self.is_ready {
            self.rpms.len()
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pose_at(&self, tick: usize) -> Option<&Pose> {
        self.ready()?.path.get(tick)
    }

    pub fn velocity_at(&self, tick: usize) -> Option<&Vector3<f64>> {
        self.ready()?.velocities.get(tick)
    }

    pub fn rpm_at(&self, tick: usize) -> Option<f64> {
        self.ready()?.rpms.get(tick).copied()
    }

    /// Landmarks seen at the given landmark sample, `None` if that sample was never taken.
    pub fn landmarks_at_sample(&self, sample: usize) -> Option<&BTreeSet<LandmarkId>> {
        self.ready()?.landmarks_by_sample.get(&sample)
    }

    pub fn landmark_interval_ticks(&self) -> usize {
        self.landmark_interval_ticks
    }

    pub fn start_pose(&self) -> Option<&Pose> {
        self.pose_at(0)
    }

    pub fn final_pose(&self) -> Option<&Pose> {
        self.ready().map(|s| &s.final_pose)
    }

    pub fn final_gear(&self) -> Option<i32> {
        self.ready().map(|s| s.final_gear)
    }

    pub fn path(&self) -> &[Pose] {
        match self.ready() {
            Some(s) => &s.path,
            None => &[],
        }
    }

    fn ready(&self) -> Option<&Self> {
        if self.is_ready {
            Some(self)
        } else {
            None
        }
    }
}

impl TargetRunRecord {
    pub fn from_telemetry(buffer: TelemetryBuffer, runtime_s: f64) -> Result<Self, SnapshotError> {
        check_lengths(&buffer)?;

        let final_pose = *buffer.path.last().ok_or(SnapshotError::Empty)?;

        Ok(Self {
            final_pose,
            path: buffer.path,
            velocities: buffer.velocities,
            rpms: buffer.rpms,
            runtime_s,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_lengths(buffer: &TelemetryBuffer) -> Result<(), SnapshotError> {
    if buffer.is_empty() {
        return Err(SnapshotError::Empty);
    }

    if buffer.path.len() != buffer.rpms.len() || buffer.path.len() != buffer.velocities.len() {
        return Err(SnapshotError::LengthMismatch {
            path: buffer.path.len(),
            velocities: buffer.velocities.len(),
            rpms: buffer.rpms.len(),
        });
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{veh::VehicleState, world::RoadSide, world::Sensing};

    struct NoLandmarks;

    impl Sensing for NoLandmarks {
        fn sweep_for_landmarks(&self, _from: &Pose) -> BTreeSet<LandmarkId> {
            BTreeSet::new()
        }

        fn landmark_side(&self, _id: LandmarkId) -> Option<RoadSide> {
            None
        }
    }

    fn buffer(len: usize) -> TelemetryBuffer {
        let mut buf = TelemetryBuffer::new(400);
        for i in 0..len {
            let mut state = VehicleState::at_rest(Pose::from_xy_heading(i as f64, 0.0, 0.0));
            state.engine_rpm = 1000.0;
            state.gear = 1;
            buf.record(&state, &NoLandmarks);
        }
        buf
    }

    #[test]
    fn test_ready_snapshot_lengths() {
        let snap = SimulationSnapshot::from_telemetry(buffer(10)).unwrap();

        assert!(snap.is_ready());
        assert_eq!(snap.len(), 10);
        assert_eq!(snap.path().len(), snap.velocities.len());
        assert_eq!(snap.path().len(), snap.rpms.len());
        assert_eq!(snap.final_pose().unwrap().position[0], 9.0);
        assert_eq!(snap.final_gear(), Some(1));
        assert!(snap.landmarks_at_sample(0).is_some());
        assert!(snap.landmarks_at_sample(1).is_none());
    }

    #[test]
    fn test_unready_snapshot_exposes_nothing() {
        let snap = SimulationSnapshot::default();

        assert!(!snap.is_ready());
        assert_eq!(snap.len(), 0);
        assert!(snap.pose_at(0).is_none());
        assert!(snap.rpm_at(0).is_none());
        assert!(snap.final_pose().is_none());
        assert!(snap.path().is_empty());
    }

    #[test]
    fn test_bad_buffers_rejected() {
        assert!(matches!(
            SimulationSnapshot::from_telemetry(buffer(0)),
            Err(SnapshotError::Empty)
        ));

        let mut buf = buffer(3);
        buf.rpms.pop();
        assert!(matches!(
            SimulationSnapshot::from_telemetry(buf),
            Err(SnapshotError::LengthMismatch { .. })
        ));

        let record = TargetRunRecord::from_telemetry(buffer(5), 2.0).unwrap();
        assert_eq!(record.path.len(), 5);
        assert_eq!(record.runtime_s, 2.0);
    }
}
