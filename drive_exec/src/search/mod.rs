//! # Diagnostic search
//!
//! Once triage accepts a divergence, a fixed number of trial shadows are run one after the other
//! from the live vehicle's state at the start of the search. Each trial drives under the nominal
//! law plus a candidate correction, sampled around the correction currently applied in the
//! directions chosen by the triage hypothesis. The lowest cost candidate becomes the live
//! vehicle's new correction.
//!
//! [`DiagnosticSearch`] is the bookkeeping for one round. Running the trials in the world is done
//! by the drive manager.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod cost;
mod params;
mod trial;

pub use cost::*;
pub use params::SearchParams;
pub use trial::*;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Vector2, Vector3};
use rand::Rng;
use util::maths::clamp;

use crate::{
    calib::ControlMap,
    snapshot::SimulationSnapshot,
    telemetry::TelemetryBuffer,
    triage::{DiagnosticHypothesis, Drift, ErrorTriage, SpeedBias},
    veh::{Controls, Pose, VehicleState},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One round of the diagnostic search.
#[derive(Debug, Clone)]
pub struct DiagnosticSearch {
    /// Live state at the start of the search, every trial is spawned from this
    pre_search: VehicleState,

    /// The prediction the live vehicle diverged from
    expected: SimulationSnapshot,

    /// Live tick at which the divergence was detected
    divergence_tick: usize,

    /// Tick of a trial compared against the prediction
    horizon_ticks: usize,

    ranges: SamplingRanges,

    /// Deltas for the first trial taken from the control map
    seed: Option<(f64, f64)>,

    trials_started: usize,

    results: Vec<(TestRunResult, f64)>,

    /// Index into `results` of the lowest cost so far
    best: Option<usize>,
}

/// What a finished search round produced.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// The lowest cost trial, `None` if no trial produced a finite cost
    pub best: Option<TestRunResult>,

    pub best_cost: f64,

    pub trials_run: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DiagnosticSearch {
    /// `nominal` is the uncorrected demand at the start of the search and `adjust` the correction
    /// currently applied to the live vehicle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hypothesis: DiagnosticHypothesis,
        pre_search: VehicleState,
        nominal: Controls,
        adjust: Controls,
        expected: SimulationSnapshot,
        divergence_tick: usize,
        horizon_ticks: usize,
        params: &SearchParams,
        control_map: &ControlMap,
    ) -> Self {
        let ranges = sampling_ranges(&hypothesis, adjust, params);

        // With no directional information at all, start from the control map
        let seed = if hypothesis.drift == Drift::Unknown
            && hypothesis.speed_bias == SpeedBias::Unknown
        {
            expected
                .final_pose()
                .map(|end| pre_search.pose.to_local_2d(&end.position2()))
                .and_then(|needed| control_map.nearest(&needed))
                .map(|entry| {
                    ranges.clamp(
                        entry.controls.throttle - nominal.throttle,
                        entry.controls.steer - nominal.steer,
                    )
                })
        } else {
            None
        };

        Self {
            pre_search,
            expected,
            divergence_tick,
            horizon_ticks,
            ranges,
            seed,
            trials_started: 0,
            results: Vec::new(),
            best: None,
        }
    }

    pub fn pre_search(&self) -> &VehicleState {
        &self.pre_search
    }

    pub fn trials_started(&self) -> usize {
        self.trials_started
    }

    /// Plan the next trial, or `None` once the triage has no trials left.
    pub fn next_trial<R: Rng>(
        &mut self,
        triage: &mut ErrorTriage,
        rng: &mut R,
    ) -> Option<TrialPlan> {
        if !triage.start_trial() {
            return None;
        }

        let index = self.trials_started;
        self.trials_started += 1;

        let plan = match (index, self.seed) {
            (0, Some((throttle_delta, steer_delta))) => TrialPlan {
                index,
                throttle_delta,
                steer_delta,
                seeded: true,
            },
            _ => TrialPlan {
                index,
                throttle_delta: sample(rng, self.ranges.throttle),
                steer_delta: sample(rng, self.ranges.steer),
                seeded: false,
            },
        };

        Some(plan)
    }

    /// Score a completed trial from its telemetry.
    ///
    /// The prediction is sampled `horizon_ticks` after the divergence tick, or at its last sample if
    /// it is shorter, and the trial is compared against it at the same point in time. The live
    /// vehicle's state at the start of the search is compared against the same sample.
    pub fn score_trial(
        &self,
        plan: &TrialPlan,
        telemetry: &TelemetryBuffer,
        goal: Option<&Vector3<f64>>,
        goal_radius: f64,
        params: &SearchParams,
    ) -> (TestRunResult, TrialCost) {
        let end_pose = match telemetry.last_pose() {
            Some(p) => *p,
            None => return (TestRunResult::failed(plan), infinite_cost()),
        };

        let goal_dist = |pose: &Pose| {
            goal.map(|g| (pose.position2() - Vector2::new(g[0], g[1])).norm())
        };

        let reached_goal = telemetry
            .path()
            .iter()
            .any(|p| matches!(goal_dist(p), Some(d) if d <= goal_radius));

        let expected_tick =
            (self.divergence_tick + self.horizon_ticks).min(self.expected.len().saturating_sub(1));

        let test_tick = expected_tick
            .saturating_sub(self.divergence_tick)
            .min(telemetry.len() - 1);
        let test = TickSample::new(telemetry.path()[test_tick], telemetry.rpms()[test_tick]);
        let horizon_loss = match (
            self.expected.pose_at(expected_tick),
            self.expected.rpm_at(expected_tick),
        ) {
            (Some(pose), Some(rpm)) => quadratic_loss(
                &TickSample::new(*pose, rpm),
                &test,
                &TickSample::from(&self.pre_search),
            ),
            _ => 0.0,
        };

        let cost = trial_cost(
            params,
            goal_dist(&end_pose),
            horizon_loss,
            (plan.throttle_delta, plan.steer_delta),
            reached_goal,
        );

        (TestRunResult::completed(plan, end_pose, reached_goal), cost)
    }

    /// Record a finished trial. The first trial with the lowest cost is kept.
    pub fn complete_trial(&mut self, result: TestRunResult, cost: f64) {
        let cost = if cost.is_nan() { f64::INFINITY } else { cost };

        let is_best = match self.best {
            Some(i) => cost < self.results[i].1,
            None => true,
        };

        self.results.push((result, cost));

        if is_best {
            self.best = Some(self.results.len() - 1);
        }
    }

    /// End the round.
    pub fn finish(self) -> SearchOutcome {
        let best = self
            .best
            .map(|i| self.results[i])
            .filter(|(_, cost)| cost.is_finite());

        SearchOutcome {
            best: best.map(|(r, _)| r),
            best_cost: best.map(|(_, c)| c).unwrap_or(f64::INFINITY),
            trials_run: self.results.len(),
        }
    }
}

impl SearchOutcome {
    /// Write the winning correction into `adjust`, returning false if there's no winner.
    pub fn apply_to(&self, adjust: &mut Controls) -> bool {
        match self.best {
            Some(ref best) => {
                adjust.throttle = best.throttle_delta;
                adjust.steer = best.steer_delta;
                true
            }
            None => false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Correction sampling ranges implied by a hypothesis.
///
/// The divergence was measured with `adjust` already applied, so candidates are offsets from it. A
/// known bias restricts sampling to the correcting direction and an unknown one allows both. Every
/// candidate stays within the configured maximum correction, and an axis the hypothesis doesn't
/// ask to try is held at its current value.
pub fn sampling_ranges(
    hyp: &DiagnosticHypothesis,
    adjust: Controls,
    params: &SearchParams,
) -> SamplingRanges {
    let t = params.max_throttle_delta;
    let s = params.max_steer_delta;

    let throttle = if hyp.try_throttle {
        match hyp.speed_bias {
            SpeedBias::TooFast => (-t, 0.0),
            SpeedBias::TooSlow => (0.0, t),
            SpeedBias::Reversed => (t / 2.0, t),
            SpeedBias::Unknown => (-t, t),
        }
    } else {
        (0.0, 0.0)
    };

    // Positive steer turns right, so a drift to the left is corrected by steering right
    let steer = if hyp.try_steer {
        match hyp.drift {
            Drift::Left => (0.0, s),
            Drift::Right => (-s, 0.0),
            Drift::Unknown => (-s, s),
        }
    } else {
        (0.0, 0.0)
    };

    SamplingRanges {
        throttle: around(adjust.throttle, throttle, t),
        steer: around(adjust.steer, steer, s),
    }
}

/// Cost assigned to a trial which could not be run.
pub fn infinite_cost() -> TrialCost {
    TrialCost {
        end: f64::INFINITY,
        ..Default::default()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Offset `range` by `current`, limited to `[-max, max]`.
fn around(current: f64, range: (f64, f64), max: f64) -> (f64, f64) {
    (
        clamp(&(current + range.0), &-max, &max),
        clamp(&(current + range.1), &-max, &max),
    )
}

fn sample<R: Rng>(rng: &mut R, range: (f64, f64)) -> f64 {
    if range.1 <= range.0 {
        range.0
    } else {
        rng.gen_range(range.0..=range.1)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
