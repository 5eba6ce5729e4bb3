//! # Drive manager parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::{
    calib::CalibrationParams, diverge::DivergenceParams, search::SearchParams,
    triage::TriageParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the [`super::DriveMgr`] and every stage it runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriveParams {
    /// Fixed simulation tick period
    pub tick_period_s: f64,

    /// Duration of a prediction run
    pub horizon_s: f64,

    /// Time between the starts of consecutive predictions
    pub prediction_period_s: f64,

    /// Duration of a diagnostic trial
    pub trial_horizon_s: f64,

    /// Number of trials in each diagnostic search
    pub num_test_cars: usize,

    /// Nominal throttle demand
    pub default_throttle: f64,

    /// Nominal steer demand with the vehicle pointing at the goal
    pub default_steer: f64,

    /// Steer demand per radian of heading error to the goal, 0 to hold the nominal steer
    pub heading_gain: f64,

    /// Distance from the goal at which it is considered reached
    pub goal_radius: f64,

    /// Episode time after which the drive is abandoned
    pub max_episode_s: f64,

    /// Distance by which the progress check distance is normalised
    pub progress_scale: f64,

    /// Normalised distance below which the live vehicle is considered on track
    pub progress_threshold: f64,

    /// Seed for trial sampling
    pub rng_seed: u64,

    pub divergence: DivergenceParams,

    pub triage: TriageParams,

    pub search: SearchParams,

    pub target_run: TargetRunParams,

    pub calibration: CalibrationParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetRunParams {
    /// If false no target run is captured and the run is not scored
    pub enabled: bool,

    /// Time after which a target shadow that hasn't reached the goal is abandoned
    pub max_duration_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for DriveParams {
    fn default() -> Self {
        Self {
            tick_period_s: 0.01,
            horizon_s: 5.0,
            prediction_period_s: 10.0,
            trial_horizon_s: 10.0,
            num_test_cars: 2,
            default_throttle: 0.5,
            default_steer: 0.0,
            heading_gain: 0.5,
            goal_radius: 300.0,
            max_episode_s: 300.0,
            progress_scale: 1000.0,
            progress_threshold: 0.5,
            rng_seed: 0,
            divergence: DivergenceParams::default(),
            triage: TriageParams::default(),
            search: SearchParams::default(),
            target_run: TargetRunParams::default(),
            calibration: CalibrationParams::default(),
        }
    }
}

impl Default for TargetRunParams {
    fn default() -> Self {
        Self {
            enabled: true,
            max_duration_s: 60.0,
        }
    }
}

impl DriveParams {
    /// Check the parameters describe a runnable episode.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.tick_period_s > 0.0) {
            return Err(format!("tick_period_s must be positive (got {})", self.tick_period_s));
        }
        if self.horizon_s < self.tick_period_s {
            return Err(format!(
                "horizon_s ({}) must be at least one tick ({})",
                self.horizon_s, self.tick_period_s
            ));
        }
        if self.trial_horizon_s < self.tick_period_s {
            return Err(format!(
                "trial_horizon_s ({}) must be at least one tick ({})",
                self.trial_horizon_s, self.tick_period_s
            ));
        }
        if self.prediction_period_s < self.horizon_s {
            return Err(format!(
                "prediction_period_s ({}) must not be shorter than horizon_s ({})",
                self.prediction_period_s, self.horizon_s
            ));
        }
        if self.num_test_cars == 0 {
            return Err("num_test_cars must be at least 1".into());
        }
        if self.divergence.landmark_sample_interval_ticks == 0 {
            return Err("divergence.landmark_sample_interval_ticks must be at least 1".into());
        }

        Ok(())
    }

    pub fn horizon_ticks(&self) -> usize {
        util::time::seconds_to_ticks(self.horizon_s, self.tick_period_s)
    }

    pub fn trial_horizon_ticks(&self) -> usize {
        util::time::seconds_to_ticks(self.trial_horizon_s, self.tick_period_s)
    }

    pub fn target_run_ticks(&self) -> usize {
        util::time::seconds_to_ticks(self.target_run.max_duration_s, self.tick_period_s)
    }

    pub fn calibration_ticks(&self) -> usize {
        util::time::seconds_to_ticks(self.calibration.duration_s, self.tick_period_s)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
