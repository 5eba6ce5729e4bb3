//! Divergence detector parameters

use serde::Deserialize;

/// Thresholds above which the live vehicle is considered to have diverged from the prediction.
///
/// The defaults are tuned for an engine working in centimetres, they are not unit-normalised.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DivergenceParams {
    /// Ground plane distance between live and predicted positions
    pub location_threshold: f64,

    /// Angular distance between live and predicted attitudes
    pub rotation_threshold_rad: f64,

    /// Absolute engine speed difference
    pub rpm_threshold: f64,

    /// Number of ticks between landmark sweeps
    pub landmark_sample_interval_ticks: usize,
}

impl Default for DivergenceParams {
    fn default() -> Self {
        Self {
            location_threshold: 800.0,
            rotation_threshold_rad: 0.2,
            rpm_threshold: 90.0,
            landmark_sample_interval_ticks: 400,
        }
    }
}
