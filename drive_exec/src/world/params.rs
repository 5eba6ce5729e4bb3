//! Reference world parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::RoadSide;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the [`super::ToySim`] reference world.
///
/// Units: distance units are centimetres, times are seconds, angles are radians.
#[derive(Debug, Clone, Deserialize)]
pub struct ToySimParams {
    /// Distance between the front and rear axles
    pub wheelbase: f64,

    /// Road wheel angle at full steering demand
    pub max_steer_angle_rad: f64,

    /// Longitudinal acceleration at full throttle
    pub engine_accel: f64,

    /// Linear drag coefficient, deceleration per unit speed
    pub drag: f64,

    /// Engine speed at the bottom of each gear
    pub idle_rpm: f64,

    /// Engine speed at the top of each gear
    pub max_rpm: f64,

    /// Width of the speed band covered by a single gear
    pub gear_span: f64,

    /// Number of forward gears
    pub num_gears: i32,

    /// Landmark detection range of the forward sensor sweep
    pub sensor_range: f64,

    /// Half of the sensor's horizontal field of view
    pub sensor_half_fov_rad: f64,

    /// Whether a controller exists to be transferred between instances
    #[serde(default = "default_true")]
    pub controller_present: bool,

    pub start: StartSpec,

    /// Goal position, `None` for a scene without a goal
    pub goal: Option<[f64; 2]>,

    #[serde(default)]
    pub landmarks: Vec<LandmarkSpec>,

    /// Faults injected into the live vehicle, which its diagnostic trials share.
    #[serde(default)]
    pub faults: Vec<FaultSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StartSpec {
    pub x: f64,
    pub y: f64,
    pub heading_rad: f64,

    /// Initial forward speed
    #[serde(default)]
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LandmarkSpec {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub side: RoadSide,
}

/// A fault applied from `start_s` onward.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FaultSpec {
    pub start_s: f64,
    pub kind: FaultKind,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
pub enum FaultKind {
    /// Drag is multiplied by the given factor.
    Drag { factor: f64 },

    /// The given bias is added to every steering demand.
    SteerDrift { bias: f64 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

impl Default for ToySimParams {
    /// A straight road along +X with a goal 150 m ahead and landmarks on both sides.
    fn default() -> Self {
        let mut landmarks = Vec::new();
        for i in 0..6 {
            let x = 1500.0 + 2500.0 * i as f64;
            landmarks.push(LandmarkSpec {
                id: 2 * i,
                x,
                y: 600.0,
                side: RoadSide::Left,
            });
            landmarks.push(LandmarkSpec {
                id: 2 * i + 1,
                x,
                y: -600.0,
                side: RoadSide::Right,
            });
        }

        Self {
            wheelbase: 250.0,
            max_steer_angle_rad: 0.6,
            engine_accel: 600.0,
            drag: 0.3,
            idle_rpm: 800.0,
            max_rpm: 6000.0,
            gear_span: 1200.0,
            num_gears: 5,
            sensor_range: 3000.0,
            sensor_half_fov_rad: 0.8,
            controller_present: true,
            start: StartSpec {
                x: 0.0,
                y: 0.0,
                heading_rad: 0.0,
                speed: 0.0,
            },
            goal: Some([15000.0, 0.0]),
            landmarks,
            faults: Vec::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_repo_params_load() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("params")
            .join("toy_sim.toml");
        let params: ToySimParams = util::params::load_from_path(&path).unwrap();

        assert_eq!(params.goal, Some([15000.0, 0.0]));
        assert_eq!(params.landmarks.len(), 12);
        assert!(params.controller_present);
        assert!(matches!(
            params.faults[0].kind,
            FaultKind::SteerDrift { bias } if bias < 0.0
        ));
    }

    #[test]
    fn test_minimal_params() {
        let params: ToySimParams = util::params::from_str(
            r#"
            wheelbase = 250.0
            max_steer_angle_rad = 0.6
            engine_accel = 600.0
            drag = 0.3
            idle_rpm = 800.0
            max_rpm = 6000.0
            gear_span = 300.0
            num_gears = 5
            sensor_range = 3000.0
            sensor_half_fov_rad = 0.8

            [start]
            x = 0.0
            y = 0.0
            heading_rad = 0.0
            "#,
        )
        .unwrap();

        assert!(params.controller_present);
        assert!(params.goal.is_none());
        assert!(params.landmarks.is_empty());
        assert_eq!(params.start.speed, 0.0);
    }
}
