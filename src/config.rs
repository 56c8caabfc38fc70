use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Complete pairs needed before a solve is attempted.
    pub min_correspondences: usize,
    /// Undistort image points before solving and distort reprojections.
    pub apply_distortion: bool,
    /// Polish the closed-form pose with Levenberg-Marquardt.
    pub refine: bool,
    pub max_refine_iterations: usize,
    /// Below this `sqrt(R00^2 + R10^2)` the Euler decomposition is treated as gimbal locked.
    pub singular_threshold: f64,
    /// Relative spread under which model points count as collinear.
    pub degeneracy_eps: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            min_correspondences: 4,
            apply_distortion: true,
            refine: true,
            max_refine_iterations: 20,
            singular_threshold: 1e-6,
            degeneracy_eps: 1e-9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Pick radius of the delete tool, in pixels for image clicks and model units for model clicks.
    pub select_radius: f64,
    pub model_point_capacity: usize,
    pub model_point_scale: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            select_radius: 10.0,
            model_point_capacity: 1000,
            model_point_scale: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub solver: SolverConfig,
    pub editor: EditorConfig,
}
