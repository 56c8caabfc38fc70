//! Camera extrinsics from 2D-3D correspondences.
//!
//! The closed-form SQPnP solution is computed on centered model points and
//! normalized (undistorted) image coordinates, optionally polished with a short
//! Levenberg-Marquardt pass, then scored by its mean pixel reprojection error.

use log::{debug, trace, warn};
use nalgebra as na;
use thiserror::Error;

use crate::config::SolverConfig;
use crate::correspondence::Correspondence;
use crate::distortion::RationalDistortion;
use crate::intrinsics::Intrinsics;
use crate::types::{Point2D, Point3D, PoseResult, RvecTvec, Xyz};

/// Fewest points the underlying PnP algorithm accepts.
pub const MIN_PNP_POINTS: usize = 3;

const LM_LAMBDA_INIT: f64 = 1e-3;
const LM_LAMBDA_MAX: f64 = 1e10;
const LM_MIN_RELATIVE_DECREASE: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoseError {
    #[error("pose solving needs at least {required} complete pairs, got {actual}")]
    InsufficientPoints { required: usize, actual: usize },
    #[error("no pose solution: {0}")]
    SolveFailure(String),
    #[error("invalid intrinsics: {0}")]
    InvalidIntrinsics(String),
}

/// Exponential map from an axis-angle vector to a rotation matrix.
pub fn rodrigues(rvec: &na::Vector3<f64>) -> na::Matrix3<f64> {
    let theta = rvec.norm();
    if theta < 1e-12 {
        return na::Matrix3::identity() + rvec.cross_matrix();
    }
    let k = (rvec / theta).cross_matrix();
    na::Matrix3::identity() + k * theta.sin() + k * k * (1.0 - theta.cos())
}

/// XYZ Euler angles in radians.
///
/// When `sqrt(R00^2 + R10^2)` falls under `singular_threshold` the rotation is
/// gimbal locked and `z` is pinned to zero.
pub fn rotation_matrix_to_euler_xyz(r: &na::Matrix3<f64>, singular_threshold: f64) -> Xyz {
    let sy = (r[(0, 0)] * r[(0, 0)] + r[(1, 0)] * r[(1, 0)]).sqrt();
    if sy >= singular_threshold {
        Xyz {
            x: r[(2, 1)].atan2(r[(2, 2)]),
            y: (-r[(2, 0)]).atan2(sy),
            z: r[(1, 0)].atan2(r[(0, 0)]),
        }
    } else {
        Xyz {
            x: (-r[(1, 2)]).atan2(r[(1, 1)]),
            y: (-r[(2, 0)]).atan2(sy),
            z: 0.0,
        }
    }
}

/// Pinhole camera matrix with an optional lens model.
#[derive(Debug, Clone)]
pub struct Projection {
    k: na::Matrix3<f64>,
    k_inv: na::Matrix3<f64>,
    distortion: Option<RationalDistortion>,
}

impl Projection {
    pub fn new(
        k: na::Matrix3<f64>,
        distortion: Option<RationalDistortion>,
    ) -> Result<Projection, PoseError> {
        let k_inv = k.try_inverse().ok_or_else(|| {
            PoseError::InvalidIntrinsics("camera matrix is not invertible".to_string())
        })?;
        Ok(Projection {
            k,
            k_inv,
            distortion: distortion.filter(|d| !d.is_identity()),
        })
    }

    pub fn from_intrinsics(
        intrinsics: &Intrinsics,
        apply_distortion: bool,
    ) -> Result<Projection, PoseError> {
        let distortion = if apply_distortion {
            intrinsics
                .distortion()?
                .map(|c| RationalDistortion::from_coeffs(&c))
        } else {
            None
        };
        Projection::new(intrinsics.camera_matrix()?, distortion)
    }

    pub fn camera_matrix(&self) -> &na::Matrix3<f64> {
        &self.k
    }

    pub fn has_distortion(&self) -> bool {
        self.distortion.is_some()
    }

    /// Undistorted normalized coordinates of a pixel.
    pub fn normalize(&self, pixel: &Point2D) -> na::Vector2<f64> {
        let n = self.k_inv * na::Vector3::new(pixel.x, pixel.y, 1.0);
        let n = na::Vector2::new(n.x / n.z, n.y / n.z);
        match &self.distortion {
            Some(d) => d.undistort(&n),
            None => n,
        }
    }

    fn pinhole(&self, n: &na::Vector2<f64>) -> na::Vector2<f64> {
        let p = self.k * na::Vector3::new(n.x, n.y, 1.0);
        na::Vector2::new(p.x / p.z, p.y / p.z)
    }

    /// Pixel of a point already expressed in the camera frame.
    pub fn project_camera_point(&self, pc: &na::Vector3<f64>) -> Point2D {
        let n = na::Vector2::new(pc.x / pc.z, pc.y / pc.z);
        let n = match &self.distortion {
            Some(d) => d.distort(&n),
            None => n,
        };
        let px = self.pinhole(&n);
        Point2D::new(px.x, px.y)
    }

    pub fn project(&self, rt: &RvecTvec, p3d: &Point3D) -> Point2D {
        self.project_camera_point(&rt.transform_point(p3d))
    }

    pub fn project_points(&self, rt: &RvecTvec, p3ds: &[Point3D]) -> Vec<Point2D> {
        p3ds.iter().map(|p| self.project(rt, p)).collect()
    }
}

/// Mean pixel distance between each observed image point and its reprojected model point.
pub fn mean_reprojection_error(
    correspondences: &[Correspondence],
    rt: &RvecTvec,
    projection: &Projection,
) -> f64 {
    if correspondences.is_empty() {
        return 0.0;
    }
    let total: f64 = correspondences
        .iter()
        .map(|c| {
            let reprojected = projection.project(rt, &c.model);
            trace!("observed {} reprojected {}", c.image, reprojected);
            c.image.distance(reprojected)
        })
        .sum();
    total / correspondences.len() as f64
}

/// Full output of a solve; [`PoseResult`] is the part shown and exported.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    pub rvec_tvec: RvecTvec,
    pub rotation_matrix: na::Matrix3<f64>,
    pub pose: PoseResult,
    pub refine_iterations: usize,
}

impl PoseEstimate {
    /// Camera center in model coordinates.
    pub fn camera_center(&self) -> na::Vector3<f64> {
        -(self.rotation_matrix.transpose() * self.rvec_tvec.tvec)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoseSolver {
    config: SolverConfig,
}

impl PoseSolver {
    pub fn new(config: SolverConfig) -> PoseSolver {
        PoseSolver { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn required_points(&self) -> usize {
        self.config.min_correspondences.max(MIN_PNP_POINTS)
    }

    pub fn solve(
        &self,
        correspondences: &[Correspondence],
        intrinsics: &Intrinsics,
    ) -> Result<PoseEstimate, PoseError> {
        let required = self.required_points();
        if correspondences.len() < required {
            return Err(PoseError::InsufficientPoints {
                required,
                actual: correspondences.len(),
            });
        }
        let projection = Projection::from_intrinsics(intrinsics, self.config.apply_distortion)?;
        self.solve_with_projection(correspondences, &projection)
    }

    pub fn solve_with_projection(
        &self,
        correspondences: &[Correspondence],
        projection: &Projection,
    ) -> Result<PoseEstimate, PoseError> {
        let required = self.required_points();
        if correspondences.len() < required {
            return Err(PoseError::InsufficientPoints {
                required,
                actual: correspondences.len(),
            });
        }
        check_degenerate(correspondences, self.config.degeneracy_eps)?;

        let normalized: Vec<na::Vector2<f64>> = correspondences
            .iter()
            .map(|c| projection.normalize(&c.image))
            .collect();
        let initial = closed_form_pose(correspondences, &normalized)?;
        let initial_error = mean_reprojection_error(correspondences, &initial, projection);
        debug!("closed-form pose error {:.5} px", initial_error);

        let (mut rt, mut error, mut iterations) = (initial, initial_error, 0);
        if self.config.refine {
            let targets: Vec<na::Vector2<f64>> =
                normalized.iter().map(|n| projection.pinhole(n)).collect();
            let models: Vec<Point3D> = correspondences.iter().map(|c| c.model).collect();
            let (refined, refined_iterations) = refine_pose_lm(
                &models,
                &targets,
                projection.camera_matrix(),
                &rt,
                self.config.max_refine_iterations,
            );
            let refined_error = mean_reprojection_error(correspondences, &refined, projection);
            debug!(
                "refined pose error {:.5} px after {} iterations",
                refined_error, refined_iterations
            );
            if refined_error.is_finite() && refined_error <= error {
                rt = refined;
                error = refined_error;
                iterations = refined_iterations;
            }
        }

        if !error.is_finite() {
            return Err(PoseError::SolveFailure(
                "reprojection error is not finite".to_string(),
            ));
        }
        if correspondences
            .iter()
            .any(|c| rt.transform_point(&c.model).z <= 0.0)
        {
            return Err(PoseError::SolveFailure(
                "model points end up behind the camera".to_string(),
            ));
        }

        let rotation_matrix = rodrigues(&rt.rvec);
        let pose = PoseResult {
            position: Xyz::from(rt.tvec),
            rotation: rotation_matrix_to_euler_xyz(&rotation_matrix, self.config.singular_threshold),
            error,
        };
        Ok(PoseEstimate {
            rvec_tvec: rt,
            rotation_matrix,
            pose,
            refine_iterations: iterations,
        })
    }
}

/// Solves with the default [`SolverConfig`].
pub fn solve_pose(
    correspondences: &[Correspondence],
    intrinsics: &Intrinsics,
) -> Result<PoseResult, PoseError> {
    PoseSolver::default()
        .solve(correspondences, intrinsics)
        .map(|estimate| estimate.pose)
}

/// Rejects coincident or collinear model points and collinear image points.
fn check_degenerate(correspondences: &[Correspondence], eps: f64) -> Result<(), PoseError> {
    let n = correspondences.len() as f64;
    let model_mean = correspondences
        .iter()
        .fold(Point3D::ZERO, |acc, c| acc + c.model)
        / n;
    let image_mean = correspondences
        .iter()
        .fold(Point2D::ZERO, |acc, c| acc + c.image)
        / n;

    let mut model_cov = na::Matrix3::<f64>::zeros();
    let mut image_cov = na::Matrix2::<f64>::zeros();
    for c in correspondences {
        let dm = c.model - model_mean;
        let dm = na::Vector3::new(dm.x, dm.y, dm.z);
        model_cov += dm * dm.transpose();
        let di = c.image - image_mean;
        let di = na::Vector2::new(di.x, di.y);
        image_cov += di * di.transpose();
    }

    let mut model_eig: Vec<f64> = na::SymmetricEigen::new(model_cov)
        .eigenvalues
        .iter()
        .copied()
        .collect();
    model_eig.sort_by(|a, b| b.total_cmp(a));
    if model_eig[0] <= f64::EPSILON || model_eig[1] <= eps * model_eig[0] {
        return Err(PoseError::SolveFailure(
            "model points are coincident or collinear".to_string(),
        ));
    }

    let mut image_eig: Vec<f64> = na::SymmetricEigen::new(image_cov)
        .eigenvalues
        .iter()
        .copied()
        .collect();
    image_eig.sort_by(|a, b| b.total_cmp(a));
    if image_eig[0] <= f64::EPSILON || image_eig[1] <= eps * image_eig[0] {
        return Err(PoseError::SolveFailure(
            "image points are coincident or collinear".to_string(),
        ));
    }
    Ok(())
}

/// SQPnP on model points shifted to their centroid, for f32 headroom.
fn closed_form_pose(
    correspondences: &[Correspondence],
    normalized: &[na::Vector2<f64>],
) -> Result<RvecTvec, PoseError> {
    let centroid = correspondences
        .iter()
        .fold(Point3D::ZERO, |acc, c| acc + c.model)
        / correspondences.len() as f64;
    let p3ds: Vec<glam::Vec3> = correspondences
        .iter()
        .map(|c| (c.model - centroid).as_vec3())
        .collect();
    let p2ds_z: Vec<glam::Vec2> = normalized
        .iter()
        .map(|n| glam::Vec2::new(n.x as f32, n.y as f32))
        .collect();

    let (r, t) = sqpnp_simple::sqpnp_solve_glam(&p3ds, &p2ds_z)
        .ok_or_else(|| PoseError::SolveFailure("SQPnP found no solution".to_string()))?;
    let rvec = na::Vector3::new(r.0, r.1, r.2);
    let t_centered = na::Vector3::new(t.0, t.1, t.2);
    if rvec.iter().chain(t_centered.iter()).any(|v| !v.is_finite()) {
        return Err(PoseError::SolveFailure(
            "SQPnP returned a non-finite pose".to_string(),
        ));
    }
    let c = na::Vector3::new(centroid.x, centroid.y, centroid.z);
    let tvec = t_centered - rodrigues(&rvec) * c;
    Ok(RvecTvec { rvec, tvec })
}

fn reprojection_cost(
    points: &[na::Vector3<f64>],
    targets: &[na::Vector2<f64>],
    k: &na::Matrix3<f64>,
    rotation: &na::Rotation3<f64>,
    t: &na::Vector3<f64>,
) -> f64 {
    let mut cost = 0.0;
    for (x, target) in points.iter().zip(targets) {
        let p = rotation * x + t;
        if p.z <= f64::EPSILON {
            return f64::INFINITY;
        }
        let u = (k[(0, 0)] * p.x + k[(0, 1)] * p.y) / p.z + k[(0, 2)];
        let v = k[(1, 1)] * p.y / p.z + k[(1, 2)];
        cost += (u - target.x).powi(2) + (v - target.y).powi(2);
    }
    cost
}

/// Levenberg-Marquardt on the pinhole reprojection residual.
///
/// Rotation updates are applied on the left, `R <- exp(dw) R`. Returns the
/// refined pose and the number of outer iterations; the input is returned
/// unchanged if no step lowers the cost.
pub fn refine_pose_lm(
    model_points: &[Point3D],
    targets: &[na::Vector2<f64>],
    k: &na::Matrix3<f64>,
    initial: &RvecTvec,
    max_iterations: usize,
) -> (RvecTvec, usize) {
    let points: Vec<na::Vector3<f64>> = model_points
        .iter()
        .map(|p| na::Vector3::new(p.x, p.y, p.z))
        .collect();
    let mut rotation = na::Rotation3::new(initial.rvec);
    let mut t = initial.tvec;
    let mut cost = reprojection_cost(&points, targets, k, &rotation, &t);
    if !cost.is_finite() {
        warn!("initial pose puts points behind the camera, skipping refinement");
        return (initial.clone(), 0);
    }

    let mut lambda = LM_LAMBDA_INIT;
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        let mut h = na::Matrix6::<f64>::zeros();
        let mut g = na::Vector6::<f64>::zeros();
        for (x, target) in points.iter().zip(targets) {
            let y = rotation * x;
            let p = y + t;
            let inv_z = 1.0 / p.z;
            let u = (k[(0, 0)] * p.x + k[(0, 1)] * p.y) * inv_z + k[(0, 2)];
            let v = k[(1, 1)] * p.y * inv_z + k[(1, 2)];
            let r = na::Vector2::new(u - target.x, v - target.y);

            let j_proj = na::Matrix2x3::new(
                k[(0, 0)] * inv_z,
                k[(0, 1)] * inv_z,
                -(k[(0, 0)] * p.x + k[(0, 1)] * p.y) * inv_z * inv_z,
                0.0,
                k[(1, 1)] * inv_z,
                -k[(1, 1)] * p.y * inv_z * inv_z,
            );
            let j_rot = j_proj * (-y.cross_matrix());
            let mut j = na::SMatrix::<f64, 2, 6>::zeros();
            j.fixed_view_mut::<2, 3>(0, 0).copy_from(&j_rot);
            j.fixed_view_mut::<2, 3>(0, 3).copy_from(&j_proj);
            h += j.transpose() * j;
            g += j.transpose() * r;
        }

        let mut stepped = false;
        let mut converged = false;
        while lambda < LM_LAMBDA_MAX {
            let mut damped = h;
            for i in 0..6 {
                damped[(i, i)] += lambda * h[(i, i)].max(f64::EPSILON);
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let delta = chol.solve(&(-g));
            let dw: na::Vector3<f64> = delta.fixed_rows::<3>(0).into_owned();
            let dt: na::Vector3<f64> = delta.fixed_rows::<3>(3).into_owned();
            let candidate_rotation = na::Rotation3::new(dw) * rotation;
            let candidate_t = t + dt;
            let candidate_cost = reprojection_cost(&points, targets, k, &candidate_rotation, &candidate_t);
            if candidate_cost.is_finite() && candidate_cost < cost {
                converged = cost - candidate_cost <= LM_MIN_RELATIVE_DECREASE * (1.0 + cost);
                rotation = candidate_rotation;
                t = candidate_t;
                cost = candidate_cost;
                lambda = (lambda / 10.0).max(1e-12);
                stepped = true;
                break;
            }
            lambda *= 10.0;
        }
        trace!("lm iteration {} cost {:.6e} lambda {:.1e}", iterations, cost, lambda);
        if !stepped || converged {
            break;
        }
    }

    (
        RvecTvec {
            rvec: rotation.scaled_axis(),
            tvec: t,
        },
        iterations,
    )
}
