use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Pixel coordinates on a captured image.
pub type Point2D = glam::DVec2;
/// Coordinates in the reference model frame.
pub type Point3D = glam::DVec3;

/// Plain `{x, y}` record used in persisted files.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

impl From<Point2D> for Xy {
    fn from(p: Point2D) -> Self {
        Xy { x: p.x, y: p.y }
    }
}

impl From<Xy> for Point2D {
    fn from(p: Xy) -> Self {
        Point2D::new(p.x, p.y)
    }
}

/// Plain `{x, y, z}` record used in persisted files and pose results.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Xyz {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<Point3D> for Xyz {
    fn from(p: Point3D) -> Self {
        Xyz {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

impl From<Xyz> for Point3D {
    fn from(p: Xyz) -> Self {
        Point3D::new(p.x, p.y, p.z)
    }
}

impl From<na::Vector3<f64>> for Xyz {
    fn from(v: na::Vector3<f64>) -> Self {
        Xyz {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

/// Axis-angle rotation and translation mapping model coordinates into the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RvecTvec {
    pub rvec: na::Vector3<f64>,
    pub tvec: na::Vector3<f64>,
}

impl RvecTvec {
    pub fn new(rvec: &[f64; 3], tvec: &[f64; 3]) -> RvecTvec {
        RvecTvec {
            rvec: na::Vector3::from_column_slice(rvec),
            tvec: na::Vector3::from_column_slice(tvec),
        }
    }
    pub fn na_rvec(&self) -> na::Vector3<f64> {
        self.rvec
    }
    pub fn na_tvec(&self) -> na::Vector3<f64> {
        self.tvec
    }
    pub fn to_na_isometry3(&self) -> na::Isometry3<f64> {
        na::Isometry3::new(self.tvec, self.rvec)
    }
    /// Maps a model point into the camera frame.
    pub fn transform_point(&self, p3d: &Point3D) -> na::Vector3<f64> {
        let p = self.to_na_isometry3() * na::Point3::new(p3d.x, p3d.y, p3d.z);
        p.coords
    }
}

pub trait ToRvecTvec {
    fn to_rvec_tvec(&self) -> RvecTvec;
}

impl ToRvecTvec for na::Isometry3<f64> {
    fn to_rvec_tvec(&self) -> RvecTvec {
        RvecTvec {
            rvec: self.rotation.scaled_axis(),
            tvec: self.translation.vector,
        }
    }
}

/// Solved extrinsic pose of one camera.
///
/// `position` is the model-to-camera translation, `rotation` holds XYZ Euler
/// angles in radians and `error` the mean reprojection distance in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseResult {
    pub position: Xyz,
    pub rotation: Xyz,
    pub error: f64,
}
