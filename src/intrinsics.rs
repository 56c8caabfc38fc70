//! Camera intrinsics in the two accepted shapes.

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::pose::PoseError;

pub const DEFAULT_FOCAL_LENGTH_M: f64 = 0.05;
pub const DEFAULT_SENSOR_WIDTH_M: f64 = 0.036;

/// Row-major matrix as stored in camera info files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixData {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

/// Physical lens and sensor description; the camera matrix is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorIntrinsics {
    pub focal_length: f64,
    pub sensor_width: f64,
    pub sensor_height: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl SensorIntrinsics {
    /// 50 mm lens on a 36 mm wide sensor whose height follows the image aspect ratio.
    pub fn full_frame(image_width: u32, image_height: u32) -> SensorIntrinsics {
        SensorIntrinsics {
            focal_length: DEFAULT_FOCAL_LENGTH_M,
            sensor_width: DEFAULT_SENSOR_WIDTH_M,
            sensor_height: DEFAULT_SENSOR_WIDTH_M * image_height as f64 / image_width as f64,
            image_width,
            image_height,
        }
    }

    pub fn camera_matrix(&self) -> na::Matrix3<f64> {
        let w = self.image_width as f64;
        let h = self.image_height as f64;
        let fx = self.focal_length * w / self.sensor_width;
        let fy = self.focal_length * h / self.sensor_height;
        na::Matrix3::new(fx, 0.0, w / 2.0, 0.0, fy, h / 2.0, 0.0, 0.0, 1.0)
    }
}

/// Calibrated camera info in the uploaded/persisted layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub camera_matrix: MatrixData,
    pub distortion_coefficients: MatrixData,
    pub distortion_model: String,
    pub image_width: u32,
    pub image_height: u32,
}

impl CameraInfo {
    pub fn new(
        camera_matrix: &na::Matrix3<f64>,
        distortion: &[f64; 8],
        image_width: u32,
        image_height: u32,
    ) -> CameraInfo {
        CameraInfo {
            camera_matrix: MatrixData {
                rows: 3,
                cols: 3,
                data: camera_matrix.transpose().as_slice().to_vec(),
            },
            distortion_coefficients: MatrixData {
                rows: 1,
                cols: 8,
                data: distortion.to_vec(),
            },
            distortion_model: "rational_polynomial".to_string(),
            image_width,
            image_height,
        }
    }

    pub fn camera_matrix(&self) -> Result<na::Matrix3<f64>, PoseError> {
        let m = &self.camera_matrix;
        if m.rows != 3 || m.cols != 3 || m.data.len() != 9 {
            return Err(PoseError::InvalidIntrinsics(format!(
                "camera matrix must be 3x3 with 9 values, got {}x{} with {}",
                m.rows,
                m.cols,
                m.data.len()
            )));
        }
        let k = na::Matrix3::from_row_slice(&m.data);
        if k.iter().any(|v| !v.is_finite()) || !(k[(0, 0)] > 0.0 && k[(1, 1)] > 0.0) {
            return Err(PoseError::InvalidIntrinsics(
                "camera matrix needs finite values and positive focal lengths".to_string(),
            ));
        }
        // pixel coordinates are read off the first two rows directly
        if k[(1, 0)] != 0.0 || k[(2, 0)] != 0.0 || k[(2, 1)] != 0.0 || k[(2, 2)] != 1.0 {
            return Err(PoseError::InvalidIntrinsics(
                "camera matrix must be upper triangular with a [0, 0, 1] last row".to_string(),
            ));
        }
        Ok(k)
    }

    /// OpenCV order `(k1, k2, p1, p2, k3, k4, k5, k6)`; shorter vectors are zero padded.
    pub fn distortion(&self) -> Result<[f64; 8], PoseError> {
        let d = &self.distortion_coefficients;
        if d.data.len() > 8 || d.rows * d.cols != d.data.len() {
            return Err(PoseError::InvalidIntrinsics(format!(
                "distortion must hold at most 8 values laid out as {}x{}, got {}",
                d.rows,
                d.cols,
                d.data.len()
            )));
        }
        let mut coeffs = [0.0; 8];
        coeffs[..d.data.len()].copy_from_slice(&d.data);
        Ok(coeffs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Intrinsics {
    Calibrated(CameraInfo),
    Sensor(SensorIntrinsics),
}

impl Intrinsics {
    pub fn camera_matrix(&self) -> Result<na::Matrix3<f64>, PoseError> {
        match self {
            Intrinsics::Calibrated(info) => info.camera_matrix(),
            Intrinsics::Sensor(sensor) => {
                let positive = |v: f64| v > 0.0 && v.is_finite();
                if !(positive(sensor.sensor_width)
                    && positive(sensor.sensor_height)
                    && positive(sensor.focal_length))
                {
                    return Err(PoseError::InvalidIntrinsics(
                        "focal length and sensor size must be positive".to_string(),
                    ));
                }
                if sensor.image_width == 0 || sensor.image_height == 0 {
                    return Err(PoseError::InvalidIntrinsics(
                        "image size must be positive".to_string(),
                    ));
                }
                Ok(sensor.camera_matrix())
            }
        }
    }

    pub fn distortion(&self) -> Result<Option<[f64; 8]>, PoseError> {
        match self {
            Intrinsics::Calibrated(info) => Ok(Some(info.distortion()?)),
            Intrinsics::Sensor(_) => Ok(None),
        }
    }

    pub fn image_size(&self) -> (u32, u32) {
        match self {
            Intrinsics::Calibrated(info) => (info.image_width, info.image_height),
            Intrinsics::Sensor(sensor) => (sensor.image_width, sensor.image_height),
        }
    }
}

impl From<CameraInfo> for Intrinsics {
    fn from(info: CameraInfo) -> Self {
        Intrinsics::Calibrated(info)
    }
}

impl From<SensorIntrinsics> for Intrinsics {
    fn from(sensor: SensorIntrinsics) -> Self {
        Intrinsics::Sensor(sensor)
    }
}
