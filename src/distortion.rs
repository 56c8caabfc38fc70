//! OpenCV rational radial/tangential lens model on normalized image coordinates.

use nalgebra as na;

const UNDISTORT_ITERATIONS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-14;

/// Coefficients in OpenCV order `(k1, k2, p1, p2, k3, k4, k5, k6)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RationalDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl RationalDistortion {
    pub fn from_coeffs(c: &[f64; 8]) -> RationalDistortion {
        RationalDistortion {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
            k4: c[5],
            k5: c[6],
            k6: c[7],
        }
    }

    pub fn is_identity(&self) -> bool {
        [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6,
        ]
        .iter()
        .all(|c| *c == 0.0)
    }

    fn radial(&self, r2: f64) -> f64 {
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6)
            / (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6)
    }

    fn tangential(&self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        (
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    pub fn distort(&self, pt: &na::Vector2<f64>) -> na::Vector2<f64> {
        let (x, y) = (pt.x, pt.y);
        let r2 = x * x + y * y;
        let radial = self.radial(r2);
        let (dx, dy) = self.tangential(x, y, r2);
        na::Vector2::new(x * radial + dx, y * radial + dy)
    }

    /// Fixed-point inversion of [`distort`](Self::distort), as done by `cv::undistortPoints`.
    pub fn undistort(&self, pt: &na::Vector2<f64>) -> na::Vector2<f64> {
        let mut x = pt.x;
        let mut y = pt.y;
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = self.radial(r2);
            if !radial.is_finite() || radial.abs() < f64::EPSILON {
                break;
            }
            let (dx, dy) = self.tangential(x, y, r2);
            let nx = (pt.x - dx) / radial;
            let ny = (pt.y - dy) / radial;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < UNDISTORT_EPS {
                break;
            }
        }
        na::Vector2::new(x, y)
    }
}
