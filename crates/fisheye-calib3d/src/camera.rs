use serde::{Deserialize, Serialize};

use crate::linalg::Mat33;

/// Radius below which a normalized point is treated as lying on the optical axis.
const AXIS_EPS: f64 = 1e-8;

/// Number of intrinsic parameters, in the order `fx, fy, cx, cy, k1, k2, k3, k4, alpha`.
pub const NUM_INTRINSICS: usize = 9;

/// Intrinsic parameters of an equidistant fisheye camera.
///
/// A point `(x, y, z)` in the camera frame is projected as
///
/// ```text
/// a = x / z, b = y / z, r = sqrt(a^2 + b^2), theta = atan(r)
/// theta_d = theta * (1 + k1 theta^2 + k2 theta^4 + k3 theta^6 + k4 theta^8)
/// x' = (theta_d / r) a, y' = (theta_d / r) b
/// u = fx (x' + alpha y') + cx, v = fy y' + cy
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FisheyeIntrinsics {
    /// Focal length along x, in pixels.
    pub fx: f64,
    /// Focal length along y, in pixels.
    pub fy: f64,
    /// Principal point x coordinate, in pixels.
    pub cx: f64,
    /// Principal point y coordinate, in pixels.
    pub cy: f64,
    /// Skew coefficient.
    pub alpha: f64,
    /// Distortion coefficients `[k1, k2, k3, k4]`.
    pub k: [f64; 4],
}

/// Pixel projection of a point together with its derivatives.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionJacobian {
    /// Projected pixel `[u, v]`.
    pub pixel: [f64; 2],
    /// Derivatives of `[u, v]` with respect to the intrinsic parameters.
    pub d_intrinsics: [[f64; NUM_INTRINSICS]; 2],
    /// Derivatives of `[u, v]` with respect to the camera frame point.
    pub d_point: [[f64; 3]; 2],
}

impl Default for FisheyeIntrinsics {
    fn default() -> Self {
        Self {
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
            alpha: 0.0,
            k: [0.0; 4],
        }
    }
}

impl std::fmt::Display for FisheyeIntrinsics {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "Matrix camera")?;
        for row in self.camera_matrix() {
            writeln!(f, "{}, {}, {}", row[0], row[1], row[2])?;
        }
        writeln!(f, "Matrix coeffs")?;
        for k in self.k {
            writeln!(f, "{}", k)?;
        }
        Ok(())
    }
}

impl FisheyeIntrinsics {
    /// Create intrinsics without skew.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, k: [f64; 4]) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            alpha: 0.0,
            k,
        }
    }

    /// Create intrinsics from a camera matrix and distortion coefficients.
    pub fn from_camera_matrix(matrix: &Mat33, k: [f64; 4]) -> Self {
        let fx = matrix[0][0];
        Self {
            fx,
            fy: matrix[1][1],
            cx: matrix[0][2],
            cy: matrix[1][2],
            alpha: if fx != 0.0 { matrix[0][1] / fx } else { 0.0 },
            k,
        }
    }

    /// The 3x3 camera matrix `[[fx, alpha fx, cx], [0, fy, cy], [0, 0, 1]]`.
    pub fn camera_matrix(&self) -> Mat33 {
        [
            [self.fx, self.alpha * self.fx, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Parameters as a vector in the order `fx, fy, cx, cy, k1, k2, k3, k4, alpha`.
    pub fn to_params(&self) -> [f64; NUM_INTRINSICS] {
        [
            self.fx, self.fy, self.cx, self.cy, self.k[0], self.k[1], self.k[2], self.k[3],
            self.alpha,
        ]
    }

    /// Build intrinsics from a parameter vector in the order of [`Self::to_params`].
    pub fn from_params(p: &[f64; NUM_INTRINSICS]) -> Self {
        Self {
            fx: p[0],
            fy: p[1],
            cx: p[2],
            cy: p[3],
            alpha: p[8],
            k: [p[4], p[5], p[6], p[7]],
        }
    }

    /// Whether every parameter is finite and the focal lengths are positive.
    pub fn is_valid(&self) -> bool {
        self.to_params().iter().all(|v| v.is_finite()) && self.fx > 0.0 && self.fy > 0.0
    }

    /// Distorted angle `theta_d` for an incidence angle `theta`.
    pub fn theta_d(&self, theta: f64) -> f64 {
        let t2 = theta * theta;
        let [k1, k2, k3, k4] = self.k;
        theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4))))
    }

    /// Apply the fisheye distortion and the camera matrix to a normalized point `[x/z, y/z]`.
    pub fn distort(&self, normalized: &[f64; 2]) -> [f64; 2] {
        let [a, b] = *normalized;
        let r = a.hypot(b);
        let scale = if r < AXIS_EPS {
            1.0
        } else {
            self.theta_d(r.atan()) / r
        };
        let (xd, yd) = (a * scale, b * scale);
        [
            self.fx * (xd + self.alpha * yd) + self.cx,
            self.fy * yd + self.cy,
        ]
    }

    /// Project a point given in the camera frame to pixel coordinates.
    pub fn project(&self, point: &[f64; 3]) -> [f64; 2] {
        self.distort(&[point[0] / point[2], point[1] / point[2]])
    }

    /// Project a camera frame point and compute the analytic derivatives.
    pub fn project_with_jacobian(&self, point: &[f64; 3]) -> ProjectionJacobian {
        let [x, y, z] = *point;
        let inv_z = 1.0 / z;
        let (a, b) = (x * inv_z, y * inv_z);
        let r = a.hypot(b);
        let [k1, k2, k3, k4] = self.k;

        // scale = theta_d / r and its derivatives with respect to a, b and k
        let (scale, d_scale_da, d_scale_db, d_scale_dk) = if r < AXIS_EPS {
            (1.0, 0.0, 0.0, [0.0; 4])
        } else {
            let theta = r.atan();
            let t2 = theta * theta;
            let theta_d = self.theta_d(theta);
            let d_theta_d = 1.0 + t2 * (3.0 * k1 + t2 * (5.0 * k2 + t2 * (7.0 * k3 + t2 * 9.0 * k4)));
            let d_theta_dr = 1.0 / (1.0 + r * r);
            let d_scale_dr = (d_theta_d * d_theta_dr * r - theta_d) / (r * r);
            let t3 = theta * t2;
            let t5 = t3 * t2;
            let t7 = t5 * t2;
            let t9 = t7 * t2;
            (
                theta_d / r,
                d_scale_dr * a / r,
                d_scale_dr * b / r,
                [t3 / r, t5 / r, t7 / r, t9 / r],
            )
        };

        let (xd, yd) = (a * scale, b * scale);
        let (fx, fy, alpha) = (self.fx, self.fy, self.alpha);

        // derivatives of the distorted point with respect to (a, b)
        let dxd_da = scale + a * d_scale_da;
        let dxd_db = a * d_scale_db;
        let dyd_da = b * d_scale_da;
        let dyd_db = scale + b * d_scale_db;

        let du_da = fx * (dxd_da + alpha * dyd_da);
        let du_db = fx * (dxd_db + alpha * dyd_db);
        let dv_da = fy * dyd_da;
        let dv_db = fy * dyd_db;

        // derivatives of (a, b) with respect to the point
        let da = [inv_z, 0.0, -a * inv_z];
        let db = [0.0, inv_z, -b * inv_z];

        let mut d_point = [[0.0; 3]; 2];
        for i in 0..3 {
            d_point[0][i] = du_da * da[i] + du_db * db[i];
            d_point[1][i] = dv_da * da[i] + dv_db * db[i];
        }

        let mut d_intrinsics = [[0.0; NUM_INTRINSICS]; 2];
        d_intrinsics[0][0] = xd + alpha * yd;
        d_intrinsics[1][1] = yd;
        d_intrinsics[0][2] = 1.0;
        d_intrinsics[1][3] = 1.0;
        for i in 0..4 {
            d_intrinsics[0][4 + i] = fx * (a + alpha * b) * d_scale_dk[i];
            d_intrinsics[1][4 + i] = fy * b * d_scale_dk[i];
        }
        d_intrinsics[0][8] = fx * yd;

        ProjectionJacobian {
            pixel: [fx * (xd + alpha * yd) + self.cx, fy * yd + self.cy],
            d_intrinsics,
            d_point,
        }
    }

    /// Remove the camera matrix and the fisheye distortion from a pixel.
    ///
    /// The distorted angle is inverted with Newton iterations. Returns `None` when the pixel
    /// has no valid preimage, e.g. beyond the field of view described by the model.
    pub fn undistort(&self, pixel: &[f64; 2]) -> Option<[f64; 2]> {
        let yd = (pixel[1] - self.cy) / self.fy;
        let xd = (pixel[0] - self.cx) / self.fx - self.alpha * yd;
        let theta_d = xd.hypot(yd);

        if theta_d < AXIS_EPS {
            return Some([xd, yd]);
        }

        let theta_d = theta_d.min(std::f64::consts::PI);
        let [k1, k2, k3, k4] = self.k;

        let mut theta = theta_d;
        let mut converged = false;
        for _ in 0..10 {
            let t2 = theta * theta;
            let f = self.theta_d(theta) - theta_d;
            let df = 1.0 + t2 * (3.0 * k1 + t2 * (5.0 * k2 + t2 * (7.0 * k3 + t2 * 9.0 * k4)));
            if df.abs() < f64::EPSILON {
                break;
            }
            let step = f / df;
            theta -= step;
            if step.abs() < 1e-10 {
                converged = true;
                break;
            }
        }

        // reject solutions on the other side of the optical axis or behind the camera
        if !theta.is_finite()
            || theta < 0.0
            || theta >= std::f64::consts::FRAC_PI_2
            || (!converged && (self.theta_d(theta) - theta_d).abs() > 1e-6)
        {
            return None;
        }

        let scale = theta.tan() / theta_d;
        Some([xd * scale, yd * scale])
    }
}
