use serde::{Deserialize, Serialize};

use crate::camera::FisheyeIntrinsics;
use crate::error::CalibrationError;
use crate::homography;
use crate::linalg::{self, Mat33};

/// Condition number above which a pose Jacobian is considered degenerate.
pub const MAX_CONDITION_NUMBER: f64 = 1e6;

/// Number of Gauss-Newton iterations of the pose refinement.
const REFINE_ITERATIONS: usize = 20;

/// Errors raised while estimating the pose of one view.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PoseError {
    /// Too few image points have a preimage under the camera model.
    #[error("Only {0} image points can be undistorted, at least 4 are needed")]
    Undistortion(usize),

    /// The board points do not span a plane.
    #[error("Board points are collinear or coincident")]
    DegeneratePoints,

    /// No homography relates the board plane and the image.
    #[error("Homography estimation failed")]
    Homography,

    /// A board point lies behind the camera.
    #[error("Board point {0} is behind the camera")]
    BehindCamera(usize),

    /// The pose Jacobian is close to singular.
    #[error("Pose Jacobian is ill-conditioned (condition number {0:e})")]
    IllConditioned(f64),

    /// The normal equations could not be solved.
    #[error("Pose update is not finite")]
    NonFinite,
}

impl PoseError {
    /// Attach the index of the image the pose belongs to.
    pub fn for_image(self, image: usize) -> CalibrationError {
        match self {
            PoseError::IllConditioned(condition) => {
                CalibrationError::IllConditioned { image, condition }
            }
            other => CalibrationError::PoseEstimation {
                image,
                reason: other.to_string(),
            },
        }
    }
}

/// Rigid transform from the board frame to the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicPose {
    /// Rotation as an axis-angle vector.
    pub rvec: [f64; 3],
    /// Translation.
    pub tvec: [f64; 3],
}

impl ExtrinsicPose {
    /// Create a pose from an axis-angle rotation and a translation.
    pub fn new(rvec: [f64; 3], tvec: [f64; 3]) -> Self {
        Self { rvec, tvec }
    }

    /// Create a pose from a rotation matrix and a translation.
    pub fn from_rotation(rotation: &Mat33, tvec: [f64; 3]) -> Self {
        Self {
            rvec: linalg::axis_angle_from_rotation(rotation),
            tvec,
        }
    }

    /// The rotation matrix of the pose.
    pub fn rotation(&self) -> Mat33 {
        linalg::rotation_from_axis_angle(&self.rvec)
    }

    /// Map a board point into the camera frame.
    pub fn transform_point(&self, point: &[f64; 3]) -> [f64; 3] {
        let p = linalg::mat33_mul_vec3(&self.rotation(), point);
        [p[0] + self.tvec[0], p[1] + self.tvec[1], p[2] + self.tvec[2]]
    }

    /// Apply an increment `[dw, dt]`: the rotation becomes `exp(dw) * R` and the
    /// translation `t + dt`.
    pub fn perturbed(&self, delta: &[f64]) -> Self {
        let dr = linalg::rotation_from_axis_angle(&[delta[0], delta[1], delta[2]]);
        let rotation = linalg::mat33_mul(&dr, &self.rotation());
        Self::from_rotation(
            &rotation,
            [
                self.tvec[0] + delta[3],
                self.tvec[1] + delta[4],
                self.tvec[2] + delta[5],
            ],
        )
    }

    /// Whether all components are finite.
    pub fn is_finite(&self) -> bool {
        self.rvec.iter().chain(self.tvec.iter()).all(|v| v.is_finite())
    }
}

/// Derivatives of one projected pixel with respect to a pose increment.
///
/// # Arguments
///
/// * `d_point` - Derivatives of `[u, v]` with respect to the camera frame point.
/// * `rotated` - The rotated board point `R * X`, without the translation.
pub(crate) fn pose_jacobian(d_point: &[[f64; 3]; 2], rotated: &[f64; 3]) -> [[f64; 6]; 2] {
    let mut jac = [[0.0; 6]; 2];
    for (row, d) in jac.iter_mut().zip(d_point.iter()) {
        // d(exp(w) R X)/dw = -[R X]x, so the row is d^T (-[R X]x) = (R X x d)^T
        let dw = linalg::cross_vec3(rotated, d);
        row[..3].copy_from_slice(&dw);
        row[3..].copy_from_slice(d);
    }
    jac
}

/// Sum of squared reprojection errors of one view.
pub fn reprojection_cost(
    intrinsics: &FisheyeIntrinsics,
    pose: &ExtrinsicPose,
    object_points: &[[f64; 3]],
    image_points: &[[f64; 2]],
) -> f64 {
    let rotation = pose.rotation();
    object_points
        .iter()
        .zip(image_points.iter())
        .map(|(x, obs)| {
            let p = linalg::mat33_mul_vec3(&rotation, x);
            let p = [p[0] + pose.tvec[0], p[1] + pose.tvec[1], p[2] + pose.tvec[2]];
            if p[2] <= 0.0 {
                return f64::INFINITY;
            }
            let uv = intrinsics.project(&p);
            (uv[0] - obs[0]).powi(2) + (uv[1] - obs[1]).powi(2)
        })
        .sum()
}

/// Rotation whose first two rows span the best fitting plane of the points, and the centroid.
fn plane_frame(points: &[[f64; 3]]) -> Result<(Mat33, [f64; 3]), PoseError> {
    let n = points.len() as f64;
    let mut mean = [0.0; 3];
    for p in points {
        for k in 0..3 {
            mean[k] += p[k] / n;
        }
    }

    let mut cov = [[0.0; 3]; 3];
    for p in points {
        let d = [p[0] - mean[0], p[1] - mean[1], p[2] - mean[2]];
        for i in 0..3 {
            for j in 0..3 {
                cov[i][j] += d[i] * d[j];
            }
        }
    }

    let svd = faer::Mat::<f64>::from_fn(3, 3, |i, j| cov[i][j]).svd();
    let s = svd.s_diagonal();
    if !(s.read(1) > 1e-12 * s.read(0)) {
        return Err(PoseError::DegeneratePoints);
    }

    let u = svd.u();
    let mut frame = [[0.0; 3]; 3];
    for (k, row) in frame.iter_mut().enumerate() {
        *row = [u.read(0, k), u.read(1, k), u.read(2, k)];
    }
    if linalg::det_mat33(&frame) < 0.0 {
        frame[2] = frame[2].map(|v| -v);
    }

    Ok((frame, mean))
}

/// Linear estimate of the pose of a planar board.
///
/// The image points are undistorted with the current intrinsics, a homography between the
/// board plane and the normalized image plane is fitted and decomposed into a rotation and
/// a translation. Points that cannot be undistorted do not take part in the fit.
pub fn init_pose(
    intrinsics: &FisheyeIntrinsics,
    object_points: &[[f64; 3]],
    image_points: &[[f64; 2]],
) -> Result<ExtrinsicPose, PoseError> {
    let (frame, mean) = plane_frame(object_points)?;

    // points beyond the field of view of the current intrinsics are left out
    let (plane, normalized): (Vec<[f64; 2]>, Vec<[f64; 2]>) = object_points
        .iter()
        .zip(image_points.iter())
        .filter_map(|(x, uv)| {
            let d = [x[0] - mean[0], x[1] - mean[1], x[2] - mean[2]];
            let q = linalg::mat33_mul_vec3(&frame, &d);
            intrinsics.undistort(uv).map(|n| ([q[0], q[1]], n))
        })
        .unzip();

    if normalized.len() < 4 {
        return Err(PoseError::Undistortion(normalized.len()));
    }

    let h = homography::find_homography_dlt(&plane, &normalized).ok_or(PoseError::Homography)?;

    let col = |j: usize| [h[0][j], h[1][j], h[2][j]];
    let (mut h1, mut h2, mut h3) = (col(0), col(1), col(2));
    let scale = 0.5 * (linalg::norm3(&h1) + linalg::norm3(&h2));
    if !scale.is_finite() || scale < f64::EPSILON {
        return Err(PoseError::Homography);
    }

    // the board must be in front of the camera
    let sign = if h3[2] < 0.0 { -1.0 } else { 1.0 };
    for v in h1.iter_mut().chain(h2.iter_mut()).chain(h3.iter_mut()) {
        *v *= sign / scale;
    }

    let h3_cross = linalg::cross_vec3(&h1, &h2);
    let approx = [
        [h1[0], h2[0], h3_cross[0]],
        [h1[1], h2[1], h3_cross[1]],
        [h1[2], h2[2], h3_cross[2]],
    ];
    let rotation = linalg::mat33_mul(&linalg::nearest_rotation(&approx), &frame);
    let offset = linalg::mat33_mul_vec3(&rotation, &mean);
    let pose = ExtrinsicPose::from_rotation(
        &rotation,
        [h3[0] - offset[0], h3[1] - offset[1], h3[2] - offset[2]],
    );

    if !pose.is_finite() {
        return Err(PoseError::NonFinite);
    }
    Ok(pose)
}

/// Refine a pose with Gauss-Newton iterations on the reprojection error.
///
/// # Arguments
///
/// * `intrinsics` - The camera intrinsics, held fixed.
/// * `object_points` - The board points.
/// * `image_points` - The observed corners.
/// * `initial` - The starting pose.
/// * `check_conditioning` - Fail when the pose Jacobian condition number exceeds
///   [`MAX_CONDITION_NUMBER`].
pub fn refine_pose(
    intrinsics: &FisheyeIntrinsics,
    object_points: &[[f64; 3]],
    image_points: &[[f64; 2]],
    initial: &ExtrinsicPose,
    check_conditioning: bool,
) -> Result<ExtrinsicPose, PoseError> {
    let mut pose = *initial;
    let mut cost = reprojection_cost(intrinsics, &pose, object_points, image_points);

    for _ in 0..REFINE_ITERATIONS {
        let rotation = pose.rotation();
        let mut jtj = [0.0; 36];
        let mut jtr = [0.0; 6];

        for (i, (x, obs)) in object_points.iter().zip(image_points.iter()).enumerate() {
            let rotated = linalg::mat33_mul_vec3(&rotation, x);
            let p = [
                rotated[0] + pose.tvec[0],
                rotated[1] + pose.tvec[1],
                rotated[2] + pose.tvec[2],
            ];
            if p[2] <= 0.0 {
                return Err(PoseError::BehindCamera(i));
            }

            let proj = intrinsics.project_with_jacobian(&p);
            let jac = pose_jacobian(&proj.d_point, &rotated);
            let residual = [proj.pixel[0] - obs[0], proj.pixel[1] - obs[1]];

            for (row, r) in jac.iter().zip(residual.iter()) {
                for a in 0..6 {
                    jtr[a] += row[a] * r;
                    for b in 0..6 {
                        jtj[a * 6 + b] += row[a] * row[b];
                    }
                }
            }
        }

        if check_conditioning {
            // singular values of J are the square roots of those of J^T J
            let condition = linalg::singular_value_ratio(&jtj, 6).sqrt();
            if !(condition <= MAX_CONDITION_NUMBER) {
                return Err(PoseError::IllConditioned(condition));
            }
        }

        let rhs = jtr.map(|v| -v);
        let delta = linalg::solve_linear_system(&jtj, &rhs).ok_or(PoseError::NonFinite)?;

        let candidate = pose.perturbed(&delta);
        let new_cost = reprojection_cost(intrinsics, &candidate, object_points, image_points);
        if !(new_cost < cost) {
            break;
        }
        pose = candidate;
        cost = new_cost;

        let step = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
        if step < 1e-10 {
            break;
        }
    }

    Ok(pose)
}

/// Linear initialization followed by refinement.
pub fn estimate_pose(
    intrinsics: &FisheyeIntrinsics,
    object_points: &[[f64; 3]],
    image_points: &[[f64; 2]],
    check_conditioning: bool,
) -> Result<ExtrinsicPose, PoseError> {
    let initial = init_pose(intrinsics, object_points, image_points)?;
    refine_pose(
        intrinsics,
        object_points,
        image_points,
        &initial,
        check_conditioning,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> FisheyeIntrinsics {
        FisheyeIntrinsics::new(300.0, 302.0, 319.5, 239.5, [0.05, -0.01, 0.002, 0.0])
    }

    fn board(square: f64) -> Vec<[f64; 3]> {
        (0..6)
            .flat_map(|r| (0..9).map(move |c| [c as f64 * square, r as f64 * square, 0.0]))
            .collect()
    }

    fn project_all(cam: &FisheyeIntrinsics, pose: &ExtrinsicPose, points: &[[f64; 3]]) -> Vec<[f64; 2]> {
        points
            .iter()
            .map(|x| cam.project(&pose.transform_point(x)))
            .collect()
    }

    #[test]
    fn init_recovers_exact_pose() -> Result<(), PoseError> {
        let cam = camera();
        let object = board(25.0);
        let truth = ExtrinsicPose::new([0.3, -0.2, 0.1], [-100.0, -60.0, 400.0]);
        let image = project_all(&cam, &truth, &object);

        let pose = init_pose(&cam, &object, &image)?;
        for k in 0..3 {
            assert_relative_eq!(pose.rvec[k], truth.rvec[k], epsilon = 1e-6);
            assert_relative_eq!(pose.tvec[k], truth.tvec[k], epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn refine_from_perturbed_pose() -> Result<(), PoseError> {
        let cam = camera();
        let object = board(25.0);
        let truth = ExtrinsicPose::new([-0.4, 0.25, 0.05], [-90.0, -70.0, 350.0]);
        let image = project_all(&cam, &truth, &object);

        let start = ExtrinsicPose::new([-0.37, 0.28, 0.03], [-80.0, -75.0, 370.0]);
        let pose = refine_pose(&cam, &object, &image, &start, true)?;
        assert!(reprojection_cost(&cam, &pose, &object, &image) < 1e-12);
        for k in 0..3 {
            assert_relative_eq!(pose.rvec[k], truth.rvec[k], epsilon = 1e-8);
            assert_relative_eq!(pose.tvec[k], truth.tvec[k], epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn tiny_board_is_ill_conditioned() {
        let cam = camera();
        let object = board(1e-8);
        let truth = ExtrinsicPose::new([0.0, 0.0, 0.0], [0.0, 0.0, 10.0]);
        let image = project_all(&cam, &truth, &object);

        let res = refine_pose(&cam, &object, &image, &truth, true);
        assert!(matches!(res, Err(PoseError::IllConditioned(c)) if c > MAX_CONDITION_NUMBER));
        assert!(matches!(
            PoseError::IllConditioned(1e7).for_image(4),
            CalibrationError::IllConditioned { image: 4, .. }
        ));
    }

    #[test]
    fn init_skips_points_beyond_the_field_of_view() -> Result<(), PoseError> {
        let cam = camera();
        let object = board(25.0);
        // board in the top-left corner of a 640x480 image
        let truth = ExtrinsicPose::new([0.0, 0.0, 0.0], [-500.0, -390.0, 330.0]);
        let image = project_all(&cam, &truth, &object);

        // a wide starting guess sees the outer corners past 90 degrees
        let wide = FisheyeIntrinsics::new(200.0, 200.0, 319.5, 239.5, [0.0; 4]);
        let outside = image.iter().filter(|p| wide.undistort(p).is_none()).count();
        assert!(outside > 0 && outside < object.len() - 4);

        let initial = init_pose(&wide, &object, &image)?;
        assert!(initial.is_finite() && initial.tvec[2] > 0.0);

        // the projection of every point, including the skipped ones, drives the refinement
        let pose = refine_pose(&wide, &object, &image, &initial, true)?;
        assert!(
            reprojection_cost(&wide, &pose, &object, &image)
                <= reprojection_cost(&wide, &initial, &object, &image)
        );

        let far = vec![[5000.0, 5000.0]; object.len()];
        assert_eq!(init_pose(&wide, &object, &far), Err(PoseError::Undistortion(0)));
        Ok(())
    }

    #[test]
    fn collinear_board_is_rejected() {
        let cam = camera();
        let object = (0..9).map(|c| [c as f64, 0.0, 0.0]).collect::<Vec<_>>();
        let image = vec![[320.0, 240.0]; 9];
        assert_eq!(
            init_pose(&cam, &object, &image),
            Err(PoseError::DegeneratePoints)
        );
    }

    #[test]
    fn perturbation_matches_jacobian() {
        let cam = camera();
        let pose = ExtrinsicPose::new([0.2, 0.1, -0.3], [10.0, -5.0, 300.0]);
        let x = [50.0, 25.0, 0.0];
        let rotated = linalg::mat33_mul_vec3(&pose.rotation(), &x);
        let proj = cam.project_with_jacobian(&pose.transform_point(&x));
        let jac = pose_jacobian(&proj.d_point, &rotated);

        let h = 1e-7;
        for k in 0..6 {
            let mut delta = [0.0; 6];
            delta[k] = h;
            let plus = cam.project(&pose.perturbed(&delta).transform_point(&x));
            delta[k] = -h;
            let minus = cam.project(&pose.perturbed(&delta).transform_point(&x));
            for row in 0..2 {
                let numeric = (plus[row] - minus[row]) / (2.0 * h);
                assert_relative_eq!(jac[row][k], numeric, epsilon = 1e-3, max_relative = 1e-5);
            }
        }
    }
}
