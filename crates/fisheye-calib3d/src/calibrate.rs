//! Levenberg-Marquardt estimation of fisheye intrinsics and board poses.
//!
//! The solver minimizes the squared pixel distance between the observed corners and the
//! projection of the board points over the free intrinsic parameters and one pose per
//! view. It solves the damped normal equations `(J^T J + lambda diag(J^T J)) delta = -J^T r`.

use fisheye_image::ImageSize;
use fisheye_imgproc::subpix::TermCriteria;
use serde::{Deserialize, Serialize};

use crate::camera::{FisheyeIntrinsics, NUM_INTRINSICS};
use crate::correspondences::CorrespondenceAccumulator;
use crate::error::CalibrationError;
use crate::extrinsics::{self, ExtrinsicPose};
use crate::linalg::{self, Mat33};

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e10;
const LAMBDA_FACTOR: f64 = 10.0;

/// Number of parameters of a pose increment.
const POSE_DIM: usize = 6;

/// Maximum number of parameters of one residual row: all intrinsics and one pose.
const MAX_ROW_ENTRIES: usize = NUM_INTRINSICS + POSE_DIM;

/// Selects which parameters are estimated and how the solver behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationFlags {
    /// Start from the provided intrinsics instead of the default guess.
    pub use_intrinsic_guess: bool,
    /// Re-estimate the poses after every accepted step.
    pub recompute_extrinsic: bool,
    /// Fail when the pose Jacobian of a view is ill-conditioned.
    pub check_conditioning: bool,
    /// Keep the skew coefficient at its initial value.
    pub fix_skew: bool,
    /// Keep `k1` at its initial value.
    pub fix_k1: bool,
    /// Keep `k2` at its initial value.
    pub fix_k2: bool,
    /// Keep `k3` at its initial value.
    pub fix_k3: bool,
    /// Keep `k4` at its initial value.
    pub fix_k4: bool,
    /// Keep the principal point at its initial value, the image center by default.
    pub fix_principal_point: bool,
    /// Keep all intrinsics and distortion coefficients, estimating only the poses.
    pub fix_intrinsic: bool,
}

impl Default for CalibrationFlags {
    fn default() -> Self {
        Self {
            use_intrinsic_guess: false,
            recompute_extrinsic: true,
            check_conditioning: true,
            fix_skew: true,
            fix_k1: false,
            fix_k2: false,
            fix_k3: false,
            fix_k4: true,
            fix_principal_point: true,
            fix_intrinsic: false,
        }
    }
}

impl CalibrationFlags {
    /// Set whether the initial intrinsics are used as the starting point.
    pub fn with_use_intrinsic_guess(mut self, value: bool) -> Self {
        self.use_intrinsic_guess = value;
        self
    }

    /// Set whether the principal point is held fixed.
    pub fn with_fix_principal_point(mut self, value: bool) -> Self {
        self.fix_principal_point = value;
        self
    }

    /// Set whether only the poses are estimated.
    pub fn with_fix_intrinsic(mut self, value: bool) -> Self {
        self.fix_intrinsic = value;
        self
    }

    /// Set whether the pose conditioning is checked.
    pub fn with_check_conditioning(mut self, value: bool) -> Self {
        self.check_conditioning = value;
        self
    }

    /// Indices of the estimated intrinsic parameters, in the order of
    /// [`FisheyeIntrinsics::to_params`].
    pub fn free_parameters(&self) -> Vec<usize> {
        if self.fix_intrinsic {
            return Vec::new();
        }
        let fixed = [
            false,
            false,
            self.fix_principal_point,
            self.fix_principal_point,
            self.fix_k1,
            self.fix_k2,
            self.fix_k3,
            self.fix_k4,
            self.fix_skew,
        ];
        (0..NUM_INTRINSICS).filter(|&i| !fixed[i]).collect()
    }
}

/// Default termination criteria of the solver.
pub fn default_criteria() -> TermCriteria {
    TermCriteria::new(100, f64::EPSILON)
}

/// Reason why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The relative change of the parameters fell below the tolerance.
    Converged,
    /// The iteration budget was exhausted.
    MaxIterations,
    /// No step reduced the error even with maximal damping.
    LambdaMaxExceeded,
}

/// Outcome of a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    /// The estimated intrinsics.
    pub intrinsics: FisheyeIntrinsics,
    /// The pose of every accepted view, in accumulation order.
    pub poses: Vec<ExtrinsicPose>,
    /// The input index of every accepted view.
    pub sources: Vec<usize>,
    /// Root mean square reprojection error over all points, in pixels.
    pub rms: f64,
    /// Root mean square reprojection error of each view.
    pub per_image_rms: Vec<f64>,
    /// Number of solver iterations.
    pub iterations: usize,
    /// Why the solver stopped.
    pub termination: TerminationReason,
}

impl CalibrationResult {
    /// The estimated camera matrix.
    pub fn camera_matrix(&self) -> Mat33 {
        self.intrinsics.camera_matrix()
    }

    /// The estimated distortion coefficients `[k1, k2, k3, k4]`.
    pub fn distortion(&self) -> [f64; 4] {
        self.intrinsics.k
    }
}

impl std::fmt::Display for CalibrationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.intrinsics)?;
        writeln!(f, "RMS error: {}", self.rms)
    }
}

/// Starting intrinsics when no guess is provided.
///
/// The focal length maps a half field of view of 90 degrees to the larger half image side,
/// and the principal point is the image center.
pub fn initial_intrinsics(image_size: ImageSize) -> FisheyeIntrinsics {
    let (w, h) = (image_size.width as f64, image_size.height as f64);
    let f = w.max(h) / std::f64::consts::PI;
    FisheyeIntrinsics::new(f, f, w / 2.0 - 0.5, h / 2.0 - 0.5, [0.0; 4])
}

/// Total squared reprojection error and the error of each view.
fn reprojection_costs(
    intrinsics: &FisheyeIntrinsics,
    poses: &[ExtrinsicPose],
    object_points: &[[f64; 3]],
    views: &[&[[f64; 2]]],
) -> (f64, Vec<f64>) {
    let per_view = poses
        .iter()
        .zip(views.iter())
        .map(|(pose, image)| extrinsics::reprojection_cost(intrinsics, pose, object_points, image))
        .collect::<Vec<_>>();
    (per_view.iter().sum(), per_view)
}

/// Accumulate `J^T J` (row-major, `n x n`) and `J^T r` over all views.
fn normal_equations(
    intrinsics: &FisheyeIntrinsics,
    poses: &[ExtrinsicPose],
    object_points: &[[f64; 3]],
    views: &[&[[f64; 2]]],
    free: &[usize],
) -> Option<(Vec<f64>, Vec<f64>)> {
    let n = free.len() + POSE_DIM * poses.len();
    let mut jtj = vec![0.0; n * n];
    let mut jtr = vec![0.0; n];

    let mut index = [0usize; MAX_ROW_ENTRIES];
    let mut value = [0.0f64; MAX_ROW_ENTRIES];

    for (v, (pose, image)) in poses.iter().zip(views.iter()).enumerate() {
        let rotation = pose.rotation();
        let offset = free.len() + POSE_DIM * v;

        for (x, obs) in object_points.iter().zip(image.iter()) {
            let rotated = linalg::mat33_mul_vec3(&rotation, x);
            let p = [
                rotated[0] + pose.tvec[0],
                rotated[1] + pose.tvec[1],
                rotated[2] + pose.tvec[2],
            ];
            if p[2] <= 0.0 {
                return None;
            }

            let proj = intrinsics.project_with_jacobian(&p);
            let jac_pose = extrinsics::pose_jacobian(&proj.d_point, &rotated);
            let residual = [proj.pixel[0] - obs[0], proj.pixel[1] - obs[1]];

            for row in 0..2 {
                let mut m = 0;
                for (k, &param) in free.iter().enumerate() {
                    index[m] = k;
                    value[m] = proj.d_intrinsics[row][param];
                    m += 1;
                }
                for (j, &d) in jac_pose[row].iter().enumerate() {
                    index[m] = offset + j;
                    value[m] = d;
                    m += 1;
                }

                for a in 0..m {
                    jtr[index[a]] += value[a] * residual[row];
                    let base = index[a] * n;
                    for b in 0..m {
                        jtj[base + index[b]] += value[a] * value[b];
                    }
                }
            }
        }
    }

    Some((jtj, jtr))
}

fn relative_change(old: &[f64], new: &[f64]) -> f64 {
    let diff = old
        .iter()
        .zip(new.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    let norm = new.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        diff / norm
    } else {
        diff
    }
}

fn pose_params(poses: &[ExtrinsicPose]) -> Vec<f64> {
    poses
        .iter()
        .flat_map(|p| p.rvec.into_iter().chain(p.tvec))
        .collect()
}

/// Jointly estimate the fisheye intrinsics and the pose of every view.
///
/// # Arguments
///
/// * `correspondences` - The accepted views.
/// * `image_size` - The size of the calibration images.
/// * `flags` - Which parameters are estimated.
/// * `criteria` - Iteration budget and tolerance on the relative change of the intrinsics.
/// * `initial` - Starting intrinsics, used when `flags.use_intrinsic_guess` is set.
///
/// # Errors
///
/// * [`CalibrationError::InsufficientData`] if there is no view.
/// * [`CalibrationError::PoseEstimation`] or [`CalibrationError::IllConditioned`] if the
///   pose of a view cannot be estimated.
/// * [`CalibrationError::SolverDivergence`] if the normal equations are singular or the
///   parameters become non-finite.
pub fn calibrate(
    correspondences: &CorrespondenceAccumulator,
    image_size: ImageSize,
    flags: &CalibrationFlags,
    criteria: &TermCriteria,
    initial: Option<&FisheyeIntrinsics>,
) -> Result<CalibrationResult, CalibrationError> {
    if correspondences.is_empty() {
        return Err(CalibrationError::InsufficientData {
            accepted: 0,
            required: 1,
        });
    }
    if image_size.width == 0 || image_size.height == 0 {
        return Err(CalibrationError::InvalidConfig(format!(
            "image size must be positive, got {image_size}"
        )));
    }
    if !criteria.epsilon.is_finite() || criteria.epsilon < 0.0 {
        return Err(CalibrationError::InvalidConfig(format!(
            "solver epsilon must be finite and non-negative, got {}",
            criteria.epsilon
        )));
    }

    let mut intrinsics = match (flags.use_intrinsic_guess, initial) {
        (true, Some(guess)) if guess.is_valid() => *guess,
        (true, Some(guess)) => {
            return Err(CalibrationError::InvalidConfig(format!(
                "initial intrinsics are not valid: {guess:?}"
            )))
        }
        (true, None) => {
            return Err(CalibrationError::InvalidConfig(
                "use_intrinsic_guess requires initial intrinsics".to_string(),
            ))
        }
        (false, _) => initial_intrinsics(image_size),
    };

    if correspondences.len() < 3 {
        log::warn!(
            "calibrating from {} views, the estimate will be poorly constrained",
            correspondences.len()
        );
    }

    let object_points = correspondences.object_points();
    let sources = correspondences.sources();
    let views = correspondences.views().map(|(_, image)| image).collect::<Vec<_>>();
    let num_points = correspondences.num_observations() as f64;

    let mut poses = views
        .iter()
        .zip(sources.iter())
        .map(|(image, &source)| {
            extrinsics::estimate_pose(&intrinsics, object_points, image, flags.check_conditioning)
                .map_err(|e| e.for_image(source))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let free = flags.free_parameters();
    let n = free.len() + POSE_DIM * poses.len();

    let (mut cost, _) = reprojection_costs(&intrinsics, &poses, object_points, &views);
    let rms_of = |cost: f64| (cost / num_points).sqrt();

    if !cost.is_finite() {
        return Err(CalibrationError::SolverDivergence {
            iteration: 0,
            rms: rms_of(cost),
            reason: "initial reprojection error is not finite".to_string(),
        });
    }

    log::debug!(
        "initial rms {:.6} with {} free intrinsics and {} views",
        rms_of(cost),
        free.len(),
        poses.len()
    );

    let mut lambda = LAMBDA_INIT;
    let mut iterations = 0;

    let termination = loop {
        if iterations >= criteria.max_iterations {
            break TerminationReason::MaxIterations;
        }

        let (jtj, jtr) = normal_equations(&intrinsics, &poses, object_points, &views, &free)
            .ok_or_else(|| CalibrationError::SolverDivergence {
                iteration: iterations,
                rms: rms_of(cost),
                reason: "a board point is behind the camera".to_string(),
            })?;

        let mut damped = jtj.clone();
        for i in 0..n {
            damped[i * n + i] += lambda * jtj[i * n + i].max(1e-9);
        }
        let rhs = jtr.iter().map(|v| -v).collect::<Vec<_>>();
        let delta = linalg::solve_linear_system(&damped, &rhs).ok_or_else(|| {
            CalibrationError::SolverDivergence {
                iteration: iterations,
                rms: rms_of(cost),
                reason: "normal equations are singular".to_string(),
            }
        })?;

        let mut params = intrinsics.to_params();
        for (k, &param) in free.iter().enumerate() {
            params[param] += delta[k];
        }
        let candidate = FisheyeIntrinsics::from_params(&params);
        let candidate_poses = poses
            .iter()
            .enumerate()
            .map(|(v, pose)| {
                let start = free.len() + POSE_DIM * v;
                pose.perturbed(&delta[start..start + POSE_DIM])
            })
            .collect::<Vec<_>>();

        let new_cost = if candidate.is_valid() && candidate_poses.iter().all(|p| p.is_finite()) {
            reprojection_costs(&candidate, &candidate_poses, object_points, &views).0
        } else {
            f64::INFINITY
        };

        iterations += 1;

        if new_cost < cost {
            let old_intrinsics = intrinsics.to_params();
            let old_poses = pose_params(&poses);

            intrinsics = candidate;
            poses = candidate_poses;
            cost = new_cost;
            lambda = (lambda / LAMBDA_FACTOR).max(LAMBDA_MIN);

            if flags.recompute_extrinsic {
                poses = views
                    .iter()
                    .zip(sources.iter())
                    .zip(poses.iter())
                    .map(|((image, &source), pose)| {
                        extrinsics::refine_pose(
                            &intrinsics,
                            object_points,
                            image,
                            pose,
                            flags.check_conditioning,
                        )
                        .map_err(|e| e.for_image(source))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                cost = reprojection_costs(&intrinsics, &poses, object_points, &views).0;
            }

            let change = if free.is_empty() {
                relative_change(&old_poses, &pose_params(&poses))
            } else {
                relative_change(&old_intrinsics, &intrinsics.to_params())
            };

            log::debug!(
                "iteration {}: rms {:.6}, lambda {:e}, change {:e}",
                iterations,
                rms_of(cost),
                lambda,
                change
            );

            if change <= criteria.epsilon {
                break TerminationReason::Converged;
            }
        } else {
            lambda *= LAMBDA_FACTOR;
            if lambda > LAMBDA_MAX {
                break TerminationReason::LambdaMaxExceeded;
            }
        }
    };

    if !intrinsics.is_valid() || !cost.is_finite() {
        return Err(CalibrationError::SolverDivergence {
            iteration: iterations,
            rms: rms_of(cost),
            reason: "parameters are not finite".to_string(),
        });
    }

    let (cost, per_view) = reprojection_costs(&intrinsics, &poses, object_points, &views);
    let points_per_view = object_points.len() as f64;
    let result = CalibrationResult {
        intrinsics,
        poses,
        sources: sources.to_vec(),
        rms: rms_of(cost),
        per_image_rms: per_view
            .iter()
            .map(|c| (c / points_per_view).sqrt())
            .collect(),
        iterations,
        termination,
    };

    log::info!(
        "calibration stopped after {} iterations ({:?}) with rms {:.6}",
        result.iterations,
        result.termination,
        result.rms
    );

    Ok(result)
}
