//! Sub-pixel refinement of checkerboard corners.
//!
//! At a true corner `q`, the image gradient `g(p)` at any nearby point `p` is orthogonal to
//! the vector `p - q`. Every corner is moved to the least-squares solution of
//! `sum(g g^T) q = sum(g g^T p)` over a Gaussian-weighted window, and the process is
//! repeated until the displacement falls below the requested precision.

use fisheye_image::{Image, ImageError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::interpolation::bilinear_interpolation;

/// Errors raised by the sub-pixel refinement.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SubpixError {
    /// The search window is empty.
    #[error("Invalid search window half size ({0}, {1})")]
    InvalidWindow(usize, usize),

    /// The dead zone covers the whole search window.
    #[error("Zero zone ({0}, {1}) must be smaller than the search window")]
    InvalidZeroZone(usize, usize),

    /// Error from the image operations.
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Termination criteria of an iterative procedure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TermCriteria {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Required precision; the meaning depends on the procedure.
    pub epsilon: f64,
}

impl TermCriteria {
    /// Create a new termination criteria.
    pub fn new(max_iterations: usize, epsilon: f64) -> Self {
        Self {
            max_iterations,
            epsilon,
        }
    }
}

/// Parameters of the sub-pixel corner refinement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubpixConfig {
    /// Half of the side lengths `(width, height)` of the search window.
    pub window: (usize, usize),
    /// Half of the dead region in the middle of the window, if any.
    pub zero_zone: Option<(usize, usize)>,
    /// Stop when the corner moves by less than `epsilon` pixels or after `max_iterations`.
    pub criteria: TermCriteria,
}

impl Default for SubpixConfig {
    fn default() -> Self {
        Self {
            window: (11, 11),
            zero_zone: None,
            criteria: TermCriteria::new(30, 0.1),
        }
    }
}

impl SubpixConfig {
    /// Set the half size of the search window.
    pub fn with_window(mut self, half_width: usize, half_height: usize) -> Self {
        self.window = (half_width, half_height);
        self
    }

    /// Set the termination criteria.
    pub fn with_criteria(mut self, max_iterations: usize, epsilon: f64) -> Self {
        self.criteria = TermCriteria::new(max_iterations, epsilon);
        self
    }

    fn validate(&self) -> Result<(), SubpixError> {
        let (wx, wy) = self.window;
        if wx == 0 || wy == 0 {
            return Err(SubpixError::InvalidWindow(wx, wy));
        }
        if let Some((zx, zy)) = self.zero_zone {
            if 2 * zx + 1 >= 2 * wx + 1 || 2 * zy + 1 >= 2 * wy + 1 {
                return Err(SubpixError::InvalidZeroZone(zx, zy));
            }
        }
        Ok(())
    }
}

/// Gaussian weights of the search window, stored row-major.
fn window_mask(config: &SubpixConfig) -> Vec<f64> {
    let (wx, wy) = config.window;
    let (win_w, win_h) = (2 * wx + 1, 2 * wy + 1);

    let mut mask = Vec::with_capacity(win_w * win_h);
    for i in 0..win_h {
        let y = (i as f64 - wy as f64) / wy as f64;
        let vy = (-y * y).exp();
        for j in 0..win_w {
            let x = (j as f64 - wx as f64) / wx as f64;
            mask.push(vy * (-x * x).exp());
        }
    }

    if let Some((zx, zy)) = config.zero_zone {
        for i in (wy - zy)..=(wy + zy) {
            for j in (wx - zx)..=(wx + zx) {
                mask[i * win_w + j] = 0.0;
            }
        }
    }

    mask
}

/// Sample a `(2 * wx + 3) x (2 * wy + 3)` patch centered at `center` with bilinear interpolation.
fn sample_patch(image: &Image<f32, 1>, center: [f64; 2], window: (usize, usize)) -> Vec<f64> {
    let (wx, wy) = window;
    let (patch_w, patch_h) = (2 * wx + 3, 2 * wy + 3);
    let x0 = center[0] - (wx + 1) as f64;
    let y0 = center[1] - (wy + 1) as f64;

    let mut patch = Vec::with_capacity(patch_w * patch_h);
    for i in 0..patch_h {
        let v = (y0 + i as f64) as f32;
        for j in 0..patch_w {
            let u = (x0 + j as f64) as f32;
            patch.push(bilinear_interpolation(image, u, v)[0] as f64);
        }
    }
    patch
}

fn refine_corner(
    image: &Image<f32, 1>,
    initial: [f64; 2],
    mask: &[f64],
    config: &SubpixConfig,
) -> [f64; 2] {
    let (wx, wy) = config.window;
    let (win_w, win_h) = (2 * wx + 1, 2 * wy + 1);
    let patch_w = win_w + 2;
    let eps = config.criteria.epsilon.max(0.0).powi(2);
    let max_iterations = config.criteria.max_iterations.max(1);

    let (cols, rows) = (image.cols() as f64, image.rows() as f64);
    let mut current = initial;

    for _ in 0..max_iterations {
        let patch = sample_patch(image, current, config.window);

        let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for i in 0..win_h {
            let py = i as f64 - wy as f64;
            for j in 0..win_w {
                let m = mask[i * win_w + j];
                let center = (i + 1) * patch_w + j + 1;
                let tgx = patch[center + 1] - patch[center - 1];
                let tgy = patch[center + patch_w] - patch[center - patch_w];
                let gxx = tgx * tgx * m;
                let gxy = tgx * tgy * m;
                let gyy = tgy * tgy * m;
                let px = j as f64 - wx as f64;

                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * px + gxy * py;
                bb2 += gxy * px + gyy * py;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON * f64::EPSILON {
            break;
        }

        let scale = 1.0 / det;
        let next = [
            current[0] + c * scale * bb1 - b * scale * bb2,
            current[1] - b * scale * bb1 + a * scale * bb2,
        ];
        let err = (next[0] - current[0]).powi(2) + (next[1] - current[1]).powi(2);
        current = next;

        if current[0] < 0.0 || current[0] >= cols || current[1] < 0.0 || current[1] >= rows {
            break;
        }

        if err <= eps {
            break;
        }
    }

    if !current[0].is_finite()
        || !current[1].is_finite()
        || (current[0] - initial[0]).abs() > wx as f64
        || (current[1] - initial[1]).abs() > wy as f64
    {
        return initial;
    }

    current
}

/// Refine corner locations to sub-pixel accuracy.
///
/// Every corner is refined independently and in parallel; the output has the same length
/// and order as the input. A corner whose estimate drifts farther than the search window,
/// or leaves the image, keeps its initial location.
///
/// # Arguments
///
/// * `image` - The grayscale image the corners were detected in.
/// * `corners` - The initial corner locations as `[x, y]`.
/// * `config` - The window size and termination criteria.
///
/// # Returns
///
/// The refined corner locations.
///
/// # Errors
///
/// Returns an error if the window configuration is invalid or the image is empty.
pub fn corner_sub_pix(
    image: &Image<f32, 1>,
    corners: &[[f64; 2]],
    config: &SubpixConfig,
) -> Result<Vec<[f64; 2]>, SubpixError> {
    config.validate()?;

    if image.cols() == 0 || image.rows() == 0 {
        return Err(ImageError::EmptyImage.into());
    }

    let mask = window_mask(config);

    Ok(corners
        .par_iter()
        .map(|&corner| refine_corner(image, corner, &mask, config))
        .collect())
}
