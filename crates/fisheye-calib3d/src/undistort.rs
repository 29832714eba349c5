//! Camera matrix of the undistorted view and the lookup maps that produce it.

use fisheye_image::{Image, ImageSize};
use fisheye_imgproc::interpolation::{self, InterpolationMode};
use rayon::prelude::*;

use crate::camera::FisheyeIntrinsics;
use crate::error::CalibrationError;
use crate::linalg::{self, Mat33};

/// Number of fractional bits of the fixed-point map.
pub const INTER_BITS: u32 = 5;

/// Number of sub-pixel positions per axis of the fixed-point map.
pub const INTER_TAB_SIZE: i32 = 1 << INTER_BITS;

/// Source coordinate stored for destination pixels without a valid preimage.
const INVALID_COORD: f32 = -1.0;

/// Dense lookup from each destination pixel to its source coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct UndistortionMap {
    /// Source x coordinate of every destination pixel.
    pub map_x: Image<f32, 1>,
    /// Source y coordinate of every destination pixel.
    pub map_y: Image<f32, 1>,
}

/// Lookup map with integer source coordinates and a sub-pixel table index.
///
/// `frac` packs the fractional parts as `fy * 32 + fx` with 5 bits per axis.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedPointMap {
    size: ImageSize,
    /// Integer part of the source coordinate `[x, y]` of every destination pixel.
    pub xy: Vec<[i16; 2]>,
    /// Interpolation table index of every destination pixel.
    pub frac: Vec<u16>,
}

impl FixedPointMap {
    /// The size of the destination image.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The source coordinate encoded for the destination pixel `(x, y)`.
    pub fn source_coordinates(&self, x: usize, y: usize) -> Option<[f32; 2]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let idx = y * self.size.width + x;
        let [ix, iy] = self.xy[idx];
        let frac = self.frac[idx] as i32;
        let scale = 1.0 / INTER_TAB_SIZE as f32;
        Some([
            ix as f32 + (frac & (INTER_TAB_SIZE - 1)) as f32 * scale,
            iy as f32 + (frac >> INTER_BITS) as f32 * scale,
        ])
    }
}

impl UndistortionMap {
    /// The size of the destination image.
    pub fn size(&self) -> ImageSize {
        self.map_x.size()
    }

    /// The source coordinate of the destination pixel `(x, y)`.
    pub fn source_coordinates(&self, x: usize, y: usize) -> Option<[f32; 2]> {
        let cols = self.map_x.cols();
        if x >= cols || y >= self.map_x.rows() {
            return None;
        }
        let idx = y * cols + x;
        Some([self.map_x.as_slice()[idx], self.map_y.as_slice()[idx]])
    }

    /// Convert the map to the 16-bit fixed-point representation.
    pub fn to_fixed_point(&self) -> FixedPointMap {
        let to_fixed = |v: f32| -> i32 {
            let scaled = (v as f64 * INTER_TAB_SIZE as f64).round();
            if scaled.is_nan() {
                i32::MIN
            } else {
                scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
            }
        };
        let clamp16 = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;

        let (xy, frac): (Vec<[i16; 2]>, Vec<u16>) = self
            .map_x
            .as_slice()
            .par_iter()
            .zip(self.map_y.as_slice().par_iter())
            .map(|(&u, &v)| {
                let (iu, iv) = (to_fixed(u), to_fixed(v));
                let xy = [clamp16(iu >> INTER_BITS), clamp16(iv >> INTER_BITS)];
                let mask = INTER_TAB_SIZE - 1;
                let frac = ((iv & mask) * INTER_TAB_SIZE + (iu & mask)) as u16;
                (xy, frac)
            })
            .unzip();

        FixedPointMap {
            size: self.size(),
            xy,
            frac,
        }
    }

    /// Resample an image through the map.
    ///
    /// Destination pixels whose source falls outside `src` are set to zero.
    pub fn apply<const C: usize>(
        &self,
        src: &Image<f32, C>,
        mode: InterpolationMode,
    ) -> Result<Image<f32, C>, CalibrationError> {
        let mut dst = Image::<f32, C>::from_size_val(self.size(), 0.0)?;
        interpolation::remap(src, &mut dst, &self.map_x, &self.map_y, mode)?;
        Ok(dst)
    }
}

fn check_intrinsics(intrinsics: &FisheyeIntrinsics) -> Result<(), CalibrationError> {
    if !intrinsics.is_valid() {
        return Err(CalibrationError::MapConstruction(format!(
            "degenerate intrinsics: {intrinsics:?}"
        )));
    }
    Ok(())
}

/// Largest incidence angle kept for the border samples of the new camera matrix.
const MAX_BORDER_THETA: f64 = 1.5;

/// Undistort a border sample, limiting its incidence angle to [`MAX_BORDER_THETA`].
///
/// Pixels beyond the field of view of the model, e.g. the sides of a lens covering 180
/// degrees or more, are placed at the largest angle in their direction.
fn undistort_border_point(intrinsics: &FisheyeIntrinsics, pixel: &[f64; 2]) -> Option<[f64; 2]> {
    let max_radius = MAX_BORDER_THETA.tan();

    let direction = match intrinsics.undistort(pixel) {
        Some(p) if p[0].hypot(p[1]) <= max_radius => return Some(p),
        Some(p) => p,
        None => {
            let yd = (pixel[1] - intrinsics.cy) / intrinsics.fy;
            [(pixel[0] - intrinsics.cx) / intrinsics.fx - intrinsics.alpha * yd, yd]
        }
    };

    let radius = direction[0].hypot(direction[1]);
    if !(radius.is_finite() && radius > 0.0) {
        return None;
    }
    let scale = max_radius / radius;
    Some([direction[0] * scale, direction[1] * scale])
}

/// Estimate the camera matrix of the undistorted view.
///
/// The midpoints of the four image borders are undistorted, and the focal length is chosen
/// between the value that keeps all of them visible and the value that fills the image.
/// Border points beyond 1.5 rad from the optical axis are pulled back to that angle.
///
/// # Arguments
///
/// * `intrinsics` - The calibrated intrinsics.
/// * `image_size` - The size of the distorted image.
/// * `balance` - Interpolates between the largest focal length (0) and the smallest (1).
///   Values outside `[0, 1]` are clamped.
/// * `new_size` - Size of the undistorted image, the distorted size if `None`.
/// * `fov_scale` - Divisor of the focal length.
///
/// # Returns
///
/// The 3x3 camera matrix of the undistorted view.
pub fn estimate_new_camera_matrix(
    intrinsics: &FisheyeIntrinsics,
    image_size: ImageSize,
    balance: f64,
    new_size: Option<ImageSize>,
    fov_scale: f64,
) -> Result<Mat33, CalibrationError> {
    check_intrinsics(intrinsics)?;
    if image_size.width == 0 || image_size.height == 0 {
        return Err(CalibrationError::MapConstruction(format!(
            "image size must be positive, got {image_size}"
        )));
    }
    if balance.is_nan() {
        return Err(CalibrationError::InvalidConfig(
            "balance must be a number".to_string(),
        ));
    }
    if !fov_scale.is_finite() || fov_scale <= 0.0 {
        return Err(CalibrationError::InvalidConfig(format!(
            "fov scale must be finite and positive, got {fov_scale}"
        )));
    }

    let balance = if (0.0..=1.0).contains(&balance) {
        balance
    } else {
        log::warn!("balance {balance} is outside [0, 1] and will be clamped");
        balance.clamp(0.0, 1.0)
    };

    let (w, h) = (image_size.width as f64, image_size.height as f64);
    let midpoints = [[w / 2.0, 0.0], [w, h / 2.0], [w / 2.0, h], [0.0, h / 2.0]];

    let aspect = intrinsics.fx / intrinsics.fy;
    let mut undistorted = [[0.0; 2]; 4];
    for (dst, p) in undistorted.iter_mut().zip(midpoints.iter()) {
        let [x, y] = undistort_border_point(intrinsics, p).ok_or_else(|| {
            CalibrationError::MapConstruction(format!(
                "border point ({}, {}) cannot be undistorted",
                p[0], p[1]
            ))
        })?;
        *dst = [x, y * aspect];
    }

    let center = [
        undistorted.iter().map(|p| p[0]).sum::<f64>() / 4.0,
        undistorted.iter().map(|p| p[1]).sum::<f64>() / 4.0,
    ];

    let min_x = undistorted.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
    let max_x = undistorted.iter().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max);
    let min_y = undistorted.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);
    let max_y = undistorted.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max);

    let candidates = [
        w * 0.5 / (center[0] - min_x),
        w * 0.5 / (max_x - center[0]),
        h * 0.5 * aspect / (center[1] - min_y),
        h * 0.5 * aspect / (max_y - center[1]),
    ];
    let f_min = candidates.iter().copied().fold(f64::INFINITY, f64::min);
    let f_max = candidates.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let f = (balance * f_min + (1.0 - balance) * f_max) / fov_scale;
    if !f.is_finite() || f <= 0.0 {
        return Err(CalibrationError::MapConstruction(format!(
            "cannot derive a focal length from the image borders (got {f})"
        )));
    }

    let mut new_f = [f, f / aspect];
    let mut new_c = [
        -center[0] * f + w * 0.5,
        (-center[1] * f + h * aspect * 0.5) / aspect,
    ];

    if let Some(size) = new_size {
        let rx = size.width as f64 / w;
        let ry = size.height as f64 / h;
        new_f = [new_f[0] * rx, new_f[1] * ry];
        new_c = [new_c[0] * rx, new_c[1] * ry];
    }

    Ok([
        [new_f[0], 0.0, new_c[0]],
        [0.0, new_f[1], new_c[1]],
        [0.0, 0.0, 1.0],
    ])
}

/// Build the map from the undistorted view to the distorted image.
///
/// Every destination pixel is mapped to a ray by `(new_camera * rectification)^-1`, then
/// distorted and projected by `intrinsics`.
///
/// # Arguments
///
/// * `intrinsics` - The calibrated intrinsics of the distorted image.
/// * `rectification` - Rotation applied to the rays, the identity for plain undistortion.
/// * `new_camera` - The camera matrix of the undistorted view.
/// * `size` - The size of the undistorted image.
pub fn init_undistort_rectify_map(
    intrinsics: &FisheyeIntrinsics,
    rectification: &Mat33,
    new_camera: &Mat33,
    size: ImageSize,
) -> Result<UndistortionMap, CalibrationError> {
    check_intrinsics(intrinsics)?;
    if size.width == 0 || size.height == 0 {
        return Err(CalibrationError::MapConstruction(format!(
            "map size must be positive, got {size}"
        )));
    }

    let inv = linalg::inverse_mat33(&linalg::mat33_mul(new_camera, rectification)).ok_or_else(
        || CalibrationError::MapConstruction("new camera matrix is not invertible".to_string()),
    )?;

    let mut map_x = Image::<f32, 1>::from_size_val(size, 0.0)?;
    let mut map_y = Image::<f32, 1>::from_size_val(size, 0.0)?;
    let cols = size.width;

    map_x
        .as_slice_mut()
        .par_chunks_exact_mut(cols)
        .zip(map_y.as_slice_mut().par_chunks_exact_mut(cols))
        .enumerate()
        .for_each(|(row, (row_x, row_y))| {
            let v = row as f64;
            // ray of the first pixel of the row, and its increment along the row
            let mut ray = [
                inv[0][1] * v + inv[0][2],
                inv[1][1] * v + inv[1][2],
                inv[2][1] * v + inv[2][2],
            ];
            for (mx, my) in row_x.iter_mut().zip(row_y.iter_mut()) {
                if ray[2] > 0.0 {
                    let [su, sv] = intrinsics.distort(&[ray[0] / ray[2], ray[1] / ray[2]]);
                    *mx = su as f32;
                    *my = sv as f32;
                } else {
                    *mx = INVALID_COORD;
                    *my = INVALID_COORD;
                }
                ray[0] += inv[0][0];
                ray[1] += inv[1][0];
                ray[2] += inv[2][0];
            }
        });

    log::debug!("built {size} undistortion map");

    Ok(UndistortionMap { map_x, map_y })
}

/// Remove the distortion of pixel coordinates.
///
/// # Arguments
///
/// * `intrinsics` - The calibrated intrinsics.
/// * `points` - Distorted pixel coordinates.
/// * `new_camera` - Camera matrix applied to the undistorted rays; the normalized
///   coordinates are returned if `None`.
///
/// # Returns
///
/// The undistorted coordinates, `None` for points with no valid preimage.
pub fn undistort_points(
    intrinsics: &FisheyeIntrinsics,
    points: &[[f64; 2]],
    new_camera: Option<&Mat33>,
) -> Vec<Option<[f64; 2]>> {
    points
        .iter()
        .map(|p| {
            let [x, y] = intrinsics.undistort(p)?;
            Some(match new_camera {
                Some(m) => {
                    let q = linalg::mat33_mul_vec3(m, &[x, y, 1.0]);
                    [q[0] / q[2], q[1] / q[2]]
                }
                None => [x, y],
            })
        })
        .collect()
}

/// Apply the fisheye distortion and the camera matrix to normalized coordinates.
pub fn distort_points(intrinsics: &FisheyeIntrinsics, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    points.iter().map(|p| intrinsics.distort(p)).collect()
}
