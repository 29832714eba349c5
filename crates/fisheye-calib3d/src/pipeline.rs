//! Calibration from raw images: detection, refinement, solve and map construction.

use fisheye_image::{Image, ImageSize};
use fisheye_imgproc::chessboard::{self, ChessboardError, CornerSet};
use fisheye_imgproc::{color, subpix};
use rayon::prelude::*;

use crate::calibrate::{self, CalibrationResult};
use crate::config::CalibrationConfig;
use crate::correspondences::CorrespondenceAccumulator;
use crate::error::CalibrationError;
use crate::linalg::{self, Mat33};
use crate::undistort::{self, UndistortionMap};

/// What happened to one input image.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    /// The board was not found; the image does not contribute to the calibration.
    Rejected {
        /// Why the detector gave up.
        reason: String,
    },
    /// The refined corners were added to the correspondences.
    Accumulated {
        /// The refined corners.
        corners: CornerSet,
    },
}

impl FrameStatus {
    /// Whether the image contributes to the calibration.
    pub fn is_accumulated(&self) -> bool {
        matches!(self, FrameStatus::Accumulated { .. })
    }

    /// The refined corners of an accumulated image.
    pub fn corners(&self) -> Option<&CornerSet> {
        match self {
            FrameStatus::Accumulated { corners } => Some(corners),
            FrameStatus::Rejected { .. } => None,
        }
    }
}

/// Outputs of a complete calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    /// The solved camera model and poses.
    pub result: CalibrationResult,
    /// The camera matrix of the undistorted view.
    pub new_camera_matrix: Mat33,
    /// The map from the undistorted view to the input images.
    pub map: UndistortionMap,
    /// The status of every input image, in input order.
    pub frames: Vec<FrameStatus>,
}

/// Detect the board in one image and refine the corners.
///
/// # Arguments
///
/// * `index` - The index of the image, used in the error.
/// * `image` - The grayscale image.
/// * `config` - The calibration settings.
///
/// # Errors
///
/// Returns [`CalibrationError::CornerNotFound`] when the board is not visible.
pub fn detect_and_refine(
    index: usize,
    image: &Image<u8, 1>,
    config: &CalibrationConfig,
) -> Result<CornerSet, CalibrationError> {
    let corners =
        match chessboard::find_chessboard_corners(image, config.board.pattern(), &config.detector)
        {
            Ok(corners) => corners,
            Err(ChessboardError::NotFound(reason)) => {
                log::debug!("image {index}: {reason}");
                return Err(CalibrationError::CornerNotFound { image: index });
            }
            Err(e) => return Err(e.into()),
        };

    let gray = image.cast_and_scale::<f32>(1.0 / 255.0)?;
    let refined = subpix::corner_sub_pix(&gray, corners.points(), &config.subpix)?;
    Ok(corners.with_points(refined)?)
}

/// Detect and refine the board in every image and accumulate the correspondences.
///
/// Images are processed in parallel and accumulated in input order. Images without a
/// visible board are reported as rejected.
pub fn collect_correspondences(
    images: &[Image<u8, 1>],
    config: &CalibrationConfig,
) -> Result<(CorrespondenceAccumulator, Vec<FrameStatus>), CalibrationError> {
    config.validate()?;

    if let Some(first) = images.first() {
        if let Some((index, image)) = images
            .iter()
            .enumerate()
            .find(|(_, image)| image.size() != first.size())
        {
            return Err(CalibrationError::InvalidConfig(format!(
                "image {index} has size {} but image 0 has size {}",
                image.size(),
                first.size()
            )));
        }
    }

    let detections = images
        .par_iter()
        .enumerate()
        .map(|(index, image)| detect_and_refine(index, image, config))
        .collect::<Vec<_>>();

    let mut accumulator = CorrespondenceAccumulator::new(config.board);
    let mut frames = Vec::with_capacity(images.len());

    for (index, detection) in detections.into_iter().enumerate() {
        match detection {
            Ok(corners) => {
                accumulator.push(index, &corners)?;
                frames.push(FrameStatus::Accumulated { corners });
            }
            Err(CalibrationError::CornerNotFound { image }) => {
                frames.push(FrameStatus::Rejected {
                    reason: format!("checkerboard not found in image {image}"),
                });
            }
            Err(e) => return Err(e),
        }
    }

    log::info!(
        "board found in {} of {} images",
        accumulator.len(),
        images.len()
    );

    Ok((accumulator, frames))
}

/// Calibrate a fisheye camera from grayscale images of a checkerboard.
///
/// # Arguments
///
/// * `images` - The calibration images, all of the same size.
/// * `config` - The calibration settings.
///
/// # Returns
///
/// The solved model, the undistorted view and its map, and the status of every image.
pub fn calibrate_images(
    images: &[Image<u8, 1>],
    config: &CalibrationConfig,
) -> Result<CalibrationReport, CalibrationError> {
    let (accumulator, frames) = collect_correspondences(images, config)?;

    let required = config.min_images.max(1);
    let image_size = match images.first() {
        Some(image) if accumulator.len() >= required => image.size(),
        _ => {
            return Err(CalibrationError::InsufficientData {
                accepted: accumulator.len(),
                required,
            })
        }
    };

    let result = calibrate::calibrate(
        &accumulator,
        image_size,
        &config.flags,
        &config.criteria,
        None,
    )?;

    let (new_camera_matrix, map) = build_undistortion(&result, image_size, config)?;

    Ok(CalibrationReport {
        result,
        new_camera_matrix,
        map,
        frames,
    })
}

/// Calibrate a fisheye camera from RGB images of a checkerboard.
pub fn calibrate_rgb_images(
    images: &[Image<u8, 3>],
    config: &CalibrationConfig,
) -> Result<CalibrationReport, CalibrationError> {
    let gray = images
        .par_iter()
        .map(|rgb| {
            let mut gray = Image::<u8, 1>::from_size_val(rgb.size(), 0)?;
            color::gray_from_rgb_u8(rgb, &mut gray)?;
            Ok(gray)
        })
        .collect::<Result<Vec<_>, CalibrationError>>()?;
    calibrate_images(&gray, config)
}

/// Estimate the undistorted view of a calibration and build its map.
pub fn build_undistortion(
    result: &CalibrationResult,
    image_size: ImageSize,
    config: &CalibrationConfig,
) -> Result<(Mat33, UndistortionMap), CalibrationError> {
    let new_camera_matrix = undistort::estimate_new_camera_matrix(
        &result.intrinsics,
        image_size,
        config.balance,
        None,
        config.fov_scale,
    )?;
    let map = undistort::init_undistort_rectify_map(
        &result.intrinsics,
        &linalg::IDENTITY,
        &new_camera_matrix,
        image_size,
    )?;
    Ok((new_camera_matrix, map))
}
