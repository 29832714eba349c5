#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// checkerboard geometry.
pub mod board;

/// equidistant fisheye camera model.
pub mod camera;

/// joint estimation of intrinsics and board poses.
pub mod calibrate;

/// configuration of the calibration pipeline.
pub mod config;

/// pairing of detected corners with board points.
pub mod correspondences;

/// error types for the calibration.
pub mod error;

/// board pose initialization and refinement.
pub mod extrinsics;

/// planar homography estimation.
pub mod homography;

/// small fixed-size linear algebra helpers.
pub mod linalg;

/// end-to-end calibration from images.
pub mod pipeline;

/// undistortion camera matrix and lookup maps.
pub mod undistort;

pub use board::BoardGeometry;
pub use calibrate::{calibrate, CalibrationFlags, CalibrationResult, TerminationReason};
pub use camera::FisheyeIntrinsics;
pub use config::CalibrationConfig;
pub use correspondences::CorrespondenceAccumulator;
pub use error::CalibrationError;
pub use extrinsics::ExtrinsicPose;
pub use pipeline::{calibrate_images, calibrate_rgb_images, CalibrationReport, FrameStatus};
pub use undistort::{FixedPointMap, UndistortionMap};
