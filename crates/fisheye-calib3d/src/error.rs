use fisheye_image::ImageError;
use fisheye_imgproc::chessboard::ChessboardError;
use fisheye_imgproc::subpix::SubpixError;

/// Errors raised while calibrating a fisheye camera.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// The checkerboard was not located in an image.
    #[error("Checkerboard corners not found in image {image}")]
    CornerNotFound {
        /// Index of the image in the input sequence.
        image: usize,
    },

    /// The board description is not usable.
    #[error("Invalid board geometry: {0}")]
    InvalidGeometry(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Too few images contributed correspondences.
    #[error("Calibration requires at least {required} accepted images, got {accepted}")]
    InsufficientData {
        /// Number of accepted images.
        accepted: usize,
        /// Minimum number of images.
        required: usize,
    },

    /// The corners of an image do not match the board points.
    #[error("Image {image} has {corners} corners but the board has {object_points} points")]
    CorrespondenceMismatch {
        /// Index of the image in the input sequence.
        image: usize,
        /// Number of detected corners.
        corners: usize,
        /// Number of board points.
        object_points: usize,
    },

    /// The nonlinear solver produced non-finite values or a singular system.
    #[error("Solver diverged at iteration {iteration} (rms {rms}): {reason}")]
    SolverDivergence {
        /// Iteration at which the failure was detected.
        iteration: usize,
        /// Reprojection error before the failure.
        rms: f64,
        /// Description of the failure.
        reason: String,
    },

    /// The initial pose of one image cannot be estimated.
    #[error("Cannot estimate the pose of image {image}: {reason}")]
    PoseEstimation {
        /// Index of the image in the input sequence.
        image: usize,
        /// Description of the failure.
        reason: String,
    },

    /// The pose of one image is poorly constrained.
    #[error("Pose of image {image} is ill-conditioned (condition number {condition:e})")]
    IllConditioned {
        /// Index of the image in the input sequence.
        image: usize,
        /// Ratio of the extreme singular values of the pose Jacobian.
        condition: f64,
    },

    /// The undistortion map cannot be built from the given model.
    #[error("Cannot construct undistortion map: {0}")]
    MapConstruction(String),

    /// Error from the corner detector.
    #[error(transparent)]
    Detection(#[from] ChessboardError),

    /// Error from the sub-pixel refinement.
    #[error(transparent)]
    Subpix(#[from] SubpixError),

    /// Error from the image operations.
    #[error(transparent)]
    Image(#[from] ImageError),
}
