//! Checkerboard corner detection.
//!
//! The detector looks for saddle points of the image intensity, keeps the ones whose
//! neighbourhood alternates between dark and bright four times, and then grows a
//! regular lattice from them. Detection either returns every interior corner of the
//! board in a canonical order or fails.

mod lattice;
mod saddle;

use fisheye_image::{Image, ImageError};
use serde::{Deserialize, Serialize};

use crate::{enhance, filter};

pub use saddle::saddle_candidates;

/// Errors raised by the checkerboard detector.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ChessboardError {
    /// The complete pattern could not be located in the image.
    #[error("Checkerboard not found: {0}")]
    NotFound(String),

    /// The requested pattern cannot be detected.
    #[error("Invalid pattern size {rows}x{cols}, at least 2x2 interior corners are required")]
    InvalidPatternSize {
        /// Number of interior corner rows.
        rows: usize,
        /// Number of interior corners per row.
        cols: usize,
    },

    /// The number of points does not match the pattern.
    #[error("Pattern {rows}x{cols} expects {expected} corners, got {actual}")]
    CornerCountMismatch {
        /// Number of interior corner rows.
        rows: usize,
        /// Number of interior corners per row.
        cols: usize,
        /// Expected number of corners.
        expected: usize,
        /// Provided number of corners.
        actual: usize,
    },

    /// Error from the image operations.
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Number of interior corners of a checkerboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSize {
    /// Number of interior corner rows.
    pub rows: usize,
    /// Number of interior corners per row.
    pub cols: usize,
}

impl PatternSize {
    /// Create a new pattern size from interior corner counts.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Total number of interior corners.
    pub fn num_corners(&self) -> usize {
        self.rows * self.cols
    }
}

impl std::fmt::Display for PatternSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Complete, ordered set of corners for one image.
///
/// The points are stored row-major: `cols` corners per row, `rows` rows. Moving along a row
/// and then down a column turns clockwise in image coordinates, and the first corner is the
/// one closest to the top-left of the image among the symmetric orderings.
#[derive(Debug, Clone, PartialEq)]
pub struct CornerSet {
    pattern: PatternSize,
    points: Vec<[f64; 2]>,
}

impl CornerSet {
    /// Create a corner set, checking that every corner of the pattern is present.
    pub fn new(pattern: PatternSize, points: Vec<[f64; 2]>) -> Result<Self, ChessboardError> {
        if points.len() != pattern.num_corners() {
            return Err(ChessboardError::CornerCountMismatch {
                rows: pattern.rows,
                cols: pattern.cols,
                expected: pattern.num_corners(),
                actual: points.len(),
            });
        }
        Ok(Self { pattern, points })
    }

    /// Replace the corner locations, keeping the pattern.
    pub fn with_points(&self, points: Vec<[f64; 2]>) -> Result<Self, ChessboardError> {
        Self::new(self.pattern, points)
    }

    /// The pattern the corners belong to.
    pub fn pattern(&self) -> PatternSize {
        self.pattern
    }

    /// The corner locations as `[x, y]` in scan order.
    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    /// The corner at the given row and column of the pattern.
    pub fn get(&self, row: usize, col: usize) -> Option<[f64; 2]> {
        if row >= self.pattern.rows || col >= self.pattern.cols {
            return None;
        }
        self.points.get(row * self.pattern.cols + col).copied()
    }

    /// Number of corners.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the set holds no corners.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Consume the set and return the points.
    pub fn into_points(self) -> Vec<[f64; 2]> {
        self.points
    }
}

/// Parameters of the checkerboard detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Equalize the image histogram before detection.
    pub normalize_image: bool,
    /// Standard deviation of the Gaussian pre-smoothing, in pixels.
    pub blur_sigma: f32,
    /// Radius of the non-maximum suppression window, in pixels.
    pub nms_radius: usize,
    /// Minimum saddle response relative to the strongest one.
    pub response_threshold: f32,
    /// Radius of the circle sampled around each candidate, in pixels.
    pub ring_radius: f32,
    /// Maximum distance between a predicted and a matched corner, relative to the grid step.
    pub lattice_tolerance: f64,
    /// Number of seed candidates tried before giving up.
    pub max_seeds: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            normalize_image: true,
            blur_sigma: 1.5,
            nms_radius: 3,
            response_threshold: 0.1,
            ring_radius: 5.0,
            lattice_tolerance: 0.35,
            max_seeds: 8,
        }
    }
}

impl DetectorParams {
    /// Enable or disable the histogram normalization.
    pub fn with_normalize_image(mut self, normalize_image: bool) -> Self {
        self.normalize_image = normalize_image;
        self
    }

    /// Set the radius of the sampling circle.
    pub fn with_ring_radius(mut self, ring_radius: f32) -> Self {
        self.ring_radius = ring_radius;
        self
    }

    /// Set the Gaussian pre-smoothing.
    pub fn with_blur_sigma(mut self, blur_sigma: f32) -> Self {
        self.blur_sigma = blur_sigma;
        self
    }
}

/// Find the interior corners of a checkerboard.
///
/// # Arguments
///
/// * `image` - The grayscale input image.
/// * `pattern` - The number of interior corners of the board.
/// * `params` - The detector parameters.
///
/// # Returns
///
/// The complete set of `pattern.rows * pattern.cols` corners in canonical order.
///
/// # Errors
///
/// Returns [`ChessboardError::NotFound`] when the full pattern cannot be located.
pub fn find_chessboard_corners(
    image: &Image<u8, 1>,
    pattern: PatternSize,
    params: &DetectorParams,
) -> Result<CornerSet, ChessboardError> {
    if pattern.rows < 2 || pattern.cols < 2 {
        return Err(ChessboardError::InvalidPatternSize {
            rows: pattern.rows,
            cols: pattern.cols,
        });
    }

    if image.cols() < 3 || image.rows() < 3 {
        return Err(ChessboardError::NotFound(format!(
            "image {} is too small",
            image.size()
        )));
    }

    let normalized = if params.normalize_image {
        let mut dst = Image::<u8, 1>::from_size_val(image.size(), 0)?;
        enhance::equalize_histogram(image, &mut dst)?;
        dst
    } else {
        image.clone()
    };

    let gray = normalized.cast_and_scale::<f32>(1.0 / 255.0)?;

    let mut smoothed = Image::<f32, 1>::from_size_val(gray.size(), 0.0)?;
    let kernel_size = filter::kernels::gaussian_kernel_size(params.blur_sigma);
    filter::gaussian_blur(
        &gray,
        &mut smoothed,
        (kernel_size, kernel_size),
        (params.blur_sigma, params.blur_sigma),
    )?;

    let candidates = saddle_candidates(&smoothed, params)?;
    log::debug!(
        "chessboard {}: {} saddle candidates",
        pattern,
        candidates.len()
    );

    let points = lattice::assemble_grid(&candidates, pattern, params)?;
    CornerSet::new(pattern, points)
}
