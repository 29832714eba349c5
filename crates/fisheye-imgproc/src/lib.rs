#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// checkerboard corner detection module.
pub mod chessboard;

/// color transformations module.
pub mod color;

/// image enhancement module.
pub mod enhance;

/// feature response module.
pub mod features;

/// image filtering module.
pub mod filter;

/// compute image histogram module.
pub mod histogram;

/// utilities for interpolation.
pub mod interpolation;

/// module containing parallization utilities.
pub mod parallel;

/// sub-pixel corner refinement module.
pub mod subpix;

/// operations to threshold images.
pub mod threshold;
