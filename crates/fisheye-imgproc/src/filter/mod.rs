//! Filter operations
//!
//! This module provides the smoothing filters used ahead of corner detection.

/// Filter kernels
pub mod kernels;

/// Filter operations
mod ops;
pub use ops::*;

/// Separable filter operations
mod separable_filter;
pub use separable_filter::*;
