//! Pixel interpolation methods for image resampling.
//!
//! # Interpolation Modes
//!
//! - **Nearest**: Fastest, uses nearest pixel value (no interpolation)
//! - **Bilinear**: Smooth linear interpolation between adjacent pixels

mod bilinear;
mod interpolate;
mod nearest;
mod remap;

pub use bilinear::bilinear_interpolation;
pub use interpolate::{interpolate_pixel, InterpolationMode};
pub use nearest::nearest_neighbor_interpolation;
pub use remap::remap;
