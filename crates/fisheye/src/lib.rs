#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use fisheye_image as image;

#[doc(inline)]
pub use fisheye_imgproc as imgproc;

#[doc(inline)]
pub use fisheye_calib3d as calib3d;
