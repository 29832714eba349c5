/// An error type for the image module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImageError {
    /// Error when channel and shape are not valid.
    #[error("Data length ({0}) does not match the image size ({1})")]
    InvalidChannelShape(usize, usize),

    /// Error when the image size is not valid.
    #[error("Invalid image size ({0}, {1}) mismatch ({2}, {3})")]
    InvalidImageSize(usize, usize, usize, usize),

    /// Error when the image is empty.
    #[error("Image has zero width or height")]
    EmptyImage,

    /// Error when the cast operation fails.
    #[error("Failed to cast image data")]
    CastError,

    /// Error when the pixel coordinates are out of bounds.
    #[error("Pixel coordinate ({0}, {1}) is out of bounds ({2}, {3})")]
    PixelIndexOutOfBounds(usize, usize, usize, usize),

    /// Error when the number of histogram bins is invalid.
    #[error("Invalid histogram bins {0}, expected a value in [1, 256]")]
    InvalidHistogramBins(usize),

    /// Error when the kernel size is invalid.
    #[error("Invalid kernel size {0}, expected an odd positive number")]
    InvalidKernelSize(usize),
}
