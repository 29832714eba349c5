use fisheye_image::{Image, ImageError};

use crate::{filter, parallel};

/// Apply an adaptive threshold against the local mean of the image.
///
/// A pixel is set to 255 when it is brighter than the mean of its `block_size` x `block_size`
/// neighbourhood minus `offset`, and to 0 otherwise.
///
/// # Arguments
///
/// * `src` - The input grayscale image.
/// * `dst` - The output binary image.
/// * `block_size` - The odd side length of the averaging window.
/// * `offset` - The constant subtracted from the local mean.
///
/// # Errors
///
/// Returns an error when the sizes mismatch or the block size is even.
pub fn adaptive_threshold_mean(
    src: &Image<f32, 1>,
    dst: &mut Image<u8, 1>,
    block_size: usize,
    offset: f32,
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    if block_size % 2 == 0 {
        return Err(ImageError::InvalidKernelSize(block_size));
    }

    let mut mean = Image::<f32, 1>::from_size_val(src.size(), 0.0)?;
    filter::box_blur(src, &mut mean, (block_size, block_size))?;

    parallel::par_iter_rows_val_two(src, &mean, dst, |&value, &local_mean, out| {
        *out = if value > local_mean - offset { 255 } else { 0 };
    });

    Ok(())
}
