use fisheye_image::{Image, ImageError};

use crate::{histogram, parallel};

/// Equalize the histogram of an 8-bit grayscale image.
///
/// The cumulative distribution of the intensities is stretched over the full `[0, 255]`
/// range, which normalizes the contrast of under or over exposed captures.
///
/// # Arguments
///
/// * `src` - The input grayscale image.
/// * `dst` - The output grayscale image with the same size.
///
/// # Example
///
/// ```
/// use fisheye_image::{Image, ImageSize};
/// use fisheye_imgproc::enhance::equalize_histogram;
///
/// let image = Image::<u8, 1>::new(ImageSize { width: 2, height: 1 }, vec![100, 110]).unwrap();
/// let mut dst = Image::<u8, 1>::from_size_val(image.size(), 0).unwrap();
///
/// equalize_histogram(&image, &mut dst).unwrap();
/// assert_eq!(dst.as_slice(), &[0, 255]);
/// ```
pub fn equalize_histogram(src: &Image<u8, 1>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let total = src.as_slice().len();
    if total == 0 {
        return Ok(());
    }

    let mut hist = vec![0usize; 256];
    histogram::compute_histogram(src, &mut hist, 256)?;

    // the first populated bin maps to zero
    let first = hist.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if first == total {
        dst.as_slice_mut().copy_from_slice(src.as_slice());
        return Ok(());
    }

    let scale = 255.0 / (total - first) as f32;
    let mut lut = [0u8; 256];
    let mut acc = 0usize;
    for (value, &count) in lut.iter_mut().zip(hist.iter()) {
        acc += count;
        *value = ((acc.saturating_sub(first)) as f32 * scale)
            .round()
            .clamp(0.0, 255.0) as u8;
    }

    parallel::par_iter_rows_val(src, dst, |&s, d| *d = lut[s as usize]);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_image::ImageSize;

    #[test]
    fn test_equalize_low_contrast() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 4,
            height: 1,
        };
        let image = Image::<u8, 1>::new(size, vec![60, 61, 62, 63])?;
        let mut dst = Image::<u8, 1>::from_size_val(size, 0)?;
        equalize_histogram(&image, &mut dst)?;
        assert_eq!(dst.as_slice(), &[0, 85, 170, 255]);
        Ok(())
    }

    #[test]
    fn test_equalize_constant() -> Result<(), ImageError> {
        let image = Image::<u8, 1>::from_size_val([3, 3].into(), 42)?;
        let mut dst = Image::<u8, 1>::from_size_val(image.size(), 0)?;
        equalize_histogram(&image, &mut dst)?;
        assert_eq!(dst.as_slice(), image.as_slice());
        Ok(())
    }
}
