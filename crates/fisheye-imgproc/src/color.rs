use crate::parallel;
use fisheye_image::{Image, ImageError};

/// Convert an RGB8 image to grayscale using the fixed-point formula:
///
/// Y = (77 * R + 150 * G + 29 * B) >> 8
///
/// # Arguments
///
/// * `src` - The input RGB8 image.
/// * `dst` - The output grayscale image.
///
/// Precondition: the input and output images must have the same size.
pub fn gray_from_rgb_u8(src: &Image<u8, 3>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let r = src_pixel[0] as u16;
        let g = src_pixel[1] as u16;
        let b = src_pixel[2] as u16;
        dst_pixel[0] = ((r * 77 + g * 150 + b * 29) >> 8) as u8;
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_image::ImageSize;

    #[test]
    fn gray_from_rgb_u8_pure_colors() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 1,
        };
        let rgb = Image::<u8, 3>::new(size, vec![255, 0, 0, 0, 255, 0, 255, 255, 255])?;
        let mut gray = Image::<u8, 1>::from_size_val(size, 0)?;
        gray_from_rgb_u8(&rgb, &mut gray)?;
        assert_eq!(gray.as_slice(), &[76, 149, 255]);
        Ok(())
    }

    #[test]
    fn gray_from_rgb_u8_size_mismatch() -> Result<(), ImageError> {
        let rgb = Image::<u8, 3>::from_size_val([2, 2].into(), 128)?;
        let mut gray = Image::<u8, 1>::from_size_val([3, 2].into(), 0)?;
        assert!(gray_from_rgb_u8(&rgb, &mut gray).is_err());
        Ok(())
    }
}
