use crate::parallel;

use super::interpolate::interpolate_pixel;
use super::InterpolationMode;
use fisheye_image::{Image, ImageError};

/// Apply generic geometric transformation to an image.
///
/// Destination pixels whose source coordinate falls outside the image are set to zero.
///
/// # Arguments
///
/// * `src` - The input image container with shape (height, width, C).
/// * `dst` - The output image container with shape (height, width, C).
/// * `map_x` - The x coordinates of the pixels to interpolate.
/// * `map_y` - The y coordinates of the pixels to interpolate.
/// * `interpolation` - The interpolation mode to use.
///
/// # Errors
///
/// * The mapx and mapy must have the same size.
/// * The output image must have the same size as the mapx and mapy.
pub fn remap<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    map_x: &Image<f32, 1>,
    map_y: &Image<f32, 1>,
    interpolation: InterpolationMode,
) -> Result<(), ImageError> {
    if map_x.size() != map_y.size() {
        return Err(ImageError::InvalidImageSize(
            map_x.cols(),
            map_x.rows(),
            map_y.cols(),
            map_y.rows(),
        ));
    }

    if dst.size() != map_x.size() {
        return Err(ImageError::InvalidImageSize(
            map_x.cols(),
            map_x.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let max_x = src.cols() as f32 - 1.0;
    let max_y = src.rows() as f32 - 1.0;

    // parallelize the remap operation by rows
    parallel::par_iter_rows_resample(dst, map_x, map_y, |&x, &y, dst_pixel| {
        if !(x >= 0.0 && y >= 0.0 && x <= max_x && y <= max_y) {
            dst_pixel.iter_mut().for_each(|p| *p = 0.0);
            return;
        }
        let pixel = interpolate_pixel(src, x, y, interpolation);
        dst_pixel.copy_from_slice(&pixel);
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use fisheye_image::{Image, ImageError, ImageSize};

    #[test]
    fn remap_smoke() -> Result<(), ImageError> {
        let image = Image::<_, 1>::new(
            ImageSize {
                width: 3,
                height: 3,
            },
            vec![0f32, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )?;

        let new_size = ImageSize {
            width: 2,
            height: 2,
        };

        let map_x = Image::<f32, 1>::new(new_size, vec![0.0, 2.0, 0.0, 2.0])?;
        let map_y = Image::<f32, 1>::new(new_size, vec![0.0, 0.0, 2.0, 2.0])?;

        let mut image_transformed = Image::<_, 1>::from_size_val(new_size, 0.0)?;

        super::remap(
            &image,
            &mut image_transformed,
            &map_x,
            &map_y,
            super::InterpolationMode::Bilinear,
        )?;

        let expected = [0.0, 2.0, 6.0, 8.0];
        for (a, b) in image_transformed.as_slice().iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }

        Ok(())
    }

    #[test]
    fn remap_outside_is_zero() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::from_size_val([3, 3].into(), 1.0)?;
        let size = ImageSize {
            width: 2,
            height: 1,
        };
        let map_x = Image::<f32, 1>::new(size, vec![1.0, -4.0])?;
        let map_y = Image::<f32, 1>::new(size, vec![1.0, 1.0])?;
        let mut dst = Image::<f32, 1>::from_size_val(size, 0.5)?;
        super::remap(
            &image,
            &mut dst,
            &map_x,
            &map_y,
            super::InterpolationMode::Nearest,
        )?;
        assert_eq!(dst.as_slice(), &[1.0, 0.0]);
        Ok(())
    }
}
