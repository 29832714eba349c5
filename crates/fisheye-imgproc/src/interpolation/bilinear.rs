use fisheye_image::Image;

/// Kernel for bilinear interpolation
///
/// Coordinates outside the image take the value of the closest border pixel.
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
///
/// # Returns
///
/// The interpolated pixel values.
pub fn bilinear_interpolation<const C: usize>(image: &Image<f32, C>, u: f32, v: f32) -> [f32; C] {
    let (rows, cols) = (image.rows(), image.cols());
    let mut pixel = [0.0; C];
    if rows == 0 || cols == 0 {
        return pixel;
    }

    let u = u.clamp(0.0, (cols - 1) as f32);
    let v = v.clamp(0.0, (rows - 1) as f32);

    let iu0 = (u.floor() as usize).min(cols - 1);
    let iv0 = (v.floor() as usize).min(rows - 1);
    let iu1 = (iu0 + 1).min(cols - 1);
    let iv1 = (iv0 + 1).min(rows - 1);

    let frac_u = u - iu0 as f32;
    let frac_v = v - iv0 as f32;

    let w00 = (1.0 - frac_u) * (1.0 - frac_v);
    let w01 = frac_u * (1.0 - frac_v);
    let w10 = (1.0 - frac_u) * frac_v;
    let w11 = frac_u * frac_v;

    let data = image.as_slice();
    let base00 = (iv0 * cols + iu0) * C;
    let base01 = (iv0 * cols + iu1) * C;
    let base10 = (iv1 * cols + iu0) * C;
    let base11 = (iv1 * cols + iu1) * C;

    for (k, p) in pixel.iter_mut().enumerate() {
        *p = data[base00 + k] * w00
            + data[base01 + k] * w01
            + data[base10 + k] * w10
            + data[base11 + k] * w11;
    }

    pixel
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_image::{ImageError, ImageSize};

    #[test]
    fn test_bilinear_interpolation() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::new(
            ImageSize {
                width: 2,
                height: 2,
            },
            vec![0.0, 1.0, 2.0, 3.0],
        )?;
        approx::assert_relative_eq!(bilinear_interpolation(&image, 0.5, 0.5)[0], 1.5);
        approx::assert_relative_eq!(bilinear_interpolation(&image, 1.0, 1.0)[0], 3.0);
        approx::assert_relative_eq!(bilinear_interpolation(&image, -3.0, 0.0)[0], 0.0);
        Ok(())
    }
}
