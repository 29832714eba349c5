use fisheye_image::{Image, ImageError};

use super::{kernels, separable_filter};

/// Blur an image using a box blur filter
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_size` - The size of the kernel (kernel_x, kernel_y).
///
/// PRECONDITION: `src` and `dst` must have the same shape.
pub fn box_blur<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    kernel_size: (usize, usize),
) -> Result<(), ImageError> {
    let kernel_x = kernels::box_blur_kernel_1d(kernel_size.0);
    let kernel_y = kernels::box_blur_kernel_1d(kernel_size.1);
    separable_filter(src, dst, &kernel_x, &kernel_y)
}

/// Blur an image using a gaussian blur filter
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_size` - The size of the kernel (kernel_x, kernel_y).
/// * `sigma` - The sigma of the gaussian kernel.
///
/// PRECONDITION: `src` and `dst` must have the same shape.
pub fn gaussian_blur<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    kernel_size: (usize, usize),
    sigma: (f32, f32),
) -> Result<(), ImageError> {
    let kernel_x = kernels::gaussian_kernel_1d(kernel_size.0, sigma.0);
    let kernel_y = kernels::gaussian_kernel_1d(kernel_size.1, sigma.1);
    separable_filter(src, dst, &kernel_x, &kernel_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_image::ImageSize;

    #[test]
    fn test_box_blur_step() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 6,
            height: 1,
        };
        let img = Image::<f32, 1>::new(size, vec![0.0, 0.0, 0.0, 3.0, 3.0, 3.0])?;
        let mut dst = Image::<f32, 1>::from_size_val(size, 0.0)?;
        box_blur(&img, &mut dst, (3, 1))?;
        let expected = [0.0, 0.0, 1.0, 2.0, 3.0, 3.0];
        for (a, b) in dst.as_slice().iter().zip(expected.iter()) {
            approx::assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_gaussian_blur_preserves_mean() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 9,
            height: 9,
        };
        let mut data = vec![0.0f32; 81];
        data[40] = 81.0;
        let img = Image::<f32, 1>::new(size, data)?;
        let mut dst = Image::<f32, 1>::from_size_val(size, 0.0)?;
        gaussian_blur(&img, &mut dst, (5, 5), (1.0, 1.0))?;
        let sum: f32 = dst.as_slice().iter().sum();
        approx::assert_relative_eq!(sum, 81.0, epsilon = 1e-3);
        assert!(dst.as_slice()[40] > dst.as_slice()[41]);
        Ok(())
    }
}
