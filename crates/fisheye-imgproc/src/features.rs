use fisheye_image::{Image, ImageError};

use rayon::prelude::*;

/// Compute the Hessian response of an image.
///
/// The response is the determinant of the Hessian matrix estimated with finite
/// differences over a 3x3 neighbourhood. Saddle points, such as the junctions of a
/// checkerboard, have a negative determinant. The one pixel border is left at zero.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W).
/// * `dst` - The destination image with shape (H, W).
pub fn hessian_response(src: &Image<f32, 1>, dst: &mut Image<f32, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let (rows, cols) = (src.rows(), src.cols());
    if rows < 3 || cols < 3 {
        dst.as_slice_mut().iter_mut().for_each(|v| *v = 0.0);
        return Ok(());
    }

    let src_data = src.as_slice();

    dst.as_slice_mut()
        .par_chunks_exact_mut(cols)
        .enumerate()
        .for_each(|(row_idx, row_chunk)| {
            if row_idx == 0 || row_idx == rows - 1 {
                row_chunk.iter_mut().for_each(|v| *v = 0.0);
                return;
            }

            let row_offset = row_idx * cols;

            row_chunk
                .iter_mut()
                .enumerate()
                .for_each(|(col_idx, dst_pixel)| {
                    if col_idx == 0 || col_idx == cols - 1 {
                        *dst_pixel = 0.0;
                        return;
                    }

                    let current_idx = row_offset + col_idx;
                    let prev_row_idx = current_idx - cols;
                    let next_row_idx = current_idx + cols;

                    let v11 = src_data[prev_row_idx - 1];
                    let v12 = src_data[prev_row_idx];
                    let v13 = src_data[prev_row_idx + 1];
                    let v21 = src_data[current_idx - 1];
                    let v22 = src_data[current_idx];
                    let v23 = src_data[current_idx + 1];
                    let v31 = src_data[next_row_idx - 1];
                    let v32 = src_data[next_row_idx];
                    let v33 = src_data[next_row_idx + 1];

                    let dxx = v21 - 2.0 * v22 + v23;
                    let dyy = v12 - 2.0 * v22 + v32;
                    let dxy = 0.25 * (v31 - v11 - v33 + v13);

                    *dst_pixel = dxx * dyy - dxy * dxy;
                });
        });

    Ok(())
}
