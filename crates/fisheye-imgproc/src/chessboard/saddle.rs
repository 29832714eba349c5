use fisheye_image::{Image, ImageError};
use rayon::prelude::*;

use super::DetectorParams;
use crate::{features, threshold};

/// Number of samples taken on the circle around a candidate.
const RING_SAMPLES: usize = 16;

/// Offsets of the samples on a circle of the given radius.
fn ring_offsets(radius: f32) -> [[f32; 2]; RING_SAMPLES] {
    let mut offsets = [[0.0; 2]; RING_SAMPLES];
    for (k, offset) in offsets.iter_mut().enumerate() {
        let angle = 2.0 * std::f32::consts::PI * k as f32 / RING_SAMPLES as f32;
        *offset = [radius * angle.cos(), radius * angle.sin()];
    }
    offsets
}

/// Check that the binary pattern around `center` looks like a checkerboard junction.
///
/// The ring must cross exactly four dark/bright boundaries, each color must cover between
/// a quarter and three quarters of it, and opposite samples must mostly agree.
fn is_junction(binary: &Image<u8, 1>, center: [f32; 2], offsets: &[[f32; 2]; RING_SAMPLES]) -> bool {
    let (cols, rows) = (binary.cols() as isize, binary.rows() as isize);
    let data = binary.as_slice();

    let mut samples = [false; RING_SAMPLES];
    for (sample, offset) in samples.iter_mut().zip(offsets.iter()) {
        let x = (center[0] + offset[0]).round() as isize;
        let y = (center[1] + offset[1]).round() as isize;
        if x < 0 || y < 0 || x >= cols || y >= rows {
            return false;
        }
        *sample = data[(y * cols + x) as usize] > 0;
    }

    let transitions = (0..RING_SAMPLES)
        .filter(|&k| samples[k] != samples[(k + 1) % RING_SAMPLES])
        .count();
    if transitions != 4 {
        return false;
    }

    let bright = samples.iter().filter(|&&s| s).count();
    if !(RING_SAMPLES / 4..=3 * RING_SAMPLES / 4).contains(&bright) {
        return false;
    }

    let half = RING_SAMPLES / 2;
    let symmetric = (0..half)
        .filter(|&k| samples[k] == samples[k + half])
        .count();
    symmetric + 2 >= half
}

/// Fit a parabola through three samples and return the offset of its apex.
fn parabola_offset(prev: f32, center: f32, next: f32) -> f32 {
    let denom = prev - 2.0 * center + next;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
}

/// Detect checkerboard junction candidates in a smoothed grayscale image.
///
/// Candidates are local maxima of the negative Hessian determinant that pass a
/// ring test on the adaptively thresholded image.
///
/// # Arguments
///
/// * `smoothed` - The smoothed grayscale image with values in `[0, 1]`.
/// * `params` - The detector parameters.
///
/// # Returns
///
/// The candidate locations as `[x, y]` with sub-pixel offsets.
pub fn saddle_candidates(
    smoothed: &Image<f32, 1>,
    params: &DetectorParams,
) -> Result<Vec<[f64; 2]>, ImageError> {
    let size = smoothed.size();
    let (cols, rows) = (size.width, size.height);

    let mut hessian = Image::<f32, 1>::from_size_val(size, 0.0)?;
    features::hessian_response(smoothed, &mut hessian)?;

    // saddles have a negative determinant
    let response = hessian
        .as_slice()
        .iter()
        .map(|&d| (-d).max(0.0))
        .collect::<Vec<_>>();

    let max_response = response.iter().copied().fold(0.0f32, f32::max);
    if max_response <= f32::EPSILON {
        return Ok(Vec::new());
    }
    let min_response = params.response_threshold * max_response;

    let block_size = 2 * (2.0 * params.ring_radius).round().max(1.0) as usize + 1;
    let mut binary = Image::<u8, 1>::from_size_val(size, 0)?;
    threshold::adaptive_threshold_mean(smoothed, &mut binary, block_size, 0.0)?;

    let offsets = ring_offsets(params.ring_radius);
    let radius = params.nms_radius.max(1);
    let margin = (params.ring_radius.ceil() as usize + 1).max(radius);

    if cols <= 2 * margin || rows <= 2 * margin {
        return Ok(Vec::new());
    }

    let candidates = (margin..rows - margin)
        .into_par_iter()
        .flat_map_iter(|y| {
            let response = &response;
            let binary = &binary;
            let offsets = &offsets;
            (margin..cols - margin).filter_map(move |x| {
                let idx = y * cols + x;
                let value = response[idx];
                if value < min_response {
                    return None;
                }

                // strict maximum, ties broken by the scan order
                for ny in y.saturating_sub(radius)..=(y + radius).min(rows - 1) {
                    for nx in x.saturating_sub(radius)..=(x + radius).min(cols - 1) {
                        let nidx = ny * cols + nx;
                        if nidx == idx {
                            continue;
                        }
                        let other = response[nidx];
                        if other > value || (other == value && nidx < idx) {
                            return None;
                        }
                    }
                }

                let dx = parabola_offset(response[idx - 1], value, response[idx + 1]);
                let dy = parabola_offset(response[idx - cols], value, response[idx + cols]);
                let center = [x as f32 + dx, y as f32 + dy];

                if !is_junction(binary, center, offsets) {
                    return None;
                }

                Some([center[0] as f64, center[1] as f64])
            })
        })
        .collect::<Vec<_>>();

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_image::ImageSize;

    fn quadrants(size: ImageSize, center: [f32; 2]) -> Image<f32, 1> {
        Image::from_fn(size, |x, y| {
            let s = (x as f32 - center[0]) * (y as f32 - center[1]);
            [if s > 0.0 { 0.9 } else { 0.1 }]
        })
    }

    #[test]
    fn single_junction_is_detected() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 40,
            height: 40,
        };
        let image = quadrants(size, [19.5, 20.5]);
        let mut smoothed = Image::<f32, 1>::from_size_val(size, 0.0)?;
        crate::filter::gaussian_blur(&image, &mut smoothed, (9, 9), (1.5, 1.5))?;

        let candidates = saddle_candidates(&smoothed, &DetectorParams::default())?;
        assert_eq!(candidates.len(), 1);
        approx::assert_abs_diff_eq!(candidates[0][0], 19.5, epsilon = 1.0);
        approx::assert_abs_diff_eq!(candidates[0][1], 20.5, epsilon = 1.0);
        Ok(())
    }

    #[test]
    fn single_corner_is_rejected() -> Result<(), ImageError> {
        // a dark square corner has a saddle-like Hessian but only two transitions
        let size = ImageSize {
            width: 40,
            height: 40,
        };
        let image = Image::from_fn(size, |x, y| [if x > 20 && y > 20 { 0.1 } else { 0.9 }]);
        let mut smoothed = Image::<f32, 1>::from_size_val(size, 0.0)?;
        crate::filter::gaussian_blur(&image, &mut smoothed, (9, 9), (1.5, 1.5))?;

        let candidates = saddle_candidates(&smoothed, &DetectorParams::default())?;
        assert!(candidates.is_empty());
        Ok(())
    }

    #[test]
    fn parabola_apex() {
        approx::assert_relative_eq!(parabola_offset(1.0, 2.0, 1.0), 0.0);
        assert!(parabola_offset(1.0, 2.0, 1.5) > 0.0);
    }
}
