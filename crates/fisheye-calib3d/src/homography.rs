use crate::linalg::{self, Mat33};

/// Similarity transform moving the centroid to the origin and the mean distance to sqrt(2).
fn normalization_transform(points: &[[f64; 2]]) -> Option<Mat33> {
    let n = points.len() as f64;
    let (mut mx, mut my) = (0.0, 0.0);
    for p in points {
        mx += p[0];
        my += p[1];
    }
    mx /= n;
    my /= n;

    let mean_dist = points
        .iter()
        .map(|p| (p[0] - mx).hypot(p[1] - my))
        .sum::<f64>()
        / n;
    if !mean_dist.is_finite() || mean_dist < f64::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some([[s, 0.0, -s * mx], [0.0, s, -s * my], [0.0, 0.0, 1.0]])
}

fn transform_point(m: &Mat33, p: &[f64; 2]) -> [f64; 2] {
    [
        m[0][0] * p[0] + m[0][1] * p[1] + m[0][2],
        m[1][0] * p[0] + m[1][1] * p[1] + m[1][2],
    ]
}

/// Estimate the homography mapping `src` to `dst` with the normalized DLT.
///
/// # Arguments
///
/// * `src` - The source points, at least four.
/// * `dst` - The destination points, same length as `src`.
///
/// # Returns
///
/// The homography scaled so its last entry is one when it is not close to zero, or
/// `None` when the points are degenerate.
pub fn find_homography_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Mat33> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let t_src = normalization_transform(src)?;
    let t_dst = normalization_transform(dst)?;

    // accumulate A^T A of the 2N x 9 DLT system
    let mut ata = [[0.0; 9]; 9];
    for (p, q) in src.iter().zip(dst.iter()) {
        let [x, y] = transform_point(&t_src, p);
        let [u, v] = transform_point(&t_dst, q);
        let rows = [
            [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
            [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
        ];
        for row in &rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[i][j] += row[i] * row[j];
                }
            }
        }
    }

    // the solution is the right singular vector of the smallest singular value
    let svd = faer::Mat::<f64>::from_fn(9, 9, |i, j| ata[i][j]).svd();
    let s = svd.s_diagonal();

    // a second vanishing singular value means the solution is not unique
    if s.read(7) <= 1e-12 * s.read(0) {
        return None;
    }

    let v = svd.v();
    let hn = [
        [v.read(0, 8), v.read(1, 8), v.read(2, 8)],
        [v.read(3, 8), v.read(4, 8), v.read(5, 8)],
        [v.read(6, 8), v.read(7, 8), v.read(8, 8)],
    ];

    let t_dst_inv = linalg::inverse_mat33(&t_dst)?;
    let mut h = linalg::mat33_mul(&t_dst_inv, &linalg::mat33_mul(&hn, &t_src));

    let scale = if h[2][2].abs() > 1e-12 {
        h[2][2]
    } else {
        h.iter().flatten().map(|v| v * v).sum::<f64>().sqrt()
    };
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }
    h.iter_mut().flatten().for_each(|v| *v /= scale);

    if linalg::det_mat33(&h).abs() < 1e-12 {
        return None;
    }

    Some(h)
}

/// Apply a homography to a point.
pub fn apply_homography(h: &Mat33, p: &[f64; 2]) -> Option<[f64; 2]> {
    let w = h[2][0] * p[0] + h[2][1] * p[1] + h[2][2];
    if w.abs() < f64::EPSILON {
        return None;
    }
    let [x, y] = transform_point(h, p);
    Some([x / w, y / w])
}
