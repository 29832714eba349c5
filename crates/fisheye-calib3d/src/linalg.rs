//! Helpers for 3-vectors and row-major 3x3 matrices stored as plain arrays.

use faer::prelude::SpSolver;

/// A 3x3 row-major matrix.
pub type Mat33 = [[f64; 3]; 3];

/// The 3x3 identity matrix.
pub const IDENTITY: Mat33 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Dot product of two 3-vectors.
pub fn dot_product3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Cross product of two 3-vectors.
pub fn cross_vec3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Euclidean norm of a 3-vector.
pub fn norm3(a: &[f64; 3]) -> f64 {
    dot_product3(a, a).sqrt()
}

/// Matrix-vector product.
pub fn mat33_mul_vec3(m: &Mat33, v: &[f64; 3]) -> [f64; 3] {
    [
        dot_product3(&m[0], v),
        dot_product3(&m[1], v),
        dot_product3(&m[2], v),
    ]
}

/// Matrix-matrix product.
pub fn mat33_mul(a: &Mat33, b: &Mat33) -> Mat33 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Transpose of a matrix.
pub fn transpose_mat33(m: &Mat33) -> Mat33 {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// Determinant of a matrix.
pub fn det_mat33(m: &Mat33) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Inverse of a matrix, or `None` when it is numerically singular.
pub fn inverse_mat33(m: &Mat33) -> Option<Mat33> {
    let det = det_mat33(m);
    let scale = m.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if !det.is_finite() || det.abs() <= 1e-12 * scale.powi(3).max(f64::MIN_POSITIVE) {
        return None;
    }

    let inv_det = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

/// Skew-symmetric matrix such that `skew(a) * b == a x b`.
pub fn skew(a: &[f64; 3]) -> Mat33 {
    [[0.0, -a[2], a[1]], [a[2], 0.0, -a[0]], [-a[1], a[0], 0.0]]
}

/// Rotation matrix of an axis-angle vector (Rodrigues' formula).
pub fn rotation_from_axis_angle(rvec: &[f64; 3]) -> Mat33 {
    let theta = norm3(rvec);
    let k = skew(rvec);
    let k2 = mat33_mul(&k, &k);

    // series expansion close to the identity
    let (a, b) = if theta < 1e-8 {
        (1.0 - theta * theta / 6.0, 0.5 - theta * theta / 24.0)
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / (theta * theta))
    };

    let mut r = IDENTITY;
    for i in 0..3 {
        for j in 0..3 {
            r[i][j] += a * k[i][j] + b * k2[i][j];
        }
    }
    r
}

/// Axis-angle vector of a rotation matrix.
pub fn axis_angle_from_rotation(r: &Mat33) -> [f64; 3] {
    let cos_theta = ((r[0][0] + r[1][1] + r[2][2] - 1.0) * 0.5).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    let vee = [r[2][1] - r[1][2], r[0][2] - r[2][0], r[1][0] - r[0][1]];

    if theta < 1e-8 {
        return [vee[0] * 0.5, vee[1] * 0.5, vee[2] * 0.5];
    }

    if std::f64::consts::PI - theta < 1e-6 {
        // R = 2 n n^T - I, recover the axis from the largest diagonal entry
        let diag = [r[0][0], r[1][1], r[2][2]];
        let k = (0..3)
            .max_by(|&a, &b| diag[a].total_cmp(&diag[b]))
            .unwrap_or(0);
        let nk = ((diag[k] + 1.0) * 0.5).max(0.0).sqrt();
        let mut axis = [0.0; 3];
        for (i, a) in axis.iter_mut().enumerate() {
            *a = if i == k {
                nk
            } else {
                (r[i][k] + r[k][i]) / (4.0 * nk)
            };
        }
        let scale = theta / norm3(&axis);
        return [axis[0] * scale, axis[1] * scale, axis[2] * scale];
    }

    let scale = theta / (2.0 * theta.sin());
    [vee[0] * scale, vee[1] * scale, vee[2] * scale]
}

/// Closest rotation matrix to `m` in the Frobenius norm.
pub fn nearest_rotation(m: &Mat33) -> Mat33 {
    let mat = faer::Mat::<f64>::from_fn(3, 3, |i, j| m[i][j]);
    let svd = mat.svd();
    let (u, v) = (svd.u(), svd.v());

    let compose = |d: [f64; 3]| {
        let mut r = [[0.0; 3]; 3];
        for (i, row) in r.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (0..3).map(|k| u.read(i, k) * d[k] * v.read(j, k)).sum();
            }
        }
        r
    };

    let r = compose([1.0, 1.0, 1.0]);
    if det_mat33(&r) < 0.0 {
        compose([1.0, 1.0, -1.0])
    } else {
        r
    }
}

/// Solve the square system `a * x = b` where `a` is stored row-major.
///
/// Returns `None` if the dimensions do not match or the solution is not finite.
pub fn solve_linear_system(a: &[f64], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 || a.len() != n * n {
        return None;
    }

    let mat = faer::Mat::<f64>::from_fn(n, n, |i, j| a[i * n + j]);
    let rhs = faer::Mat::<f64>::from_fn(n, 1, |i, _| b[i]);
    let sol = mat.partial_piv_lu().solve(rhs);

    let x = (0..n).map(|i| sol.read(i, 0)).collect::<Vec<_>>();
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Ratio of the largest to the smallest singular value of a row-major `n x n` matrix.
pub fn singular_value_ratio(a: &[f64], n: usize) -> f64 {
    if n == 0 || a.len() != n * n {
        return f64::INFINITY;
    }
    let svd = faer::Mat::<f64>::from_fn(n, n, |i, j| a[i * n + j]).svd();
    let s = svd.s_diagonal();
    let (max, min) = (s.read(0), s.read(n - 1));
    if min > 0.0 && max.is_finite() {
        max / min
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse_mat33() {
        let m = [[4.0, 7.0, 2.0], [3.0, 6.0, 1.0], [2.0, 5.0, 3.0]];
        let inv = inverse_mat33(&m).expect("invertible");
        let prod = mat33_mul(&m, &inv);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(prod[i][j], IDENTITY[i][j], epsilon = 1e-12);
            }
        }
        assert!(inverse_mat33(&[[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]).is_none());
    }

    #[test]
    fn test_axis_angle_roundtrip() {
        for rvec in [
            [0.1, -0.2, 0.3],
            [0.0, 0.0, 0.0],
            [1e-10, 0.0, 0.0],
            [0.0, std::f64::consts::PI - 1e-9, 0.0],
            [2.0, 0.5, -1.0],
        ] {
            let r = rotation_from_axis_angle(&rvec);
            assert_relative_eq!(det_mat33(&r), 1.0, epsilon = 1e-12);
            let back = axis_angle_from_rotation(&r);
            for k in 0..3 {
                assert_relative_eq!(back[k], rvec[k], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_rotation_about_z() {
        let r = rotation_from_axis_angle(&[0.0, 0.0, std::f64::consts::FRAC_PI_2]);
        let p = mat33_mul_vec3(&r, &[1.0, 0.0, 0.0]);
        assert_relative_eq!(p[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_linear_system() -> Result<(), Box<dyn std::error::Error>> {
        let a = [4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0];
        let x = solve_linear_system(&a, &[1.0, 2.0, 3.0]).ok_or("singular")?;
        assert_relative_eq!(4.0 * x[0] + x[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[0] + 3.0 * x[1] + x[2], 2.0, epsilon = 1e-12);
        assert_relative_eq!(x[1] + 2.0 * x[2], 3.0, epsilon = 1e-12);

        assert!(solve_linear_system(&[1.0, 2.0, 2.0, 4.0], &[1.0, 1.0]).is_none());
        assert_relative_eq!(singular_value_ratio(&[2.0, 0.0, 0.0, 0.5], 2), 4.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_nearest_rotation() {
        let r = rotation_from_axis_angle(&[0.3, 0.1, -0.4]);
        let mut noisy = r;
        noisy[0][1] += 1e-3;
        noisy[2][0] -= 1e-3;
        let fixed = nearest_rotation(&noisy);
        let should_be_identity = mat33_mul(&fixed, &transpose_mat33(&fixed));
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(should_be_identity[i][j], IDENTITY[i][j], epsilon = 1e-12);
                assert_relative_eq!(fixed[i][j], r[i][j], epsilon = 2e-3);
            }
        }
        assert_relative_eq!(det_mat33(&fixed), 1.0, epsilon = 1e-12);
    }
}
