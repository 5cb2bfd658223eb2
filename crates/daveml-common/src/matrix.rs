//! Small dense-matrix helpers used by the linear-algebra operators: integer
//! powers, rotation matrices, skew-symmetric forms and diagonal extraction.

use crate::value::DMat;
use crate::MathError;

/// `m^n` by repeated multiplication; `n = 0` yields the identity. Only
/// non-negative integer exponents are defined for matrices.
pub fn pow_int(m: &DMat, n: f64, op: &'static str) -> Result<DMat, MathError> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(MathError::NegativePower { op });
    }
    if m.nrows() != m.ncols() {
        return Err(MathError::ShapeMismatch {
            op,
            lhs_rows: m.nrows(),
            lhs_cols: m.ncols(),
            rhs_rows: m.ncols(),
            rhs_cols: m.nrows(),
        });
    }
    let mut out = DMat::identity(m.nrows(), m.ncols());
    for _ in 0..n as usize {
        out = &out * m;
    }
    Ok(out)
}

/// Body-axis transformation matrix for the aerospace 3-2-1 rotation sequence
/// (yaw `psi`, pitch `theta`, roll `phi`), angles in radians.
pub fn euler_transform(psi: f64, theta: f64, phi: f64) -> DMat {
    let (s_psi, c_psi) = psi.sin_cos();
    let (s_tht, c_tht) = theta.sin_cos();
    let (s_phi, c_phi) = phi.sin_cos();

    DMat::from_row_slice(
        3,
        3,
        &[
            c_tht * c_psi,
            c_tht * s_psi,
            -s_tht,
            s_phi * s_tht * c_psi - c_phi * s_psi,
            s_phi * s_tht * s_psi + c_phi * c_psi,
            s_phi * c_tht,
            c_phi * s_tht * c_psi + s_phi * s_psi,
            c_phi * s_tht * s_psi - s_phi * c_psi,
            c_phi * c_tht,
        ],
    )
}

/// Skew-symmetric cross-product matrix of a 3-vector.
pub fn skew(v: &DMat, op: &'static str) -> Result<DMat, MathError> {
    if v.len() != 3 {
        return Err(MathError::NotAVector3 { op });
    }
    let (x, y, z) = (v[0], v[1], v[2]);
    Ok(DMat::from_row_slice(
        3,
        3,
        &[0.0, -z, y, z, 0.0, -x, -y, x, 0.0],
    ))
}

/// Cross product of two 3-vectors, returned in the left operand's shape.
pub fn cross3(a: &DMat, b: &DMat, op: &'static str) -> Result<DMat, MathError> {
    if a.len() != 3 || b.len() != 3 {
        return Err(MathError::NotAVector3 { op });
    }
    let data = [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ];
    Ok(DMat::from_column_slice(a.nrows(), a.ncols(), &data))
}

/// Diagonal of `m` starting at the 0-based offset `(row0, col0)`, walking
/// down-and-right until either edge.
pub fn diagonal_from(m: &DMat, row0: usize, col0: usize, op: &'static str) -> Result<Vec<f64>, MathError> {
    if row0 >= m.nrows() || col0 >= m.ncols() {
        return Err(MathError::IndexOutOfRange {
            op,
            index: row0.max(col0) + 1,
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    let len = (m.nrows() - row0).min(m.ncols() - col0);
    Ok((0..len).map(|k| m[(row0 + k, col0 + k)]).collect())
}

/// Rectangular slice of `m`: `nrows x ncols` anchored at 0-based `(row0, col0)`.
pub fn slice(
    m: &DMat,
    row0: usize,
    col0: usize,
    nrows: usize,
    ncols: usize,
    op: &'static str,
) -> Result<DMat, MathError> {
    if row0 + nrows > m.nrows() || col0 + ncols > m.ncols() {
        return Err(MathError::IndexOutOfRange {
            op,
            index: (row0 + nrows).max(col0 + ncols),
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    Ok(m.view((row0, col0), (nrows, ncols)).into_owned())
}

/// Factorial extended to doubles the way the evaluator needs it: the product
/// over the nearest integer for non-negative arguments, NaN otherwise.
pub fn fact(x: f64) -> f64 {
    if x.is_nan() || x < 0.0 {
        return f64::NAN;
    }
    let n = x.round() as u64;
    let mut out = 1.0;
    for k in 2..=n {
        out *= k as f64;
    }
    out
}

/// Clamp `x` into `[lo, hi]`.
pub fn bound(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn pow_zero_is_identity() {
        let m = DMat::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(pow_int(&m, 0.0, "power").unwrap(), DMat::identity(2, 2));
    }

    #[test]
    fn pow_two_is_a_square() {
        let m = DMat::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let sq = pow_int(&m, 2.0, "power").unwrap();
        assert_eq!(sq, DMat::from_row_slice(2, 2, &[7.0, 10.0, 15.0, 22.0]));
    }

    #[test]
    fn pow_rejects_negative_exponents() {
        let m = DMat::identity(2, 2);
        assert!(pow_int(&m, -1.0, "power").is_err());
    }

    #[test]
    fn euler_zero_angles_is_identity() {
        let t = euler_transform(0.0, 0.0, 0.0);
        for i in 0..3 {
            for j in 0..3 {
                assert_approx_eq!(t[(i, j)], if i == j { 1.0 } else { 0.0 }, 1e-15);
            }
        }
    }

    #[test]
    fn skew_times_vector_is_cross_product() {
        let a = DMat::from_column_slice(3, 1, &[1.0, 2.0, 3.0]);
        let b = DMat::from_column_slice(3, 1, &[4.0, 5.0, 6.0]);
        let via_skew = skew(&a, "cross").unwrap() * &b;
        let direct = cross3(&a, &b, "vectorproduct").unwrap();
        assert_eq!(via_skew, direct);
    }

    #[test]
    fn diagonal_with_offset() {
        let m = DMat::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(diagonal_from(&m, 0, 0, "selector_diag").unwrap(), vec![1.0, 5.0, 9.0]);
        assert_eq!(diagonal_from(&m, 1, 0, "selector_diag").unwrap(), vec![4.0, 8.0]);
        assert_eq!(diagonal_from(&m, 0, 1, "selector_diag").unwrap(), vec![2.0, 6.0]);
    }

    #[test]
    fn fact_small_values() {
        assert_eq!(fact(0.0), 1.0);
        assert_eq!(fact(5.0), 120.0);
        assert!(fact(-1.0).is_nan());
    }
}
