//! Error kinds raised by mixed scalar/matrix arithmetic.
//!
//! These are the value-layer failures; the evaluation and load layers wrap
//! them with variable and operator context before they reach a caller.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MathError {
    /// A scalar-only operation received a matrix argument.
    #[error("{op}: operation not permitted on a matrix")]
    MatrixOperand { op: &'static str },

    /// A matrix operation received a scalar argument.
    #[error("{op}: argument is not a matrix")]
    ScalarOperand { op: &'static str },

    /// Elementwise or product dimensions do not line up.
    #[error("{op}: incompatible dimensions {lhs_rows}x{lhs_cols} vs {rhs_rows}x{rhs_cols}")]
    ShapeMismatch {
        op: &'static str,
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
        rhs_cols: usize,
    },

    /// 1-based selector index fell outside the matrix.
    #[error("{op}: index {index} out of range for {rows}x{cols} matrix")]
    IndexOutOfRange {
        op: &'static str,
        index: usize,
        rows: usize,
        cols: usize,
    },

    /// Expecting a row or column vector.
    #[error("{op}: expecting a row or column vector")]
    NotAVector { op: &'static str },

    #[error("{op}: matrix is singular")]
    Singular { op: &'static str },

    /// Matrix powers are only defined for non-negative integer exponents.
    #[error("{op}: exponent must be a non-negative integer")]
    NegativePower { op: &'static str },

    /// Scalar and matrix arguments cannot be mixed for this operation.
    #[error("{op}: can't mix value with matrix arguments")]
    MixedOperands { op: &'static str },

    /// A 3-element vector was expected (cross products, skew matrices).
    #[error("{op}: argument must be a vector of size 3")]
    NotAVector3 { op: &'static str },
}
