//! The value cell: a scalar double or a dense matrix, plus the boolean
//! predicate flag threaded through relational and piecewise operators.

use nalgebra::DMatrix;

use crate::MathError;

pub type DMat = DMatrix<f64>;

/// A scalar or a dense matrix. A matrix of total size 1 is always collapsed
/// to scalar form on construction, so mixed-mode arithmetic never sees a
/// "single value" matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Matrix(DMat),
}

impl Value {
    pub fn from_matrix(m: DMat) -> Self {
        if m.len() == 1 {
            Value::Scalar(m[(0, 0)])
        } else {
            Value::Matrix(m)
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Value::Matrix(_))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Matrix(_) => None,
        }
    }

    /// Scalar contents, or a `MatrixOperand` error tagged with `op`.
    pub fn scalar_for(&self, op: &'static str) -> Result<f64, MathError> {
        match self {
            Value::Scalar(v) => Ok(*v),
            Value::Matrix(_) => Err(MathError::MatrixOperand { op }),
        }
    }

    /// Matrix contents, or a `ScalarOperand` error tagged with `op`.
    pub fn matrix_for(&self, op: &'static str) -> Result<&DMat, MathError> {
        match self {
            Value::Matrix(m) => Ok(m),
            Value::Scalar(_) => Err(MathError::ScalarOperand { op }),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            Value::Scalar(_) => (1, 1),
            Value::Matrix(m) => (m.nrows(), m.ncols()),
        }
    }

    /// Apply `f` to the scalar, or elementwise across the matrix.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(*v)),
            Value::Matrix(m) => Value::Matrix(m.map(f)),
        }
    }

    pub fn neg(&self) -> Value {
        self.map(|v| -v)
    }

    pub fn add(&self, rhs: &Value, op: &'static str) -> Result<Value, MathError> {
        self.elementwise(rhs, op, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Value, op: &'static str) -> Result<Value, MathError> {
        self.elementwise(rhs, op, |a, b| a - b)
    }

    /// Multiplication: scalars multiply, a scalar broadcasts across a matrix,
    /// and two matrices take the matrix product.
    pub fn mul(&self, rhs: &Value, op: &'static str) -> Result<Value, MathError> {
        match (self, rhs) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(a * b)),
            (Value::Scalar(a), Value::Matrix(b)) => Ok(Value::from_matrix(b * *a)),
            (Value::Matrix(a), Value::Scalar(b)) => Ok(Value::from_matrix(a * *b)),
            (Value::Matrix(a), Value::Matrix(b)) => {
                if a.ncols() != b.nrows() {
                    return Err(shape_mismatch(op, a, b));
                }
                Ok(Value::from_matrix(a * b))
            }
        }
    }

    /// Division: scalar and broadcast forms are elementwise; matrix/matrix is
    /// elementwise only when the shapes agree.
    pub fn div(&self, rhs: &Value, op: &'static str) -> Result<Value, MathError> {
        match (self, rhs) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(a / b)),
            (Value::Scalar(a), Value::Matrix(b)) => Ok(Value::from_matrix(b.map(|e| a / e))),
            (Value::Matrix(a), Value::Scalar(b)) => Ok(Value::from_matrix(a.map(|e| e / b))),
            (Value::Matrix(a), Value::Matrix(b)) => {
                if a.shape() != b.shape() {
                    return Err(shape_mismatch(op, a, b));
                }
                Ok(Value::from_matrix(a.component_div(b)))
            }
        }
    }

    fn elementwise(
        &self,
        rhs: &Value,
        op: &'static str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, MathError> {
        match (self, rhs) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
            (Value::Scalar(a), Value::Matrix(b)) => Ok(Value::from_matrix(b.map(|e| f(*a, e)))),
            (Value::Matrix(a), Value::Scalar(b)) => Ok(Value::from_matrix(a.map(|e| f(e, *b)))),
            (Value::Matrix(a), Value::Matrix(b)) => {
                if a.shape() != b.shape() {
                    return Err(shape_mismatch(op, a, b));
                }
                Ok(Value::from_matrix(a.zip_map(b, f)))
            }
        }
    }
}

fn shape_mismatch(op: &'static str, a: &DMat, b: &DMat) -> MathError {
    MathError::ShapeMismatch {
        op,
        lhs_rows: a.nrows(),
        lhs_cols: a.ncols(),
        rhs_rows: b.nrows(),
        rhs_cols: b.ncols(),
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

/// The result cell produced by every operator node: a value plus the `test`
/// flag used by relational, logical and `piece`/`otherwise` nodes to thread a
/// boolean through an expression whose nominal type is numeric.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCell {
    pub value: Value,
    pub test: bool,
}

impl ValueCell {
    pub fn scalar(v: f64) -> Self {
        ValueCell {
            value: Value::Scalar(v),
            test: false,
        }
    }

    pub fn matrix(m: DMat) -> Self {
        ValueCell {
            value: Value::from_matrix(m),
            test: false,
        }
    }

    pub fn bool(test: bool) -> Self {
        ValueCell {
            value: Value::Scalar(if test { 1.0 } else { 0.0 }),
            test,
        }
    }

    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }
}

impl From<Value> for ValueCell {
    fn from(value: Value) -> Self {
        ValueCell { value, test: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m22(data: [f64; 4]) -> DMat {
        DMat::from_row_slice(2, 2, &data)
    }

    #[test]
    fn single_element_matrix_collapses() {
        let v = Value::from_matrix(DMat::from_row_slice(1, 1, &[7.0]));
        assert_eq!(v, Value::Scalar(7.0));
    }

    #[test]
    fn scalar_broadcasts_over_matrix() {
        let m = Value::Matrix(m22([1.0, 2.0, 3.0, 4.0]));
        let r = Value::Scalar(10.0).add(&m, "plus").unwrap();
        assert_eq!(r, Value::Matrix(m22([11.0, 12.0, 13.0, 14.0])));
    }

    #[test]
    fn matrix_times_matrix_is_a_product() {
        let a = Value::Matrix(m22([1.0, 2.0, 3.0, 4.0]));
        let b = Value::Matrix(DMat::from_row_slice(2, 1, &[5.0, 6.0]));
        let r = a.mul(&b, "times").unwrap();
        assert_eq!(r, Value::Matrix(DMat::from_row_slice(2, 1, &[17.0, 39.0])));
    }

    #[test]
    fn matrix_divide_is_elementwise_when_shapes_agree() {
        let a = Value::Matrix(m22([2.0, 4.0, 6.0, 8.0]));
        let b = Value::Matrix(m22([2.0, 2.0, 3.0, 4.0]));
        let r = a.div(&b, "divide").unwrap();
        assert_eq!(r, Value::Matrix(m22([1.0, 2.0, 2.0, 2.0])));
    }

    #[test]
    fn matrix_divide_shape_mismatch_is_an_error() {
        let a = Value::Matrix(m22([2.0, 4.0, 6.0, 8.0]));
        let b = Value::Matrix(DMat::from_row_slice(2, 1, &[2.0, 2.0]));
        assert!(a.div(&b, "divide").is_err());
    }

    #[test]
    fn inner_dimension_mismatch_is_an_error() {
        let a = Value::Matrix(m22([1.0, 2.0, 3.0, 4.0]));
        let b = Value::Matrix(DMat::from_row_slice(1, 2, &[5.0, 6.0]));
        assert!(a.mul(&b, "times").is_err());
    }
}
