//! General operator bodies: the path taken when a tree may produce matrix
//! values. Each body branches on the scalar/matrix tag of its operands.

use std::f64::consts::PI;

use daveml_common::matrix;
use daveml_common::{DMat, MathError, Value, ValueCell};

use crate::ast::{Context, ExprNode, RetType};
use crate::error::EvalError;
use crate::ops::scalar::{EULERGAMMA, EXPONENTIALE};

const DEG_TO_RAD: f64 = PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / PI;

#[inline]
fn solve(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    node.eval(ctx)
}

#[inline]
fn cell(node: &ExprNode, ctx: &dyn Context, child: usize) -> Result<ValueCell, EvalError> {
    solve(&node.children[child], ctx)
}

fn scalar_arg(
    node: &ExprNode,
    ctx: &dyn Context,
    child: usize,
    op: &'static str,
) -> Result<f64, EvalError> {
    Ok(cell(node, ctx, child)?.value.scalar_for(op)?)
}

fn truthy(child: &ExprNode, c: &ValueCell, op: &'static str) -> Result<bool, EvalError> {
    if child.ret == RetType::Bool {
        return Ok(c.test);
    }
    Ok(c.value.scalar_for(op)? != 0.0)
}

/* ───────────── numbers and identifiers ───────────── */

pub fn cn(node: &ExprNode, _ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    Ok(ValueCell::scalar(node.literal))
}

pub fn ci(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let Some(index) = node.var_index else {
        return Err(EvalError::UnboundIdentifier);
    };
    ctx.cell(index)
}

pub fn apply(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    cell(node, ctx, 0)
}

pub fn csymbol(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    cell(node, ctx, 0)
}

/* ───────────── piecewise ───────────── */

pub fn piecewise(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    for child in &node.children {
        let c = solve(child, ctx)?;
        if c.test {
            return Ok(c);
        }
    }
    Ok(ValueCell::scalar(f64::NAN))
}

pub fn piece(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    if cell(node, ctx, 1)?.test {
        Ok(cell(node, ctx, 0)?.with_test(true))
    } else {
        Ok(ValueCell::scalar(f64::NAN))
    }
}

pub fn otherwise(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    Ok(cell(node, ctx, 0)?.with_test(true))
}

/* ───────────── relational ───────────── */

/// Matrix equality is elementwise over equal shapes; comparing a matrix with
/// a scalar is unequal. Ordering is undefined for matrices and yields false.
pub fn eq(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    let test = match (&a.value, &b.value) {
        (Value::Scalar(x), Value::Scalar(y)) => x == y,
        (Value::Matrix(x), Value::Matrix(y)) => x == y,
        _ => false,
    };
    Ok(ValueCell::bool(test))
}

pub fn neq(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    let test = match (&a.value, &b.value) {
        (Value::Scalar(x), Value::Scalar(y)) => x != y,
        (Value::Matrix(x), Value::Matrix(y)) => x != y,
        _ => true,
    };
    Ok(ValueCell::bool(test))
}

macro_rules! ordering {
    ($name:ident, $op:tt) => {
        pub fn $name(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
            let a = cell(node, ctx, 0)?;
            let b = cell(node, ctx, 1)?;
            let test = match (&a.value, &b.value) {
                (Value::Scalar(x), Value::Scalar(y)) => x $op y,
                _ => false,
            };
            Ok(ValueCell::bool(test))
        }
    };
}

ordering!(gt, >);
ordering!(geq, >=);
ordering!(lt, <);
ordering!(leq, <=);

/* ───────────── logical ───────────── */

pub fn and(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    for child in &node.children {
        let c = solve(child, ctx)?;
        if !truthy(child, &c, "and")? {
            return Ok(ValueCell::bool(false));
        }
    }
    Ok(ValueCell::bool(true))
}

pub fn or(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    for child in &node.children {
        let c = solve(child, ctx)?;
        if truthy(child, &c, "or")? {
            return Ok(ValueCell::bool(true));
        }
    }
    Ok(ValueCell::bool(false))
}

pub fn xor(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let mut n_true = 0usize;
    for child in &node.children {
        let c = solve(child, ctx)?;
        if truthy(child, &c, "xor")? {
            n_true += 1;
        }
    }
    Ok(ValueCell::bool(n_true == 1))
}

pub fn not(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let child = &node.children[0];
    let c = solve(child, ctx)?;
    Ok(ValueCell::bool(!truthy(child, &c, "not")?))
}

/* ───────────── arithmetic ───────────── */

fn fold(
    node: &ExprNode,
    ctx: &dyn Context,
    op: &'static str,
    f: fn(&Value, &Value, &'static str) -> Result<Value, MathError>,
) -> Result<ValueCell, EvalError> {
    let mut acc = cell(node, ctx, 0)?.value;
    for child in &node.children[1..] {
        let rhs = solve(child, ctx)?.value;
        acc = f(&acc, &rhs, op)?;
    }
    Ok(acc.into())
}

pub fn plus(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    fold(node, ctx, "plus", Value::add)
}

pub fn minus(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    if node.children.len() == 1 {
        return Ok(cell(node, ctx, 0)?.value.neg().into());
    }
    fold(node, ctx, "minus", Value::sub)
}

pub fn times(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    fold(node, ctx, "times", Value::mul)
}

pub fn divide(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    Ok(a.value.div(&b.value, "divide")?.into())
}

/// Scalar powers are `powf`; a matrix base takes a non-negative integer
/// exponent, and a matrix exponent is rejected.
pub fn power(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    match (&a.value, &b.value) {
        (Value::Scalar(x), Value::Scalar(y)) => Ok(ValueCell::scalar(x.powf(*y))),
        (Value::Matrix(m), Value::Scalar(n)) => {
            Ok(ValueCell::matrix(matrix::pow_int(m, *n, "power")?))
        }
        (_, Value::Matrix(_)) => Err(MathError::MixedOperands { op: "power" }.into()),
    }
}

pub fn quotient(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = scalar_arg(node, ctx, 0, "quotient")?;
    let b = scalar_arg(node, ctx, 1, "quotient")?;
    Ok(ValueCell::scalar((a / b).trunc()))
}

pub fn rem(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = scalar_arg(node, ctx, 0, "rem")?;
    let b = scalar_arg(node, ctx, 1, "rem")?;
    Ok(ValueCell::scalar((a / b).fract()))
}

pub fn factorial(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    Ok(ValueCell::scalar(matrix::fact(scalar_arg(
        node,
        ctx,
        0,
        "factorial",
    )?)))
}

pub fn max(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let mut result = scalar_arg(node, ctx, 0, "max")?;
    for i in 1..node.children.len() {
        result = result.max(scalar_arg(node, ctx, i, "max")?);
    }
    Ok(ValueCell::scalar(result))
}

pub fn min(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let mut result = scalar_arg(node, ctx, 0, "min")?;
    for i in 1..node.children.len() {
        result = result.min(scalar_arg(node, ctx, i, "min")?);
    }
    Ok(ValueCell::scalar(result))
}

pub fn root(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    if node.children.len() == 1 {
        return Ok(ValueCell::scalar(scalar_arg(node, ctx, 0, "root")?.sqrt()));
    }
    let degree = scalar_arg(node, ctx, 0, "root")?;
    let x = scalar_arg(node, ctx, 1, "root")?;
    Ok(ValueCell::scalar(x.powf(1.0 / degree)))
}

pub fn degree(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    Ok(ValueCell::scalar(scalar_arg(node, ctx, 0, "degree")?))
}

macro_rules! elementwise {
    ($name:ident, $f:expr) => {
        pub fn $name(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
            let f: fn(f64) -> f64 = $f;
            Ok(cell(node, ctx, 0)?.value.map(f).into())
        }
    };
}

elementwise!(abs, f64::abs);
elementwise!(floor, f64::floor);
elementwise!(ceiling, f64::ceil);

pub fn fmod(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = scalar_arg(node, ctx, 0, "fmod")?;
    let b = scalar_arg(node, ctx, 1, "fmod")?;
    Ok(ValueCell::scalar(a % b))
}

pub fn sign(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let a = scalar_arg(node, ctx, 0, "sign")?;
    let b = scalar_arg(node, ctx, 1, "sign")?;
    Ok(ValueCell::scalar(a.copysign(b)))
}

pub fn bound(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let x = scalar_arg(node, ctx, 0, "bound")?;
    let lo = scalar_arg(node, ctx, 1, "bound")?;
    let hi = scalar_arg(node, ctx, 2, "bound")?;
    Ok(ValueCell::scalar(matrix::bound(x, lo, hi)))
}

pub fn nearbyint(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    Ok(ValueCell::scalar(
        scalar_arg(node, ctx, 0, "nearbyint")?.round_ties_even(),
    ))
}

/* ───────────── trigonometric (elementwise over matrices) ───────────── */

elementwise!(sin, f64::sin);
elementwise!(cos, f64::cos);
elementwise!(tan, f64::tan);
elementwise!(sec, |x| 1.0 / x.cos());
elementwise!(csc, |x| 1.0 / x.sin());
elementwise!(cot, |x| 1.0 / x.tan());
elementwise!(sind, |x| (x * DEG_TO_RAD).sin());
elementwise!(cosd, |x| (x * DEG_TO_RAD).cos());
elementwise!(tand, |x| (x * DEG_TO_RAD).tan());
elementwise!(secd, |x| 1.0 / (x * DEG_TO_RAD).cos());
elementwise!(cscd, |x| 1.0 / (x * DEG_TO_RAD).sin());
elementwise!(cotd, |x| 1.0 / (x * DEG_TO_RAD).tan());
elementwise!(arcsin, f64::asin);
elementwise!(arccos, f64::acos);
elementwise!(arctan, f64::atan);
elementwise!(arcsec, |x| (1.0 / x).acos());
elementwise!(arccsc, |x| (1.0 / x).asin());
elementwise!(arccot, |x| (1.0 / x).atan());
elementwise!(arcsind, |x| x.asin() * RAD_TO_DEG);
elementwise!(arccosd, |x| x.acos() * RAD_TO_DEG);
elementwise!(arctand, |x| x.atan() * RAD_TO_DEG);
elementwise!(arcsecd, |x| (1.0 / x).acos() * RAD_TO_DEG);
elementwise!(arccscd, |x| (1.0 / x).asin() * RAD_TO_DEG);
elementwise!(arccotd, |x| (1.0 / x).atan() * RAD_TO_DEG);

fn atan2_impl(
    node: &ExprNode,
    ctx: &dyn Context,
    scale: f64,
) -> Result<ValueCell, EvalError> {
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    match (&a.value, &b.value) {
        (Value::Scalar(y), Value::Scalar(x)) => Ok(ValueCell::scalar(y.atan2(*x) * scale)),
        (Value::Matrix(y), Value::Matrix(x)) => {
            if y.shape() != x.shape() {
                return Err(MathError::ShapeMismatch {
                    op: "atan2",
                    lhs_rows: y.nrows(),
                    lhs_cols: y.ncols(),
                    rhs_rows: x.nrows(),
                    rhs_cols: x.ncols(),
                }
                .into());
            }
            Ok(ValueCell::matrix(y.zip_map(x, |a, b| a.atan2(b) * scale)))
        }
        _ => Err(MathError::MixedOperands { op: "atan2" }.into()),
    }
}

pub fn atan2(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    atan2_impl(node, ctx, 1.0)
}

pub fn atan2d(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    atan2_impl(node, ctx, RAD_TO_DEG)
}

/* ───────────── exponential, logarithmic ───────────── */

elementwise!(exp, f64::exp);
elementwise!(ln, f64::ln);

pub fn log(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    if node.children.len() == 1 {
        return Ok(cell(node, ctx, 0)?.value.map(f64::log10).into());
    }
    let base = scalar_arg(node, ctx, 0, "log")?;
    let x = cell(node, ctx, 1)?;
    Ok(x.value.map(|v| v.ln() / base.ln()).into())
}

pub fn logbase(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    Ok(ValueCell::scalar(scalar_arg(node, ctx, 0, "logbase")?))
}

/* ───────────── constants ───────────── */

macro_rules! constant {
    ($name:ident, $v:expr) => {
        pub fn $name(_node: &ExprNode, _ctx: &dyn Context) -> Result<ValueCell, EvalError> {
            Ok(ValueCell::scalar($v))
        }
    };
}

constant!(exponentiale, EXPONENTIALE);
constant!(notanumber, f64::NAN);
constant!(pi, PI);
constant!(eulergamma, EULERGAMMA);
constant!(infinity, f64::INFINITY);
constant!(noop, 0.0);

/* ───────────── linear algebra ───────────── */

fn matrix_arg<'a>(
    c: &'a ValueCell,
    op: &'static str,
) -> Result<&'a DMat, EvalError> {
    Ok(c.value.matrix_for(op)?)
}

fn square_arg<'a>(c: &'a ValueCell, op: &'static str) -> Result<&'a DMat, EvalError> {
    let m = matrix_arg(c, op)?;
    if m.nrows() != m.ncols() {
        return Err(MathError::ShapeMismatch {
            op,
            lhs_rows: m.nrows(),
            lhs_cols: m.ncols(),
            rhs_rows: m.ncols(),
            rhs_cols: m.nrows(),
        }
        .into());
    }
    Ok(m)
}

pub fn determinant(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let c = cell(node, ctx, 0)?;
    let m = square_arg(&c, "determinant")?;
    Ok(ValueCell::scalar(m.determinant()))
}

pub fn transpose(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let c = cell(node, ctx, 0)?;
    let m = matrix_arg(&c, "transpose")?;
    Ok(ValueCell::matrix(m.transpose()))
}

pub fn inverse(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    let c = cell(node, ctx, 0)?;
    let m = square_arg(&c, "inverse")?;
    match m.clone().try_inverse() {
        Some(inv) => Ok(ValueCell::matrix(inv)),
        None => Err(MathError::Singular { op: "inverse" }.into()),
    }
}

/// 1-based element selection: `(matrix, i, j)` or `(vector, i)`.
pub fn selector_element(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "selector_element";
    let first = cell(node, ctx, 0)?;
    let m = matrix_arg(&first, OP)?;

    let index_arg = |i: usize| -> Result<usize, EvalError> {
        let v = scalar_arg(node, ctx, i, OP)?;
        if v < 1.0 {
            return Err(MathError::IndexOutOfRange {
                op: OP,
                index: v as usize,
                rows: m.nrows(),
                cols: m.ncols(),
            }
            .into());
        }
        Ok(v as usize - 1)
    };

    if node.children.len() == 3 {
        let i = index_arg(1)?;
        let j = index_arg(2)?;
        if i >= m.nrows() || j >= m.ncols() {
            return Err(MathError::IndexOutOfRange {
                op: OP,
                index: (i + 1).max(j + 1),
                rows: m.nrows(),
                cols: m.ncols(),
            }
            .into());
        }
        Ok(ValueCell::scalar(m[(i, j)]))
    } else {
        if m.nrows() != 1 && m.ncols() != 1 {
            return Err(MathError::NotAVector { op: OP }.into());
        }
        let i = index_arg(1)?;
        if i >= m.len() {
            return Err(MathError::IndexOutOfRange {
                op: OP,
                index: i + 1,
                rows: m.nrows(),
                cols: m.ncols(),
            }
            .into());
        }
        Ok(ValueCell::scalar(m[i]))
    }
}

/// Variadic `(matrix, row)` pairs assembled into a new matrix, one row each.
pub fn selector_row(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "selector_row";
    let n_rows = node.children.len() / 2;
    let mut out: Option<DMat> = None;

    for i in 0..n_rows {
        let source = cell(node, ctx, 2 * i)?;
        let m = matrix_arg(&source, OP)?;
        let row = scalar_arg(node, ctx, 2 * i + 1, OP)? as usize;
        if row < 1 || row > m.nrows() {
            return Err(MathError::IndexOutOfRange {
                op: OP,
                index: row,
                rows: m.nrows(),
                cols: m.ncols(),
            }
            .into());
        }
        let out = out.get_or_insert_with(|| DMat::zeros(n_rows, m.ncols()));
        if m.ncols() != out.ncols() {
            return Err(MathError::ShapeMismatch {
                op: OP,
                lhs_rows: out.nrows(),
                lhs_cols: out.ncols(),
                rhs_rows: m.nrows(),
                rhs_cols: m.ncols(),
            }
            .into());
        }
        out.set_row(i, &m.row(row - 1));
    }

    match out {
        Some(m) => Ok(ValueCell::matrix(m)),
        None => Err(EvalError::Invalid {
            op: OP,
            detail: "no argument pairs".into(),
        }),
    }
}

/// Variadic `(matrix, column)` pairs assembled into a new matrix.
pub fn selector_column(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "selector_column";
    let n_cols = node.children.len() / 2;
    let mut out: Option<DMat> = None;

    for i in 0..n_cols {
        let source = cell(node, ctx, 2 * i)?;
        let m = matrix_arg(&source, OP)?;
        let col = scalar_arg(node, ctx, 2 * i + 1, OP)? as usize;
        if col < 1 || col > m.ncols() {
            return Err(MathError::IndexOutOfRange {
                op: OP,
                index: col,
                rows: m.nrows(),
                cols: m.ncols(),
            }
            .into());
        }
        let out = out.get_or_insert_with(|| DMat::zeros(m.nrows(), n_cols));
        if m.nrows() != out.nrows() {
            return Err(MathError::ShapeMismatch {
                op: OP,
                lhs_rows: out.nrows(),
                lhs_cols: out.ncols(),
                rhs_rows: m.nrows(),
                rhs_cols: m.ncols(),
            }
            .into());
        }
        out.set_column(i, &m.column(col - 1));
    }

    match out {
        Some(m) => Ok(ValueCell::matrix(m)),
        None => Err(EvalError::Invalid {
            op: OP,
            detail: "no argument pairs".into(),
        }),
    }
}

/// Variadic `(matrix, subdiag-row, subdiag-col)` triples; each extracted
/// diagonal becomes one column of the result.
pub fn selector_diag(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "selector_diag";
    let n_cols = node.children.len() / 3;
    let mut out: Option<DMat> = None;

    for i in 0..n_cols {
        let source = cell(node, ctx, 3 * i)?;
        let m = matrix_arg(&source, OP)?;
        let row0 = scalar_arg(node, ctx, 3 * i + 1, OP)? as usize;
        let col0 = scalar_arg(node, ctx, 3 * i + 2, OP)? as usize;
        if row0 < 1 || col0 < 1 {
            return Err(MathError::IndexOutOfRange {
                op: OP,
                index: row0.min(col0),
                rows: m.nrows(),
                cols: m.ncols(),
            }
            .into());
        }
        let diag = matrix::diagonal_from(m, row0 - 1, col0 - 1, OP)?;
        let out = out.get_or_insert_with(|| DMat::zeros(diag.len(), n_cols));
        if diag.len() != out.nrows() {
            return Err(MathError::ShapeMismatch {
                op: OP,
                lhs_rows: out.nrows(),
                lhs_cols: out.ncols(),
                rhs_rows: diag.len(),
                rhs_cols: 1,
            }
            .into());
        }
        for (r, v) in diag.iter().enumerate() {
            out[(r, i)] = *v;
        }
    }

    match out {
        Some(m) => Ok(ValueCell::matrix(m)),
        None => Err(EvalError::Invalid {
            op: OP,
            detail: "no argument triples".into(),
        }),
    }
}

/// `(matrix, row0, col0, nrows, ncols)` rectangular slice, 1-based anchor.
pub fn selector_mslice(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "selector_mslice";
    let first = cell(node, ctx, 0)?;
    let m = matrix_arg(&first, OP)?;
    let row0 = scalar_arg(node, ctx, 1, OP)? as usize;
    let col0 = scalar_arg(node, ctx, 2, OP)? as usize;
    let nrows = scalar_arg(node, ctx, 3, OP)? as usize;
    let ncols = scalar_arg(node, ctx, 4, OP)? as usize;
    if row0 < 1 || col0 < 1 {
        return Err(MathError::IndexOutOfRange {
            op: OP,
            index: row0.min(col0),
            rows: m.nrows(),
            cols: m.ncols(),
        }
        .into());
    }
    Ok(ValueCell::matrix(matrix::slice(
        m,
        row0 - 1,
        col0 - 1,
        nrows,
        ncols,
        OP,
    )?))
}

pub fn vectorproduct(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "vectorproduct";
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    Ok(ValueCell::matrix(matrix::cross3(
        matrix_arg(&a, OP)?,
        matrix_arg(&b, OP)?,
        OP,
    )?))
}

pub fn scalarproduct(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "scalarproduct";
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    let u = matrix_arg(&a, OP)?;
    let v = matrix_arg(&b, OP)?;
    if u.len() != v.len() {
        return Err(MathError::ShapeMismatch {
            op: OP,
            lhs_rows: u.nrows(),
            lhs_cols: u.ncols(),
            rhs_rows: v.nrows(),
            rhs_cols: v.ncols(),
        }
        .into());
    }
    let dot = u.iter().zip(v.iter()).map(|(x, y)| x * y).sum();
    Ok(ValueCell::scalar(dot))
}

pub fn outerproduct(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "outerproduct";
    let a = cell(node, ctx, 0)?;
    let b = cell(node, ctx, 1)?;
    let u = matrix_arg(&a, OP)?;
    let v = matrix_arg(&b, OP)?;
    let vt = v.transpose();
    if u.ncols() != vt.nrows() {
        return Err(MathError::ShapeMismatch {
            op: OP,
            lhs_rows: u.nrows(),
            lhs_cols: u.ncols(),
            rhs_rows: v.nrows(),
            rhs_cols: v.ncols(),
        }
        .into());
    }
    Ok(ValueCell::matrix(u * vt))
}

pub fn unitmatrix(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "unitmatrix";
    let n = scalar_arg(node, ctx, 0, OP)?;
    if n < 1.0 || n.fract() != 0.0 {
        return Err(EvalError::Invalid {
            op: OP,
            detail: format!("size must be a positive integer, got {n}"),
        });
    }
    Ok(ValueCell::matrix(DMat::identity(n as usize, n as usize)))
}

fn eulertransform_impl(
    node: &ExprNode,
    ctx: &dyn Context,
    scale: f64,
    op: &'static str,
) -> Result<ValueCell, EvalError> {
    let psi = scalar_arg(node, ctx, 0, op)? * scale;
    let theta = scalar_arg(node, ctx, 1, op)? * scale;
    let phi = scalar_arg(node, ctx, 2, op)? * scale;
    Ok(ValueCell::matrix(matrix::euler_transform(psi, theta, phi)))
}

pub fn eulertransform(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    eulertransform_impl(node, ctx, 1.0, "eulertransform")
}

pub fn eulertransformd(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    eulertransform_impl(node, ctx, DEG_TO_RAD, "eulertransformd")
}

pub fn cross(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
    const OP: &str = "cross";
    let a = cell(node, ctx, 0)?;
    Ok(ValueCell::matrix(matrix::skew(matrix_arg(&a, OP)?, OP)?))
}

macro_rules! mask {
    ($name:ident, $op:literal, $f:expr) => {
        /// Elementwise masked arithmetic over two same-shape matrices.
        pub fn $name(node: &ExprNode, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
            let a = cell(node, ctx, 0)?;
            let b = cell(node, ctx, 1)?;
            let u = matrix_arg(&a, $op)?;
            let v = matrix_arg(&b, $op)?;
            if u.shape() != v.shape() {
                return Err(MathError::ShapeMismatch {
                    op: $op,
                    lhs_rows: u.nrows(),
                    lhs_cols: u.ncols(),
                    rhs_rows: v.nrows(),
                    rhs_cols: v.ncols(),
                }
                .into());
            }
            let f: fn(f64, f64) -> f64 = $f;
            Ok(ValueCell::matrix(u.zip_map(v, f)))
        }
    };
}

mask!(mask_plus, "mask_plus", |a, b| a + b);
mask!(mask_minus, "mask_minus", |a, b| a - b);
mask!(mask_times, "mask_times", |a, b| a * b);
mask!(mask_divide, "mask_divide", |a, b| a / b);
