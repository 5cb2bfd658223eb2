//! Scalar-only operator bodies: the fast path taken when a whole expression
//! tree is provably free of matrix values.

use std::f64::consts::PI;

use daveml_common::matrix;

use crate::ast::{Context, ExprNode, Outcome, RetType};
use crate::error::EvalError;

pub const EXPONENTIALE: f64 = 2.71828182845905;
pub const EULERGAMMA: f64 = 0.57721566490153286;

const DEG_TO_RAD: f64 = PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / PI;

#[inline]
fn solve(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    node.eval_scalar(ctx)
}

#[inline]
fn value(node: &ExprNode, ctx: &dyn Context, child: usize) -> Result<f64, EvalError> {
    Ok(solve(&node.children[child], ctx)?.value)
}

fn truthy(child: &ExprNode, outcome: Outcome) -> bool {
    if child.ret == RetType::Bool {
        outcome.test
    } else {
        outcome.value != 0.0
    }
}

/* ───────────── numbers and identifiers ───────────── */

pub fn cn(node: &ExprNode, _ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(node.literal))
}

pub fn ci(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let Some(index) = node.var_index else {
        return Err(EvalError::UnboundIdentifier);
    };
    Ok(Outcome::real(ctx.scalar(index)?))
}

pub fn apply(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    solve(&node.children[0], ctx)
}

pub fn csymbol(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    solve(&node.children[0], ctx)
}

/* ───────────── piecewise ───────────── */

pub fn piecewise(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    for child in &node.children {
        let outcome = solve(child, ctx)?;
        if outcome.test {
            return Ok(outcome);
        }
    }
    Ok(Outcome::real(f64::NAN))
}

pub fn piece(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let predicate = solve(&node.children[1], ctx)?;
    if predicate.test {
        let value = solve(&node.children[0], ctx)?;
        Ok(Outcome {
            value: value.value,
            test: true,
        })
    } else {
        Ok(Outcome {
            value: f64::NAN,
            test: false,
        })
    }
}

pub fn otherwise(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let value = solve(&node.children[0], ctx)?;
    Ok(Outcome {
        value: value.value,
        test: true,
    })
}

/* ───────────── relational ───────────── */

macro_rules! relational {
    ($name:ident, $op:tt) => {
        pub fn $name(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
            let a = value(node, ctx, 0)?;
            let b = value(node, ctx, 1)?;
            Ok(Outcome::bool(a $op b))
        }
    };
}

relational!(eq, ==);
relational!(neq, !=);
relational!(gt, >);
relational!(geq, >=);
relational!(lt, <);
relational!(leq, <=);

/* ───────────── logical ───────────── */

pub fn and(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    for child in &node.children {
        let outcome = solve(child, ctx)?;
        if !truthy(child, outcome) {
            return Ok(Outcome::bool(false));
        }
    }
    Ok(Outcome::bool(true))
}

pub fn or(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    for child in &node.children {
        let outcome = solve(child, ctx)?;
        if truthy(child, outcome) {
            return Ok(Outcome::bool(true));
        }
    }
    Ok(Outcome::bool(false))
}

/// True iff exactly one operand is truthy; deliberately not associative XOR.
pub fn xor(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let mut n_true = 0usize;
    for child in &node.children {
        let outcome = solve(child, ctx)?;
        if truthy(child, outcome) {
            n_true += 1;
        }
    }
    Ok(Outcome::bool(n_true == 1))
}

pub fn not(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let child = &node.children[0];
    let outcome = solve(child, ctx)?;
    Ok(Outcome::bool(!truthy(child, outcome)))
}

/* ───────────── arithmetic ───────────── */

pub fn plus(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let mut result = value(node, ctx, 0)?;
    for child in &node.children[1..] {
        result += solve(child, ctx)?.value;
    }
    Ok(Outcome::real(result))
}

pub fn minus(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let mut result = value(node, ctx, 0)?;
    if node.children.len() == 1 {
        return Ok(Outcome::real(-result));
    }
    for child in &node.children[1..] {
        result -= solve(child, ctx)?.value;
    }
    Ok(Outcome::real(result))
}

pub fn times(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let mut result = value(node, ctx, 0)?;
    for child in &node.children[1..] {
        result *= solve(child, ctx)?.value;
    }
    Ok(Outcome::real(result))
}

pub fn divide(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)? / value(node, ctx, 1)?))
}

pub fn power(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?.powf(value(node, ctx, 1)?)))
}

/// Integer quotient of the division of the two arguments.
pub fn quotient(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real((value(node, ctx, 0)? / value(node, ctx, 1)?).trunc()))
}

/// Fractional remainder of the division of the two arguments.
pub fn rem(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real((value(node, ctx, 0)? / value(node, ctx, 1)?).fract()))
}

pub fn factorial(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(matrix::fact(value(node, ctx, 0)?)))
}

pub fn max(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let mut result = value(node, ctx, 0)?;
    for child in &node.children[1..] {
        result = result.max(solve(child, ctx)?.value);
    }
    Ok(Outcome::real(result))
}

pub fn min(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    let mut result = value(node, ctx, 0)?;
    for child in &node.children[1..] {
        result = result.min(solve(child, ctx)?.value);
    }
    Ok(Outcome::real(result))
}

/// `root(x)` is the square root; `root(degree, x)` the degree-th root.
pub fn root(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    if node.children.len() == 1 {
        return Ok(Outcome::real(value(node, ctx, 0)?.sqrt()));
    }
    let degree = value(node, ctx, 0)?;
    let x = value(node, ctx, 1)?;
    Ok(Outcome::real(x.powf(1.0 / degree)))
}

pub fn degree(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?))
}

pub fn abs(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?.abs()))
}

pub fn floor(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?.floor()))
}

pub fn ceiling(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?.ceil()))
}

pub fn fmod(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)? % value(node, ctx, 1)?))
}

/// Two-argument copysign: magnitude of the first, sign of the second.
pub fn sign(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?.copysign(value(node, ctx, 1)?)))
}

pub fn bound(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(matrix::bound(
        value(node, ctx, 0)?,
        value(node, ctx, 1)?,
        value(node, ctx, 2)?,
    )))
}

pub fn nearbyint(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?.round_ties_even()))
}

/* ───────────── trigonometric ───────────── */

macro_rules! unary {
    ($name:ident, $f:expr) => {
        pub fn $name(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
            let f: fn(f64) -> f64 = $f;
            Ok(Outcome::real(f(value(node, ctx, 0)?)))
        }
    };
}

unary!(sin, f64::sin);
unary!(cos, f64::cos);
unary!(tan, f64::tan);
unary!(sec, |x| 1.0 / x.cos());
unary!(csc, |x| 1.0 / x.sin());
unary!(cot, |x| 1.0 / x.tan());
unary!(sind, |x| (x * DEG_TO_RAD).sin());
unary!(cosd, |x| (x * DEG_TO_RAD).cos());
unary!(tand, |x| (x * DEG_TO_RAD).tan());
unary!(secd, |x| 1.0 / (x * DEG_TO_RAD).cos());
unary!(cscd, |x| 1.0 / (x * DEG_TO_RAD).sin());
unary!(cotd, |x| 1.0 / (x * DEG_TO_RAD).tan());
unary!(arcsin, f64::asin);
unary!(arccos, f64::acos);
unary!(arctan, f64::atan);
unary!(arcsec, |x| (1.0 / x).acos());
unary!(arccsc, |x| (1.0 / x).asin());
unary!(arccot, |x| (1.0 / x).atan());
unary!(arcsind, |x| x.asin() * RAD_TO_DEG);
unary!(arccosd, |x| x.acos() * RAD_TO_DEG);
unary!(arctand, |x| x.atan() * RAD_TO_DEG);
unary!(arcsecd, |x| (1.0 / x).acos() * RAD_TO_DEG);
unary!(arccscd, |x| (1.0 / x).asin() * RAD_TO_DEG);
unary!(arccotd, |x| (1.0 / x).atan() * RAD_TO_DEG);

pub fn atan2(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?.atan2(value(node, ctx, 1)?)))
}

pub fn atan2d(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(
        value(node, ctx, 0)?.atan2(value(node, ctx, 1)?) * RAD_TO_DEG,
    ))
}

/* ───────────── exponential, logarithmic ───────────── */

unary!(exp, f64::exp);
unary!(ln, f64::ln);

/// `log(x)` is base 10; `log(logbase, x)` uses the given base.
pub fn log(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    if node.children.len() == 1 {
        return Ok(Outcome::real(value(node, ctx, 0)?.log10()));
    }
    let base = value(node, ctx, 0)?;
    let x = value(node, ctx, 1)?;
    Ok(Outcome::real(x.ln() / base.ln()))
}

pub fn logbase(node: &ExprNode, ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(value(node, ctx, 0)?))
}

/* ───────────── constants ───────────── */

pub fn exponentiale(_node: &ExprNode, _ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(EXPONENTIALE))
}

pub fn notanumber(_node: &ExprNode, _ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(f64::NAN))
}

pub fn pi(_node: &ExprNode, _ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(PI))
}

pub fn eulergamma(_node: &ExprNode, _ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(EULERGAMMA))
}

pub fn infinity(_node: &ExprNode, _ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(f64::INFINITY))
}

pub fn noop(_node: &ExprNode, _ctx: &dyn Context) -> Result<Outcome, EvalError> {
    Ok(Outcome::real(0.0))
}
