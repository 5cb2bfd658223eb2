//! The expression tree built from content MathML.
//!
//! Each node caches a reference into the static operator table, so evaluation
//! is a direct-threaded walk: no per-node name lookups. Nodes are immutable
//! after parsing; evaluation returns fresh result cells and memoisation
//! happens at the variable layer where it is observable.

use daveml_common::ValueCell;

use crate::error::EvalError;
use crate::ops::Operator;

/// Type of the argument returned from a node, after the W3C MathML
/// recommendation. Only Real and Boolean are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetType {
    Real,
    Bool,
}

/// Result of the scalar fast path: a double plus the threaded predicate flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub value: f64,
    pub test: bool,
}

impl Outcome {
    pub fn real(value: f64) -> Self {
        Outcome { value, test: false }
    }

    pub fn bool(test: bool) -> Self {
        Outcome {
            value: if test { 1.0 } else { 0.0 },
            test,
        }
    }
}

/// Variable access used during evaluation. Implemented by the model; the
/// expression layer never touches variables directly, only through indices.
pub trait Context {
    /// Current scalar value of the variable at `index`, solving on demand.
    fn scalar(&self, index: usize) -> Result<f64, EvalError>;

    /// Current value cell (scalar or matrix) of the variable at `index`.
    fn cell(&self, index: usize) -> Result<ValueCell, EvalError>;
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    pub op: &'static Operator,
    pub ret: RetType,
    pub children: Vec<ExprNode>,
    /// Literal payload of a `cn` leaf.
    pub literal: f64,
    /// Bound variable index of a `ci` leaf.
    pub var_index: Option<usize>,
    /// Content-symbol annotation (`cd` value, selector `other`, mask `type`).
    pub attribute: Option<String>,
}

impl ExprNode {
    pub fn new(op: &'static Operator) -> Self {
        ExprNode {
            op,
            ret: op.ret,
            children: Vec::new(),
            literal: 0.0,
            var_index: None,
            attribute: None,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.op.tag
    }

    /// Scalar fast path; only valid when the whole subtree is scalar-only.
    pub fn eval_scalar(&self, ctx: &dyn Context) -> Result<Outcome, EvalError> {
        match self.op.scalar {
            Some(f) => f(self, ctx),
            None => Err(EvalError::ScalarPathUnsupported { op: self.op.tag }),
        }
    }

    /// General path: handles scalar and matrix values alike.
    pub fn eval(&self, ctx: &dyn Context) -> Result<ValueCell, EvalError> {
        (self.op.general)(self, ctx)
    }

    /// Direct-dependency variable indices of this subtree, first-use order.
    pub fn collect_var_indices(&self, out: &mut Vec<usize>) {
        if let Some(index) = self.var_index {
            if !out.contains(&index) {
                out.push(index);
            }
        }
        for child in &self.children {
            child.collect_var_indices(out);
        }
    }

    /// Whether any node in the subtree is a matrix-only operator.
    pub fn has_matrix_operator(&self) -> bool {
        if self.op.scalar.is_none() {
            return true;
        }
        self.children.iter().any(ExprNode::has_matrix_operator)
    }
}

// Structural equality: operators compare by tag, literals bitwise via
// `total_cmp` semantics are unnecessary here since parsed literals are never
// NaN.
impl PartialEq for ExprNode {
    fn eq(&self, other: &Self) -> bool {
        self.op.tag == other.op.tag
            && self.ret == other.ret
            && self.literal == other.literal
            && self.var_index == other.var_index
            && self.attribute == other.attribute
            && self.children == other.children
    }
}
