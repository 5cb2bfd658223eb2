//! The operator dispatch tables.
//!
//! One static table carries, per operator tag: the scalar-only fast-path
//! evaluator (absent for matrix-only operators), the general evaluator, the
//! parser's child-source and arity policy, and the exporter's element style.
//! Expression nodes cache `&'static Operator` references, so evaluation never
//! looks a name up twice.

pub mod general;
pub mod scalar;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use daveml_common::ValueCell;

use crate::ast::{Context, ExprNode, Outcome, RetType};
use crate::error::EvalError;

pub type ScalarFn = fn(&ExprNode, &dyn Context) -> Result<Outcome, EvalError>;
pub type GeneralFn = fn(&ExprNode, &dyn Context) -> Result<ValueCell, EvalError>;

/// Where an operator's operands live in the source XML: the trailing siblings
/// under the enclosing `apply`, or the element's own children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSource {
    Siblings,
    Children,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    /// Pairs: even count, at least two.
    Even,
    /// Triples: count divisible by three, at least three.
    Triples,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Range(lo, hi) => n >= lo && n <= hi,
            Arity::Even => n >= 2 && n % 2 == 0,
            Arity::Triples => n >= 3 && n % 3 == 0,
        }
    }
}

/// How the exporter renders a node back to MathML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStyle {
    /// `<cn>` with numeric text.
    Number,
    /// `<ci>` with the bound varID.
    Identifier,
    /// `<apply>` wrapper containing its single child.
    Apply,
    /// Empty element followed by the operands as siblings.
    Siblings,
    /// Empty element followed by the single operand as a sibling.
    Sibling,
    /// Own element containing all operands (`piecewise`, `piece`).
    Children,
    /// Own element containing the single operand (`otherwise`, `degree`).
    Child,
    /// `<csymbol>` with the tag as character data, `cd` attribute preserved.
    Csymbol,
    /// `<selector other="...">` followed by the operands as siblings.
    Selector,
    /// `<csymbol type="...">mask</csymbol>` followed by the operands.
    Mask,
}

pub struct Operator {
    pub tag: &'static str,
    pub ret: RetType,
    pub source: ChildSource,
    pub arity: Arity,
    pub scalar: Option<ScalarFn>,
    pub general: GeneralFn,
    pub export: ExportStyle,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator").field("tag", &self.tag).finish()
    }
}

macro_rules! entry {
    ($tag:literal, $ret:ident, $source:ident, $arity:expr, $scalar:expr, $general:path, $export:ident) => {
        Operator {
            tag: $tag,
            ret: RetType::$ret,
            source: ChildSource::$source,
            arity: $arity,
            scalar: $scalar,
            general: $general,
            export: ExportStyle::$export,
        }
    };
}

use Arity::{AtLeast, Even, Exact, Range, Triples};

pub static OPERATORS: &[Operator] = &[
    // Numbers and identifiers.
    entry!("cn", Real, Siblings, Exact(0), Some(scalar::cn), general::cn, Number),
    entry!("ci", Real, Siblings, Exact(0), Some(scalar::ci), general::ci, Identifier),
    entry!("apply", Real, Children, Exact(1), Some(scalar::apply), general::apply, Apply),
    entry!("csymbol", Real, Children, Exact(1), Some(scalar::csymbol), general::csymbol, Csymbol),
    // Piecewise.
    entry!("piecewise", Real, Children, AtLeast(1), Some(scalar::piecewise), general::piecewise, Children),
    entry!("piece", Real, Children, Exact(2), Some(scalar::piece), general::piece, Children),
    entry!("otherwise", Real, Children, Exact(1), Some(scalar::otherwise), general::otherwise, Child),
    // Relational.
    entry!("eq", Bool, Siblings, Exact(2), Some(scalar::eq), general::eq, Siblings),
    entry!("neq", Bool, Siblings, Exact(2), Some(scalar::neq), general::neq, Siblings),
    entry!("gt", Bool, Siblings, Exact(2), Some(scalar::gt), general::gt, Siblings),
    entry!("geq", Bool, Siblings, Exact(2), Some(scalar::geq), general::geq, Siblings),
    entry!("lt", Bool, Siblings, Exact(2), Some(scalar::lt), general::lt, Siblings),
    entry!("leq", Bool, Siblings, Exact(2), Some(scalar::leq), general::leq, Siblings),
    // Logical.
    entry!("and", Bool, Siblings, AtLeast(1), Some(scalar::and), general::and, Siblings),
    entry!("or", Bool, Siblings, AtLeast(1), Some(scalar::or), general::or, Siblings),
    entry!("xor", Bool, Siblings, AtLeast(1), Some(scalar::xor), general::xor, Siblings),
    entry!("not", Bool, Siblings, Exact(1), Some(scalar::not), general::not, Siblings),
    // Arithmetic.
    entry!("plus", Real, Siblings, AtLeast(1), Some(scalar::plus), general::plus, Siblings),
    entry!("minus", Real, Siblings, AtLeast(1), Some(scalar::minus), general::minus, Siblings),
    entry!("times", Real, Siblings, AtLeast(1), Some(scalar::times), general::times, Siblings),
    entry!("divide", Real, Siblings, Exact(2), Some(scalar::divide), general::divide, Siblings),
    entry!("power", Real, Siblings, Exact(2), Some(scalar::power), general::power, Siblings),
    entry!("quotient", Real, Siblings, Exact(2), Some(scalar::quotient), general::quotient, Siblings),
    entry!("rem", Real, Siblings, Exact(2), Some(scalar::rem), general::rem, Siblings),
    entry!("factorial", Real, Siblings, Exact(1), Some(scalar::factorial), general::factorial, Siblings),
    entry!("max", Real, Siblings, AtLeast(1), Some(scalar::max), general::max, Siblings),
    entry!("min", Real, Siblings, AtLeast(1), Some(scalar::min), general::min, Siblings),
    entry!("root", Real, Siblings, Range(1, 2), Some(scalar::root), general::root, Siblings),
    entry!("degree", Real, Children, Exact(1), Some(scalar::degree), general::degree, Child),
    entry!("abs", Real, Siblings, Exact(1), Some(scalar::abs), general::abs, Siblings),
    entry!("floor", Real, Siblings, Exact(1), Some(scalar::floor), general::floor, Siblings),
    entry!("ceiling", Real, Siblings, Exact(1), Some(scalar::ceiling), general::ceiling, Siblings),
    entry!("fmod", Real, Siblings, Exact(2), Some(scalar::fmod), general::fmod, Csymbol),
    entry!("sign", Real, Siblings, Exact(2), Some(scalar::sign), general::sign, Csymbol),
    entry!("bound", Real, Siblings, Exact(3), Some(scalar::bound), general::bound, Csymbol),
    entry!("nearbyint", Real, Siblings, Exact(1), Some(scalar::nearbyint), general::nearbyint, Csymbol),
    // Trigonometric.
    entry!("sin", Real, Siblings, Exact(1), Some(scalar::sin), general::sin, Siblings),
    entry!("cos", Real, Siblings, Exact(1), Some(scalar::cos), general::cos, Siblings),
    entry!("tan", Real, Siblings, Exact(1), Some(scalar::tan), general::tan, Siblings),
    entry!("sec", Real, Siblings, Exact(1), Some(scalar::sec), general::sec, Siblings),
    entry!("csc", Real, Siblings, Exact(1), Some(scalar::csc), general::csc, Siblings),
    entry!("cot", Real, Siblings, Exact(1), Some(scalar::cot), general::cot, Siblings),
    entry!("sind", Real, Siblings, Exact(1), Some(scalar::sind), general::sind, Csymbol),
    entry!("cosd", Real, Siblings, Exact(1), Some(scalar::cosd), general::cosd, Csymbol),
    entry!("tand", Real, Siblings, Exact(1), Some(scalar::tand), general::tand, Csymbol),
    entry!("secd", Real, Siblings, Exact(1), Some(scalar::secd), general::secd, Csymbol),
    entry!("cscd", Real, Siblings, Exact(1), Some(scalar::cscd), general::cscd, Csymbol),
    entry!("cotd", Real, Siblings, Exact(1), Some(scalar::cotd), general::cotd, Csymbol),
    entry!("arcsin", Real, Siblings, Exact(1), Some(scalar::arcsin), general::arcsin, Siblings),
    entry!("arccos", Real, Siblings, Exact(1), Some(scalar::arccos), general::arccos, Siblings),
    entry!("arctan", Real, Siblings, Exact(1), Some(scalar::arctan), general::arctan, Siblings),
    entry!("arcsec", Real, Siblings, Exact(1), Some(scalar::arcsec), general::arcsec, Siblings),
    entry!("arccsc", Real, Siblings, Exact(1), Some(scalar::arccsc), general::arccsc, Siblings),
    entry!("arccot", Real, Siblings, Exact(1), Some(scalar::arccot), general::arccot, Siblings),
    entry!("arcsind", Real, Siblings, Exact(1), Some(scalar::arcsind), general::arcsind, Csymbol),
    entry!("arccosd", Real, Siblings, Exact(1), Some(scalar::arccosd), general::arccosd, Csymbol),
    entry!("arctand", Real, Siblings, Exact(1), Some(scalar::arctand), general::arctand, Csymbol),
    entry!("arcsecd", Real, Siblings, Exact(1), Some(scalar::arcsecd), general::arcsecd, Csymbol),
    entry!("arccscd", Real, Siblings, Exact(1), Some(scalar::arccscd), general::arccscd, Csymbol),
    entry!("arccotd", Real, Siblings, Exact(1), Some(scalar::arccotd), general::arccotd, Csymbol),
    entry!("atan2", Real, Siblings, Exact(2), Some(scalar::atan2), general::atan2, Csymbol),
    entry!("atan2d", Real, Siblings, Exact(2), Some(scalar::atan2d), general::atan2d, Csymbol),
    // Exponential and logarithmic.
    entry!("exp", Real, Siblings, Exact(1), Some(scalar::exp), general::exp, Siblings),
    entry!("ln", Real, Siblings, Exact(1), Some(scalar::ln), general::ln, Siblings),
    entry!("log", Real, Siblings, Range(1, 2), Some(scalar::log), general::log, Siblings),
    entry!("logbase", Real, Children, Exact(1), Some(scalar::logbase), general::logbase, Child),
    // Constants.
    entry!("exponentiale", Real, Siblings, Exact(0), Some(scalar::exponentiale), general::exponentiale, Siblings),
    entry!("notanumber", Real, Siblings, Exact(0), Some(scalar::notanumber), general::notanumber, Siblings),
    entry!("pi", Real, Siblings, Exact(0), Some(scalar::pi), general::pi, Siblings),
    entry!("eulergamma", Real, Siblings, Exact(0), Some(scalar::eulergamma), general::eulergamma, Siblings),
    entry!("infinity", Real, Siblings, Exact(0), Some(scalar::infinity), general::infinity, Siblings),
    entry!("noop", Real, Siblings, Exact(0), Some(scalar::noop), general::noop, Siblings),
    // Linear algebra: general path only.
    entry!("determinant", Real, Siblings, Exact(1), None, general::determinant, Sibling),
    entry!("transpose", Real, Siblings, Exact(1), None, general::transpose, Sibling),
    entry!("inverse", Real, Siblings, Exact(1), None, general::inverse, Sibling),
    entry!("selector_element", Real, Siblings, Range(2, 3), None, general::selector_element, Selector),
    entry!("selector_row", Real, Siblings, Even, None, general::selector_row, Selector),
    entry!("selector_column", Real, Siblings, Even, None, general::selector_column, Selector),
    entry!("selector_diag", Real, Siblings, Triples, None, general::selector_diag, Selector),
    entry!("selector_mslice", Real, Siblings, Exact(5), None, general::selector_mslice, Selector),
    entry!("vectorproduct", Real, Siblings, Exact(2), None, general::vectorproduct, Siblings),
    entry!("scalarproduct", Real, Siblings, Exact(2), None, general::scalarproduct, Siblings),
    entry!("outerproduct", Real, Siblings, Exact(2), None, general::outerproduct, Siblings),
    entry!("unitmatrix", Real, Siblings, Exact(1), None, general::unitmatrix, Csymbol),
    entry!("eulertransform", Real, Siblings, Exact(3), None, general::eulertransform, Csymbol),
    entry!("eulertransformd", Real, Siblings, Exact(3), None, general::eulertransformd, Csymbol),
    entry!("cross", Real, Siblings, Exact(1), None, general::cross, Csymbol),
    entry!("mask_plus", Real, Siblings, Exact(2), None, general::mask_plus, Mask),
    entry!("mask_minus", Real, Siblings, Exact(2), None, general::mask_minus, Mask),
    entry!("mask_times", Real, Siblings, Exact(2), None, general::mask_times, Mask),
    entry!("mask_divide", Real, Siblings, Exact(2), None, general::mask_divide, Mask),
];

static BY_TAG: Lazy<FxHashMap<&'static str, &'static Operator>> = Lazy::new(|| {
    OPERATORS.iter().map(|op| (op.tag, op)).collect()
});

pub fn lookup(tag: &str) -> Option<&'static Operator> {
    BY_TAG.get(tag).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_resolves_to_itself() {
        for op in OPERATORS {
            assert_eq!(lookup(op.tag).unwrap().tag, op.tag);
        }
    }

    #[test]
    fn general_table_is_a_superset_of_the_scalar_table() {
        // Every operator has a general evaluator by construction; the scalar
        // table must exclude exactly the linear-algebra operators.
        let scalar_only: Vec<_> = OPERATORS
            .iter()
            .filter(|op| op.scalar.is_none())
            .map(|op| op.tag)
            .collect();
        for tag in [
            "determinant",
            "transpose",
            "inverse",
            "vectorproduct",
            "unitmatrix",
            "cross",
            "mask_plus",
        ] {
            assert!(scalar_only.contains(&tag), "{tag} must be matrix-only");
        }
        assert!(!scalar_only.contains(&"plus"));
        assert!(!scalar_only.contains(&"sind"));
    }

    #[test]
    fn arity_rules() {
        assert!(Arity::Even.accepts(4));
        assert!(!Arity::Even.accepts(3));
        assert!(!Arity::Even.accepts(0));
        assert!(Arity::Triples.accepts(3));
        assert!(!Arity::Triples.accepts(4));
        assert!(Arity::Range(1, 2).accepts(2));
        assert!(!Arity::Range(1, 2).accepts(3));
    }
}
