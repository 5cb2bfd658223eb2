//! Error types of the evaluation engine.
//!
//! `ParseError` and `LoadError` fail construction of a model and are
//! unrecoverable at that level. `EvalError` surfaces to the caller of a
//! getter or setter as a fatal operation failure; the offending variable's
//! cache is cleared so the engine stays consistent.

use daveml_common::MathError;
use daveml_schema::SchemaError;
use thiserror::Error;

/// Malformed MathML.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("support for tag \"{tag}\" not provided")]
    UnsupportedTag { tag: String },

    #[error("\"{tag}\" has an incorrect number of associated elements ({found})")]
    ArityMismatch { tag: String, found: usize },

    #[error("\"{name}\" is not in the variable list")]
    UnboundIdentifier { name: String },

    #[error("\"{text}\" must be a floating point value within <cn>")]
    NotNumeric { text: String },

    #[error("<math> must contain exactly one top-level operator")]
    MalformedMath,

    #[error("\"{var_id}\" may not reference itself in MathML")]
    SelfReference { var_id: String },
}

/// Dataset-level failures at model construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("variable \"{var_id}\": {source}")]
    Parse {
        var_id: String,
        source: ParseError,
    },

    #[error("duplicate varID \"{var_id}\"")]
    DuplicateVarId { var_id: String },

    #[error("varID \"{var_id}\" is not defined")]
    UnknownVarId { var_id: String },

    #[error("breakpoint \"{bp_id}\" is not defined")]
    UnknownBreakpoint { bp_id: String },

    #[error("function \"{name}\": table has {actual} entries, breakpoints imply {expected}")]
    TableSize {
        name: String,
        actual: usize,
        expected: usize,
    },

    #[error("variable \"{var_id}\": array has {actual} entries, dimensions imply {expected}")]
    ArraySize {
        var_id: String,
        actual: usize,
        expected: usize,
    },

    #[error("variable \"{var_id}\": script compile failure: {detail}")]
    ScriptCompile { var_id: String, detail: String },

    #[error("dependency cycle involving \"{var_id}\"")]
    Cycle { var_id: String },

    #[error("variable \"{var_id}\": {detail}")]
    Invalid { var_id: String, detail: String },
}

/// Fatal failures of a single get/set operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Math(#[from] MathError),

    #[error("{op}: {detail}")]
    Invalid { op: &'static str, detail: String },

    #[error("identifier leaf is not bound to a variable")]
    UnboundIdentifier,

    #[error("scalar evaluation requested of matrix operator \"{op}\"")]
    ScalarPathUnsupported { op: &'static str },

    #[error("variable \"{var_id}\" is not of type value")]
    NotScalar { var_id: String },

    #[error("variable \"{var_id}\" is not of type vector")]
    NotVector { var_id: String },

    #[error("variable \"{var_id}\" is not of type matrix")]
    NotMatrix { var_id: String },

    #[error(
        "variable \"{var_id}\" expected a {expected_rows}x{expected_cols} result, got {rows}x{cols}"
    )]
    ShapeChanged {
        var_id: String,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("variable \"{var_id}\" expected a single value, got a matrix")]
    ExpectedScalarResult { var_id: String },

    #[error("variable \"{var_id}\" expected a matrix, got a single value")]
    ExpectedMatrixResult { var_id: String },

    #[error("attempt to set a vector/matrix variable \"{var_id}\" to a single value")]
    SetScalarOnMatrix { var_id: String },

    #[error("input dimensions are not compatible with variable \"{var_id}\"")]
    SetShapeMismatch { var_id: String },

    #[error("varID \"{var_id}\" is not a string table function")]
    NotStringTable { var_id: String },

    #[error("script error in \"{var_id}\": {detail}")]
    Script { var_id: String, detail: String },

    #[error("matrix perturbations are not supported (varID \"{var_id}\")")]
    MatrixPerturbation { var_id: String },

    #[error("perturbation for \"{var_id}\": {detail}")]
    PerturbationMismatch { var_id: String, detail: String },
}
