//! The DAVE-ML evaluation engine.
//!
//! A [`Model`] owns a dense table of variables loaded from a DAVE-ML dataset.
//! Inputs are set by the caller; outputs are computed on demand by walking the
//! dependency graph, evaluating MathML expression trees (or their transpiled
//! script forms), interpolation tables and array definitions, with lazy
//! memoisation at the variable layer.

pub mod ast;
pub mod error;
pub mod export;
pub mod model;
pub mod ops;
pub mod parser;
pub mod script;
pub mod table;
pub mod transpile;
pub mod uncertainty;
pub mod units;
pub mod variable;

mod loader;

pub use ast::{Context, ExprNode, Outcome, RetType};
pub use error::{EvalError, LoadError, ParseError};
pub use model::Model;
pub use table::{FunctionTable, TableData, TableKind};
pub use uncertainty::{Effect, Pdf, UncertaintySpec};
pub use units::{IdentityConverter, UnitConverter};
pub use variable::{VarFlags, VarMethod, VarType, VariableDef};
