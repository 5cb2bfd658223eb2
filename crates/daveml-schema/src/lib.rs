pub mod dom;
pub mod elements;
pub mod error;

pub use dom::{Element, XmlDoc};
pub use elements::{
    ArrayElement, BreakpointElement, DaveFunc, FunctionElement, GriddedTableElement,
    PdfElement, PerturbationElement, ScriptElement, TableData, UncertaintyElement,
    VariableElement, VariableFlags,
};
pub use error::SchemaError;
