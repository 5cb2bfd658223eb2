//! Interpreter for DAVE-ML flight-dynamics model datasets.
//!
//! A model is loaded from its XML source; the caller sets input variables and
//! reads output variables, which are computed on demand through the
//! dependency graph:
//!
//! ```
//! use daveml::Model;
//!
//! let model = Model::from_xml(
//!     r#"<DAVEfunc>
//!          <variableDef name="x" varID="x" units=""><isInput/></variableDef>
//!          <variableDef name="y" varID="y" units="">
//!            <isOutput/>
//!            <calculation><math>
//!              <apply><plus/><apply><times/><cn>2</cn><ci>x</ci></apply><cn>3</cn></apply>
//!            </math></calculation>
//!          </variableDef>
//!        </DAVEfunc>"#,
//! )
//! .unwrap();
//!
//! let x = model.variable_index("x").unwrap();
//! let y = model.variable_index("y").unwrap();
//! model.set_value(x, 4.0, false).unwrap();
//! assert_eq!(model.value(y).unwrap(), 11.0);
//! ```

pub use daveml_common::{DMat, MathError, Value, ValueCell};
pub use daveml_eval::{
    Effect, EvalError, FunctionTable, IdentityConverter, LoadError, Model, ParseError, Pdf,
    UncertaintySpec, UnitConverter, VarFlags, VarMethod, VarType, VariableDef,
};
pub use daveml_schema::{DaveFunc, SchemaError, XmlDoc};
