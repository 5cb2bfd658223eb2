//! The variable definition: identity, classification, dependency edges,
//! computation payload and the mutable evaluation state.

use std::rc::Rc;

use bitflags::bitflags;
use daveml_common::DMat;

use crate::ast::ExprNode;
use crate::script::CompiledScript;
use crate::uncertainty::{Effect, UncertaintySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Internal,
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarMethod {
    PlainVariable,
    Function,
    MathML,
    Script,
    Array,
    Model,
}

bitflags! {
    /// Classification tags carried through from the dataset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VarFlags: u8 {
        const STATE       = 0b0000_0001;
        const STATE_DERIV = 0b0000_0010;
        const STD_AIAA    = 0b0000_0100;
        const CONTROL     = 0b0000_1000;
        const DISTURBANCE = 0b0001_0000;
    }
}

/// One cell of an `Array`-method variable: a literal, or a signed reference
/// to another variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArrayCell {
    Literal(f64),
    Ref { index: usize, scale: f64 },
}

#[derive(Debug, Clone)]
pub struct VariableDef {
    // Identity.
    pub name: String,
    pub var_id: String,
    pub units: String,
    pub axis_system: String,
    pub sign: String,
    pub alias: String,
    pub symbol: String,
    pub description: String,

    // Classification.
    pub var_type: VarType,
    pub method: VarMethod,
    pub flags: VarFlags,

    // Bounds and scaling.
    pub initial_value: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub output_scale_factor: Option<f64>,

    // Dependency edges (all variable indices).
    pub independent_refs: Vec<usize>,
    pub ancestors: Vec<usize>,
    pub descendants: Vec<usize>,

    // Computation payload.
    pub expr: Option<Rc<ExprNode>>,
    pub function_ref: Option<usize>,
    pub script: Option<Rc<CompiledScript>>,
    pub array_cells: Vec<ArrayCell>,
    pub has_var_cells: bool,

    // Uncertainty and perturbation.
    pub uncertainty: Option<UncertaintySpec>,
    /// Attached perturbation variable, if any.
    pub perturbation_ref: Option<usize>,
    /// Set when this variable *is* a perturbation of another.
    pub perturbation_effect: Option<Effect>,
    pub perturbation_target: Option<usize>,

    // Evaluation state.
    pub value: f64,
    pub matrix: DMat,
    pub is_matrix: bool,
    pub is_current: bool,
    pub is_currentable: bool,
    pub has_matrix_ops: bool,
    pub in_evaluation: bool,
    pub is_forced: bool,
    pub input_warning_done: bool,

    // Uncertainty caches, cleared together with the value cache.
    pub variance: f64,
    pub is_current_variance: bool,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub is_current_bound: bool,
}

impl VariableDef {
    pub fn new(var_id: &str) -> Self {
        VariableDef {
            name: String::new(),
            var_id: var_id.to_owned(),
            units: String::new(),
            axis_system: String::new(),
            sign: String::new(),
            alias: String::new(),
            symbol: String::new(),
            description: String::new(),
            var_type: VarType::Internal,
            method: VarMethod::PlainVariable,
            flags: VarFlags::default(),
            initial_value: None,
            min_value: None,
            max_value: None,
            output_scale_factor: None,
            independent_refs: Vec::new(),
            ancestors: Vec::new(),
            descendants: Vec::new(),
            expr: None,
            function_ref: None,
            script: None,
            array_cells: Vec::new(),
            has_var_cells: false,
            uncertainty: None,
            perturbation_ref: None,
            perturbation_effect: None,
            perturbation_target: None,
            value: 0.0,
            matrix: DMat::zeros(1, 1),
            is_matrix: false,
            is_current: false,
            is_currentable: true,
            has_matrix_ops: false,
            in_evaluation: false,
            is_forced: false,
            input_warning_done: false,
            variance: 0.0,
            is_current_variance: false,
            lower_bound: 0.0,
            upper_bound: 0.0,
            is_current_bound: false,
        }
    }

    pub fn is_input(&self) -> bool {
        self.var_type == VarType::Input
    }

    pub fn has_perturbation(&self) -> bool {
        self.perturbation_ref.is_some()
    }

    /// Clamp a scalar into the declared `[minValue, maxValue]` range.
    pub fn clamp(&self, x: f64) -> f64 {
        let mut v = x;
        if let Some(min) = self.min_value {
            if v < min {
                v = min;
            }
        }
        if let Some(max) = self.max_value {
            if v > max {
                v = max;
            }
        }
        v
    }

    /// Drop every cached result: value, variance and bounds move together.
    pub fn set_not_current(&mut self) {
        self.is_current = false;
        self.is_current_variance = false;
        self.is_current_bound = false;
    }

    /// Keep the 1x1 matrix mirror in step with a scalar value.
    pub fn sync_scalar(&mut self, value: f64) {
        self.value = value;
        self.is_matrix = false;
        if self.matrix.len() != 1 {
            self.matrix = DMat::zeros(1, 1);
        }
        self.matrix[(0, 0)] = value;
    }
}
