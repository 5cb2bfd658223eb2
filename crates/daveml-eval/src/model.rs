//! The model: a dense table of variables with lazy, memoised,
//! dependency-driven evaluation.
//!
//! All cross-references are indices into the table; expression trees and
//! compiled scripts are owned by their variables and never outlive them.
//! Evaluation is single-threaded and synchronous: `value()` runs to
//! completion on the caller's thread.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::warn;

use daveml_common::{DMat, Value, ValueCell};

use crate::ast::{Context, ExprNode};
use crate::error::{EvalError, LoadError};
use crate::export::{self, XmlText};
use crate::script::{self, CompiledScript, ScriptRuntime};
use crate::table::FunctionTable;
use crate::uncertainty::Effect;
use crate::units::{is_dimensionless, IdentityConverter, UnitConverter};
use crate::variable::{ArrayCell, VarMethod, VarType, VariableDef};

pub struct Model {
    pub(crate) vars: Vec<RefCell<VariableDef>>,
    pub(crate) index: FxHashMap<String, usize>,
    pub(crate) tables: Vec<FunctionTable>,
    pub(crate) runtime: ScriptRuntime,
    pub(crate) converter: Box<dyn UnitConverter>,
    pub(crate) file_name: String,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("file_name", &self.file_name)
            .field("variables", &self.vars.len())
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl Model {
    /// Construct a model from DAVE-ML XML text.
    pub fn from_xml(source: &str) -> Result<Model, LoadError> {
        Self::from_xml_named(source, "<memory>")
    }

    pub fn from_xml_named(source: &str, file_name: &str) -> Result<Model, LoadError> {
        crate::loader::build(source, file_name, Box::new(IdentityConverter))
    }

    pub fn with_converter(
        source: &str,
        file_name: &str,
        converter: Box<dyn UnitConverter>,
    ) -> Result<Model, LoadError> {
        crate::loader::build(source, file_name, converter)
    }

    /* ───────────── registry surface ───────────── */

    pub fn variable_count(&self) -> usize {
        self.vars.len()
    }

    pub fn variable_index(&self, var_id: &str) -> Option<usize> {
        self.index.get(var_id).copied()
    }

    /// Read-only view of a variable definition.
    pub fn variable(&self, index: usize) -> Ref<'_, VariableDef> {
        self.vars[index].borrow()
    }

    pub fn var_id(&self, index: usize) -> String {
        self.vars[index].borrow().var_id.clone()
    }

    /* ───────────── getters ───────────── */

    pub fn value(&self, index: usize) -> Result<f64, EvalError> {
        self.ensure_current(index)?;
        let v = self.vars[index].borrow();
        if v.is_matrix && v.matrix.len() > 1 {
            return Err(EvalError::NotScalar {
                var_id: v.var_id.clone(),
            });
        }
        Ok(v.value)
    }

    pub fn vector(&self, index: usize) -> Result<Vec<f64>, EvalError> {
        self.ensure_current(index)?;
        let v = self.vars[index].borrow();
        let is_vector =
            v.is_matrix && v.matrix.len() > 1 && (v.matrix.nrows() == 1 || v.matrix.ncols() == 1);
        if !is_vector {
            return Err(EvalError::NotVector {
                var_id: v.var_id.clone(),
            });
        }
        Ok(v.matrix.iter().copied().collect())
    }

    pub fn matrix(&self, index: usize) -> Result<DMat, EvalError> {
        self.ensure_current(index)?;
        let v = self.vars[index].borrow();
        if !v.is_matrix || v.matrix.len() <= 1 {
            return Err(EvalError::NotMatrix {
                var_id: v.var_id.clone(),
            });
        }
        Ok(v.matrix.clone())
    }

    pub fn value_si(&self, index: usize) -> Result<f64, EvalError> {
        let value = self.value(index)?;
        let units = self.vars[index].borrow().units.clone();
        Ok(self.converter.to_si(&units, value))
    }

    pub fn value_metric(&self, index: usize) -> Result<f64, EvalError> {
        let value = self.value(index)?;
        let units = self.vars[index].borrow().units.clone();
        Ok(self.converter.to_metric(&units, value))
    }

    /// String-table read: nearest-breakpoint match in every dimension.
    pub fn string_value(&self, index: usize) -> Result<String, EvalError> {
        let (function_ref, var_id) = {
            let v = self.vars[index].borrow();
            (v.function_ref, v.var_id.clone())
        };
        let Some(function_ref) = function_ref else {
            return Err(EvalError::NotStringTable { var_id });
        };
        let table = &self.tables[function_ref];
        if !table.is_string_table() {
            return Err(EvalError::NotStringTable { var_id });
        }

        let mut inputs = Vec::with_capacity(table.independent.len());
        for &dep in &table.independent {
            inputs.push(self.value(dep)?);
        }
        table
            .string_lookup(&inputs)
            .map(str::to_owned)
            .ok_or(EvalError::Invalid {
                op: "stringValue",
                detail: format!("no exact breakpoint match for \"{var_id}\""),
            })
    }

    /* ───────────── setters ───────────── */

    pub fn set_value(&self, index: usize, x: f64, forced: bool) -> Result<(), EvalError> {
        {
            let mut v = self.vars[index].borrow_mut();
            self.warn_non_input(&mut v, forced);
            v.is_forced |= forced;
            if !forced && v.is_matrix && v.matrix.len() > 1 {
                return Err(EvalError::SetScalarOnMatrix {
                    var_id: v.var_id.clone(),
                });
            }
            let clamped = v.clamp(x);
            v.sync_scalar(clamped);
            v.is_current = v.is_currentable;
        }
        if self.vars[index].borrow().has_perturbation() {
            self.apply_perturbation(index)?;
        }
        self.invalidate_descendants(index, forced);
        Ok(())
    }

    pub fn set_vector(&self, index: usize, data: &[f64], forced: bool) -> Result<(), EvalError> {
        {
            let mut v = self.vars[index].borrow_mut();
            self.warn_non_input(&mut v, forced);
            v.is_forced |= forced;
            let compatible = v.is_matrix
                && v.matrix.len() == data.len()
                && (v.matrix.nrows() == 1 || v.matrix.ncols() == 1);
            if compatible {
                let (rows, cols) = (v.matrix.nrows(), v.matrix.ncols());
                v.matrix = if rows == 1 {
                    DMat::from_row_slice(1, cols, data)
                } else {
                    DMat::from_column_slice(rows, 1, data)
                };
            } else if forced {
                v.matrix = DMat::from_column_slice(data.len(), 1, data);
            } else {
                return Err(EvalError::SetShapeMismatch {
                    var_id: v.var_id.clone(),
                });
            }
            v.is_matrix = true;
            v.is_current = v.is_currentable;
        }
        self.invalidate_descendants(index, forced);
        Ok(())
    }

    pub fn set_matrix(&self, index: usize, m: &DMat, forced: bool) -> Result<(), EvalError> {
        {
            let mut v = self.vars[index].borrow_mut();
            self.warn_non_input(&mut v, forced);
            v.is_forced |= forced;
            if !forced && v.matrix.shape() != m.shape() {
                return Err(EvalError::SetShapeMismatch {
                    var_id: v.var_id.clone(),
                });
            }
            v.matrix = m.clone();
            v.is_matrix = true;
            v.is_current = v.is_currentable;
        }
        self.invalidate_descendants(index, forced);
        Ok(())
    }

    pub fn set_value_si(&self, index: usize, x_si: f64) -> Result<(), EvalError> {
        let units = self.vars[index].borrow().units.clone();
        self.set_value(index, self.converter.from_si(&units, x_si), false)
    }

    pub fn set_value_metric(&self, index: usize, x_metric: f64) -> Result<(), EvalError> {
        let units = self.vars[index].borrow().units.clone();
        self.set_value(index, self.converter.from_metric(&units, x_metric), false)
    }

    /// Internal writer for uncertainty sweeps: no clamp, no warning, but the
    /// descendants still see the change.
    pub(crate) fn set_value_for_uncertainty(&self, index: usize, x: f64) {
        {
            let mut v = self.vars[index].borrow_mut();
            v.value = x;
            if v.is_matrix {
                v.matrix.fill(x);
            }
            v.is_current = v.is_currentable;
        }
        self.invalidate_descendants(index, false);
    }

    fn warn_non_input(&self, v: &mut VariableDef, forced: bool) {
        if !v.input_warning_done && v.var_type != VarType::Input && !forced {
            v.input_warning_done = true;
            warn!(
                file = %self.file_name,
                var_id = %v.var_id,
                "attempting to set an internal or output variable; consider <isInput/>"
            );
        }
    }

    pub(crate) fn invalidate_descendants(&self, index: usize, forced: bool) {
        let descendants = self.vars[index].borrow().descendants.clone();
        for d in descendants {
            let mut v = self.vars[d].borrow_mut();
            v.set_not_current();
            if forced {
                v.is_forced = true;
            }
        }
    }

    /* ───────────── perturbations ───────────── */

    /// Attach (or retune) a perturbation of this variable. A perturbation is
    /// itself a variable; the first call creates it.
    pub fn set_perturbation(
        &mut self,
        index: usize,
        effect: Effect,
        value: f64,
    ) -> Result<usize, EvalError> {
        let var_id = self.vars[index].borrow().var_id.clone();
        if !matches!(effect, Effect::Additive | Effect::Multiplicative) {
            return Err(EvalError::PerturbationMismatch {
                var_id,
                detail: format!("invalid perturbation effect \"{}\"", effect.as_str()),
            });
        }
        if self.vars[index].borrow().is_matrix {
            return Err(EvalError::MatrixPerturbation { var_id });
        }

        if let Some(existing) = self.vars[index].borrow().perturbation_ref {
            {
                let mut p = self.vars[existing].borrow_mut();
                p.perturbation_effect = Some(effect);
                p.sync_scalar(value);
                p.is_current = true;
            }
            self.vars[index].borrow_mut().is_current = false;
            return Ok(existing);
        }

        let new_index = self.vars.len();
        let units = self.vars[index].borrow().units.clone();
        let mut p = VariableDef::new(&format!("{var_id}_perturbation"));
        p.name = format!("perturbation of {var_id}");
        p.units = if effect == Effect::Multiplicative {
            "nd".to_owned()
        } else {
            units
        };
        p.axis_system = self.vars[index].borrow().axis_system.clone();
        p.perturbation_effect = Some(effect);
        p.perturbation_target = Some(index);
        p.sync_scalar(value);
        p.is_current = true;
        // The perturbation influences its target and everything downstream.
        let mut descendants = self.vars[index].borrow().descendants.clone();
        descendants.push(index);
        p.descendants = descendants;

        self.index.insert(p.var_id.clone(), new_index);
        self.vars.push(RefCell::new(p));

        {
            let mut v = self.vars[index].borrow_mut();
            v.perturbation_ref = Some(new_index);
            v.independent_refs.push(new_index);
            v.ancestors.push(new_index);
            v.is_current = false;
        }
        Ok(new_index)
    }

    pub(crate) fn attach_perturbation(
        &self,
        target: usize,
        perturbation: usize,
    ) -> Result<(), LoadError> {
        let (p_effect, p_units, p_axis, p_id) = {
            let p = self.vars[perturbation].borrow();
            (
                p.perturbation_effect,
                p.units.clone(),
                p.axis_system.clone(),
                p.var_id.clone(),
            )
        };
        let mut v = self.vars[target].borrow_mut();
        if v.perturbation_ref.is_some() {
            return Err(LoadError::Invalid {
                var_id: v.var_id.clone(),
                detail: "a perturbation is already associated with this variable".into(),
            });
        }
        match p_effect {
            Some(Effect::Additive) => {
                if !self.converter.compatible(&v.units, &p_units) {
                    return Err(LoadError::Invalid {
                        var_id: p_id,
                        detail: "additive perturbation units are incompatible with the target"
                            .into(),
                    });
                }
            }
            Some(Effect::Multiplicative) => {
                if !is_dimensionless(&p_units) {
                    return Err(LoadError::Invalid {
                        var_id: p_id,
                        detail: "multiplicative perturbation must be non-dimensional".into(),
                    });
                }
            }
            _ => {
                return Err(LoadError::Invalid {
                    var_id: p_id,
                    detail: "perturbation effect must be additive or multiplicative".into(),
                })
            }
        }
        if !p_axis.trim().eq_ignore_ascii_case(v.axis_system.trim()) {
            return Err(LoadError::Invalid {
                var_id: p_id,
                detail: "perturbation axisSystem does not match the target".into(),
            });
        }
        if v.is_matrix {
            return Err(LoadError::Invalid {
                var_id: v.var_id.clone(),
                detail: "matrix perturbations are not supported".into(),
            });
        }
        v.perturbation_ref = Some(perturbation);
        v.independent_refs.push(perturbation);
        v.is_current = false;
        Ok(())
    }

    fn apply_perturbation(&self, index: usize) -> Result<(), EvalError> {
        let Some(p_index) = self.vars[index].borrow().perturbation_ref else {
            return Ok(());
        };
        self.ensure_current(p_index)?;
        let (p_effect, p_value, p_units) = {
            let p = self.vars[p_index].borrow();
            (p.perturbation_effect, p.value, p.units.clone())
        };
        let mut v = self.vars[index].borrow_mut();
        if v.is_matrix {
            return Err(EvalError::MatrixPerturbation {
                var_id: v.var_id.clone(),
            });
        }
        match p_effect {
            Some(Effect::Additive) => {
                // Additive perturbations act in SI-converted units.
                let value_si = self.converter.to_si(&v.units, v.value);
                let p_si = self.converter.to_si(&p_units, p_value);
                let sum = self.converter.from_si(&v.units, value_si + p_si);
                v.sync_scalar(sum);
            }
            Some(Effect::Multiplicative) => {
                let product = v.value * p_value;
                v.sync_scalar(product);
            }
            _ => {}
        }
        Ok(())
    }

    /* ───────────── solve ───────────── */

    pub(crate) fn ensure_current(&self, index: usize) -> Result<(), EvalError> {
        if !self.vars[index].borrow().is_current {
            self.solve_value(index)?;
        }
        Ok(())
    }

    fn solve_value(&self, index: usize) -> Result<(), EvalError> {
        {
            let mut v = self.vars[index].borrow_mut();
            if v.in_evaluation {
                // Re-entrant read (a script consulting its own value): leave
                // the current contents in place.
                return Ok(());
            }
            v.in_evaluation = true;
        }
        let result = self.solve_inner(index);
        let mut v = self.vars[index].borrow_mut();
        v.in_evaluation = false;
        if result.is_err() {
            v.set_not_current();
        }
        result
    }

    fn solve_inner(&self, index: usize) -> Result<(), EvalError> {
        let (deps, method) = {
            let v = self.vars[index].borrow();
            (v.independent_refs.clone(), v.method)
        };

        // Walk upward first so this result reflects the current inputs.
        for dep in deps {
            if !self.vars[dep].borrow().is_current {
                self.solve_value(dep)?;
            }
        }

        match method {
            VarMethod::PlainVariable => {
                let mut v = self.vars[index].borrow_mut();
                // A perturbed plain variable restores its base value so the
                // perturbation always acts on a fresh input.
                if v.has_perturbation() {
                    if let Some(initial) = v.initial_value {
                        v.value = initial;
                    }
                }
            }
            VarMethod::Function => self.solve_function(index)?,
            VarMethod::MathML => self.solve_math(index)?,
            VarMethod::Script => self.solve_script(index)?,
            VarMethod::Array => self.solve_array(index)?,
            VarMethod::Model => {}
        }

        {
            let mut v = self.vars[index].borrow_mut();
            if v.is_matrix {
                if v.matrix.len() == 1 {
                    v.value = v.matrix[(0, 0)];
                }
            } else {
                let clamped = v.clamp(v.value);
                v.sync_scalar(clamped);
            }
        }

        if self.vars[index].borrow().has_perturbation() {
            self.apply_perturbation(index)?;
        }

        let mut v = self.vars[index].borrow_mut();
        v.is_current = v.is_currentable;
        Ok(())
    }

    fn solve_function(&self, index: usize) -> Result<(), EvalError> {
        let Some(function_ref) = self.vars[index].borrow().function_ref else {
            return Ok(());
        };
        let table = &self.tables[function_ref];
        if table.is_string_table() || table.data.is_empty() {
            // String tables are read through `string_value`; the numeric
            // value is left alone.
            return Ok(());
        }
        let mut inputs = Vec::with_capacity(table.independent.len());
        for &dep in &table.independent {
            let v = self.vars[dep].borrow();
            inputs.push(v.value);
        }
        let value = table.evaluate(&inputs);
        let mut v = self.vars[index].borrow_mut();
        v.value = value;
        v.is_matrix = false;
        Ok(())
    }

    fn solve_math(&self, index: usize) -> Result<(), EvalError> {
        let (expr, has_matrix_ops, forced, var_id) = {
            let v = self.vars[index].borrow();
            let Some(expr) = v.expr.as_ref().map(Rc::clone) else {
                return Ok(());
            };
            (expr, v.has_matrix_ops, v.is_forced, v.var_id.clone())
        };

        if !has_matrix_ops {
            let outcome = expr.eval_scalar(self)?;
            let mut v = self.vars[index].borrow_mut();
            v.value = outcome.value;
            v.is_matrix = false;
        } else {
            let cell = expr.eval(self)?;
            let mut v = self.vars[index].borrow_mut();
            match cell.value {
                Value::Scalar(s) => {
                    if !forced && v.is_matrix && v.matrix.len() > 1 {
                        return Err(EvalError::ExpectedMatrixResult { var_id });
                    }
                    v.value = s;
                    v.is_matrix = false;
                }
                Value::Matrix(m) => {
                    if !forced {
                        if !v.is_matrix {
                            return Err(EvalError::ExpectedScalarResult { var_id });
                        }
                        if v.matrix.shape() != m.shape() {
                            return Err(EvalError::ShapeChanged {
                                var_id,
                                expected_rows: v.matrix.nrows(),
                                expected_cols: v.matrix.ncols(),
                                rows: m.nrows(),
                                cols: m.ncols(),
                            });
                        }
                    }
                    v.matrix = m;
                    v.is_matrix = true;
                }
            }
        }
        self.apply_output_scale(index);
        Ok(())
    }

    fn solve_script(&self, index: usize) -> Result<(), EvalError> {
        let (compiled, var_id) = {
            let v = self.vars[index].borrow();
            let Some(script) = v.script.as_ref().map(Rc::clone) else {
                return Ok(());
            };
            (script, v.var_id.clone())
        };

        let mut scope = rhai::Scope::new();
        let mut bound: Vec<usize> = Vec::new();
        let mut bind = |model: &Model, scope: &mut rhai::Scope<'static>, idx: usize| {
            if bound.contains(&idx) {
                return;
            }
            bound.push(idx);
            let v = model.vars[idx].borrow();
            if v.is_matrix {
                scope.push(v.var_id.clone(), matrix_to_dynamic(&v.matrix));
            } else {
                scope.push(v.var_id.clone(), v.value);
            }
        };

        // Dependencies are already current; quiet reads and set-targets are
        // brought up to date before binding.
        for &dep in &compiled.deps {
            bind(self, &mut scope, dep);
        }
        for &idx in compiled
            .quiet
            .iter()
            .chain(&compiled.sticky)
            .chain(&compiled.nonsticky)
        {
            self.ensure_current(idx)?;
            bind(self, &mut scope, idx);
        }
        if compiled.reads_self || compiled.assigns_self {
            bind(self, &mut scope, index);
        }

        let result = self
            .runtime
            .eval(&compiled.ast, &mut scope)
            .map_err(|detail| EvalError::Script {
                var_id: var_id.clone(),
                detail,
            })?;

        let output = if compiled.assigns_self {
            scope.get(&var_id).and_then(script::dynamic_to_f64)
        } else {
            script::dynamic_to_f64(&result)
        };
        let Some(output) = output else {
            return Err(EvalError::Script {
                var_id,
                detail: "script did not produce a numeric result".into(),
            });
        };

        // Sticky targets persist; non-sticky targets were never written back,
        // which restores them by construction.
        for &target in &compiled.sticky {
            let name = self.vars[target].borrow().var_id.clone();
            if let Some(v) = scope.get(&name).and_then(script::dynamic_to_f64) {
                self.set_value(target, v, true)?;
            }
        }

        let mut v = self.vars[index].borrow_mut();
        v.value = output;
        v.is_matrix = false;
        drop(v);
        self.apply_output_scale(index);
        Ok(())
    }

    fn solve_array(&self, index: usize) -> Result<(), EvalError> {
        let (cells, has_var_cells, is_matrix) = {
            let v = self.vars[index].borrow();
            (v.array_cells.clone(), v.has_var_cells, v.is_matrix)
        };
        if !is_matrix || !has_var_cells {
            return Ok(());
        }
        let mut updates: Vec<(usize, f64)> = Vec::new();
        for (k, cell) in cells.iter().enumerate() {
            if let ArrayCell::Ref { index: source, scale } = cell {
                let value = self.vars[*source].borrow().value;
                updates.push((k, value * scale));
            }
        }
        let mut v = self.vars[index].borrow_mut();
        let ncols = v.matrix.ncols();
        for (k, value) in updates {
            v.matrix[(k / ncols, k % ncols)] = value;
        }
        Ok(())
    }

    fn apply_output_scale(&self, index: usize) {
        let mut v = self.vars[index].borrow_mut();
        if let Some(scale) = v.output_scale_factor {
            if v.is_matrix {
                v.matrix *= scale;
            } else {
                v.value *= scale;
            }
        }
    }

    /* ───────────── export ───────────── */

    /// Serialise a variable's MathML calculation, if it has one.
    pub fn export_math(&self, index: usize) -> Option<String> {
        let expr = self.vars[index].borrow().expr.as_ref().map(Rc::clone)?;
        Some(export::export_math(&expr, &self.namer()))
    }

    /// Write a complete `variableDef` element, including its calculation or
    /// script payload.
    pub fn export_definition(&self, index: usize) -> String {
        let v = self.vars[index].borrow();
        let mut w = XmlText::new();

        let initial = v.initial_value.map(|x| x.to_string());
        let min = v.min_value.map(|x| x.to_string());
        let max = v.max_value.map(|x| x.to_string());
        let mut attrs: Vec<(&str, &str)> = vec![
            ("name", v.name.as_str()),
            ("varID", v.var_id.as_str()),
            ("units", v.units.as_str()),
        ];
        if !v.axis_system.is_empty() {
            attrs.push(("axisSystem", v.axis_system.as_str()));
        }
        if !v.sign.is_empty() {
            attrs.push(("sign", v.sign.as_str()));
        }
        if !v.alias.is_empty() {
            attrs.push(("alias", v.alias.as_str()));
        }
        if !v.symbol.is_empty() {
            attrs.push(("symbol", v.symbol.as_str()));
        }
        if let Some(initial) = initial.as_deref() {
            attrs.push(("initialValue", initial));
        }
        if let Some(min) = min.as_deref() {
            attrs.push(("minValue", min));
        }
        if let Some(max) = max.as_deref() {
            attrs.push(("maxValue", max));
        }
        w.open("variableDef", &attrs);

        if !v.description.is_empty() {
            w.open("description", &[]);
            w.text(&v.description);
            w.close("description");
        }
        if v.var_type == VarType::Input {
            w.empty("isInput", &[]);
        }
        if v.var_type == VarType::Output {
            w.empty("isOutput", &[]);
        }
        for (flag, tag) in [
            (crate::variable::VarFlags::CONTROL, "isControl"),
            (crate::variable::VarFlags::DISTURBANCE, "isDisturbance"),
            (crate::variable::VarFlags::STATE, "isState"),
            (crate::variable::VarFlags::STATE_DERIV, "isStateDeriv"),
            (crate::variable::VarFlags::STD_AIAA, "isStdAIAA"),
        ] {
            if v.flags.contains(flag) {
                w.empty(tag, &[]);
            }
        }

        if let Some(expr) = v.expr.as_ref() {
            w.open("calculation", &[]);
            let math = export::export_math(expr, &self.namer());
            w.raw(&math);
            w.close("calculation");
        } else if let Some(script) = v.script.as_ref() {
            w.open("script", &[("type", "rhai")]);
            w.text(&script.source);
            w.close("script");
        }

        w.close("variableDef");
        w.finish()
    }

    fn namer(&self) -> impl export::VarNamer + '_ {
        move |index: usize| self.vars[index].borrow().var_id.clone()
    }

    /* ───────────── dependency bookkeeping (load-time) ───────────── */

    /// Fixed-point pass computing `ancestors` (transitive inputs) and
    /// `descendants` (transitive dependents) from the direct edges.
    pub(crate) fn compute_closures(&self) {
        let n = self.vars.len();
        for i in 0..n {
            let mut ancestors: Vec<usize> = Vec::new();
            let mut stack: Vec<usize> = self.vars[i].borrow().independent_refs.clone();
            while let Some(j) = stack.pop() {
                if j == i || ancestors.contains(&j) {
                    continue;
                }
                ancestors.push(j);
                stack.extend(self.vars[j].borrow().independent_refs.iter().copied());
            }
            self.vars[i].borrow_mut().ancestors = ancestors;
        }
        for i in 0..n {
            let mut descendants: Vec<usize> = Vec::new();
            for j in 0..n {
                if j != i && self.vars[j].borrow().ancestors.contains(&i) {
                    descendants.push(j);
                }
            }
            self.vars[i].borrow_mut().descendants = descendants;
        }
    }

    /// Dependency cycles are a load error; scripted self-reference is the
    /// only sanctioned loop and is not recorded as an edge.
    pub(crate) fn check_acyclic(&self) -> Result<(), LoadError> {
        let n = self.vars.len();
        // 0 = unvisited, 1 = on stack, 2 = done.
        let mut state = vec![0u8; n];
        for start in 0..n {
            if state[start] != 0 {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            state[start] = 1;
            while let Some(top) = stack.last_mut() {
                let (node, edge) = *top;
                let deps = self.vars[node].borrow().independent_refs.clone();
                if edge >= deps.len() {
                    state[node] = 2;
                    stack.pop();
                    continue;
                }
                top.1 += 1;
                let next = deps[edge];
                match state[next] {
                    0 => {
                        state[next] = 1;
                        stack.push((next, 0));
                    }
                    1 => {
                        return Err(LoadError::Cycle {
                            var_id: self.vars[next].borrow().var_id.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Whether a tree can produce a matrix: a matrix-only operator anywhere,
    /// or an identifier that resolves to a matrix-shaped variable (directly
    /// or through its own MathML).
    pub(crate) fn tree_has_matrix_ops(&self, node: &ExprNode) -> bool {
        if node.op.scalar.is_none() {
            return true;
        }
        if let Some(index) = node.var_index {
            let (is_matrix, method, expr) = {
                let v = self.vars[index].borrow();
                (v.is_matrix, v.method, v.expr.as_ref().map(Rc::clone))
            };
            if is_matrix {
                return true;
            }
            if method == VarMethod::MathML {
                if let Some(expr) = expr {
                    if self.tree_has_matrix_ops(&expr) {
                        return true;
                    }
                }
            }
        }
        node.children.iter().any(|c| self.tree_has_matrix_ops(c))
    }

    pub(crate) fn install_script(&self, index: usize, script: CompiledScript) {
        let mut v = self.vars[index].borrow_mut();
        v.independent_refs = script.deps.clone();
        v.is_currentable = !script.uses_set_var_def;
        v.script = Some(Rc::new(script));
        v.method = VarMethod::Script;
    }
}

impl Context for Model {
    fn scalar(&self, index: usize) -> Result<f64, EvalError> {
        self.ensure_current(index)?;
        let v = self.vars[index].borrow();
        if v.is_matrix && v.matrix.len() > 1 {
            return Err(EvalError::NotScalar {
                var_id: v.var_id.clone(),
            });
        }
        Ok(v.value)
    }

    fn cell(&self, index: usize) -> Result<ValueCell, EvalError> {
        self.ensure_current(index)?;
        let v = self.vars[index].borrow();
        if v.is_matrix {
            Ok(ValueCell::matrix(v.matrix.clone()))
        } else {
            Ok(ValueCell::scalar(v.value))
        }
    }
}

/// Vectors bind into scripts as arrays, matrices as arrays of row arrays.
fn matrix_to_dynamic(m: &DMat) -> rhai::Dynamic {
    if m.nrows() == 1 || m.ncols() == 1 {
        let array: rhai::Array = m.iter().map(|v| rhai::Dynamic::from(*v)).collect();
        return rhai::Dynamic::from(array);
    }
    let mut rows: rhai::Array = rhai::Array::with_capacity(m.nrows());
    for r in 0..m.nrows() {
        let row: rhai::Array = (0..m.ncols())
            .map(|c| rhai::Dynamic::from(m[(r, c)]))
            .collect();
        rows.push(rhai::Dynamic::from(row));
    }
    rhai::Dynamic::from(rows)
}
