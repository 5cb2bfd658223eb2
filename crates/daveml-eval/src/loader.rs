//! Model construction from a DAVE-ML document: shells, tables, payloads,
//! dependency wiring, and the MathML-to-script conversion pass.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::warn;

use daveml_common::DMat;
use daveml_schema::{
    DaveFunc, PdfElement, TableData as SchemaTableData, UncertaintyElement, VariableElement,
    XmlDoc,
};

use crate::error::{LoadError, ParseError};
use crate::model::Model;
use crate::parser;
use crate::script::{self, CompiledScript, ScriptRuntime};
use crate::table::{FunctionTable, TableData, TableKind};
use crate::transpile;
use crate::uncertainty::{Effect, Pdf, UncertaintySpec};
use crate::units::UnitConverter;
use crate::variable::{ArrayCell, VarFlags, VarMethod, VarType, VariableDef};

pub(crate) fn build(
    source: &str,
    file_name: &str,
    converter: Box<dyn UnitConverter>,
) -> Result<Model, LoadError> {
    let doc = XmlDoc::parse(source)?;
    let dave = DaveFunc::from_dom(&doc.root)?;

    // Pass 1: variable shells and the varID index.
    let mut vars: Vec<RefCell<VariableDef>> = Vec::with_capacity(dave.variables.len());
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    for element in &dave.variables {
        if index.insert(element.var_id.clone(), vars.len()).is_some() {
            return Err(LoadError::DuplicateVarId {
                var_id: element.var_id.clone(),
            });
        }
        vars.push(RefCell::new(shell(element)));
    }

    // Breakpoint sets and function tables.
    let mut breakpoints: FxHashMap<&str, &Vec<f64>> = FxHashMap::default();
    for bp in &dave.breakpoints {
        breakpoints.insert(bp.bp_id.as_str(), &bp.values);
    }

    let mut tables: Vec<FunctionTable> = Vec::with_capacity(dave.functions.len());
    for function in &dave.functions {
        let dependent = *index
            .get(&function.dependent)
            .ok_or_else(|| LoadError::UnknownVarId {
                var_id: function.dependent.clone(),
            })?;
        let mut independent = Vec::with_capacity(function.independent.len());
        for var_id in &function.independent {
            independent.push(*index.get(var_id).ok_or_else(|| LoadError::UnknownVarId {
                var_id: var_id.clone(),
            })?);
        }
        let mut bps = Vec::with_capacity(function.table.breakpoint_refs.len());
        for bp_id in &function.table.breakpoint_refs {
            bps.push(
                (*breakpoints
                    .get(bp_id.as_str())
                    .ok_or_else(|| LoadError::UnknownBreakpoint {
                        bp_id: bp_id.clone(),
                    })?)
                .clone(),
            );
        }
        let expected: usize = bps.iter().map(Vec::len).product();
        if function.table.data.len() != expected {
            return Err(LoadError::TableSize {
                name: function.name.clone(),
                actual: function.table.data.len(),
                expected,
            });
        }

        let uncertainty = function
            .table
            .uncertainty
            .as_ref()
            .map(|u| resolve_uncertainty(u, &index))
            .transpose()?;

        {
            let mut v = vars[dependent].borrow_mut();
            v.method = VarMethod::Function;
            v.function_ref = Some(tables.len());
            v.independent_refs.extend(independent.iter().copied());
        }
        tables.push(FunctionTable {
            name: function.name.clone(),
            independent,
            breakpoints: bps,
            data: match &function.table.data {
                SchemaTableData::Numeric(v) => TableData::Numeric(v.clone()),
                SchemaTableData::Strings(v) => TableData::Strings(v.clone()),
            },
            kind: TableKind::Gridded,
            uncertainty,
        });
    }

    let model = Model {
        vars,
        index,
        tables,
        runtime: ScriptRuntime::new(),
        converter,
        file_name: file_name.to_owned(),
    };

    // Pass 2: computation payloads, uncertainty, perturbation wiring.
    for (i, element) in dave.variables.iter().enumerate() {
        load_payload(&model, i, element)?;
    }
    for (i, element) in dave.variables.iter().enumerate() {
        if let Some(p) = &element.perturbation {
            let target = *model
                .index
                .get(&p.target)
                .ok_or_else(|| LoadError::UnknownVarId {
                    var_id: p.target.clone(),
                })?;
            let effect = Effect::parse(&p.effect).filter(|e| {
                matches!(e, Effect::Additive | Effect::Multiplicative)
            });
            let Some(effect) = effect else {
                return Err(LoadError::Invalid {
                    var_id: element.var_id.clone(),
                    detail: format!("invalid perturbation effect \"{}\"", p.effect),
                });
            };
            {
                let mut v = model.vars[i].borrow_mut();
                v.perturbation_effect = Some(effect);
                v.perturbation_target = Some(target);
            }
            model.attach_perturbation(target, i)?;
        }
    }

    model.check_acyclic()?;
    model.compute_closures();

    // Matrix-awareness pass: pure-scalar trees take the fast path.
    for i in 0..model.vars.len() {
        let expr = {
            let v = model.vars[i].borrow();
            if v.method != VarMethod::MathML {
                continue;
            }
            v.expr.as_ref().map(Rc::clone)
        };
        if let Some(expr) = expr {
            let has_matrix_ops = model.tree_has_matrix_ops(&expr);
            model.vars[i].borrow_mut().has_matrix_ops = has_matrix_ops;
        }
    }

    convert_mathml_to_scripts(&model);

    Ok(model)
}

fn shell(element: &VariableElement) -> VariableDef {
    let mut v = VariableDef::new(&element.var_id);
    v.name = element.name.clone();
    v.units = element.units.clone();
    v.axis_system = element.axis_system.clone().unwrap_or_default();
    v.sign = element.sign.clone().unwrap_or_default();
    v.alias = element.alias.clone().unwrap_or_default();
    v.symbol = element.symbol.clone().unwrap_or_default();
    v.description = element.description.clone().unwrap_or_default();

    v.var_type = if element.flags.is_input {
        VarType::Input
    } else if element.flags.is_output {
        VarType::Output
    } else {
        VarType::Internal
    };
    if element.flags.is_state {
        v.flags |= VarFlags::STATE;
    }
    if element.flags.is_state_deriv {
        v.flags |= VarFlags::STATE_DERIV;
    }
    if element.flags.is_std_aiaa {
        v.flags |= VarFlags::STD_AIAA;
    }
    if element.flags.is_control {
        v.flags |= VarFlags::CONTROL;
    }
    if element.flags.is_disturbance {
        v.flags |= VarFlags::DISTURBANCE;
    }

    v.initial_value = element.initial_value;
    v.min_value = element.min_value;
    v.max_value = element.max_value;
    v.output_scale_factor = element.output_scale_factor;

    if let Some(dims) = &element.dimensions {
        let (rows, cols) = match dims.len() {
            0 => (1, 1),
            1 => (dims[0], 1),
            n => (dims[n - 2], dims[n - 1]),
        };
        v.matrix = DMat::zeros(rows.max(1), cols.max(1));
        v.is_matrix = v.matrix.len() > 1;
        if let Some(initial) = element.initial_value {
            v.matrix.fill(initial);
        }
    }
    if !v.is_matrix {
        let initial = v.clamp(element.initial_value.unwrap_or(0.0));
        v.sync_scalar(initial);
    }
    v
}

fn load_payload(model: &Model, i: usize, element: &VariableElement) -> Result<(), LoadError> {
    let var_id = element.var_id.clone();

    if let Some(math) = &element.calculation {
        let resolver = |name: &str| model.index.get(name).copied();
        let expr = parser::parse_math(math, &resolver).map_err(|source| LoadError::Parse {
            var_id: var_id.clone(),
            source,
        })?;
        let mut deps = Vec::new();
        expr.collect_var_indices(&mut deps);
        if deps.contains(&i) {
            return Err(LoadError::Parse {
                var_id: var_id.clone(),
                source: ParseError::SelfReference { var_id },
            });
        }
        let mut v = model.vars[i].borrow_mut();
        v.expr = Some(Rc::new(expr));
        v.method = VarMethod::MathML;
        v.independent_refs = deps;
    } else if let Some(script_element) = &element.script {
        let compiled = compile_script(model, i, &script_element.source)?;
        model.install_script(i, compiled);
    } else if let Some(array) = &element.array {
        let expected = model.vars[i].borrow().matrix.len();
        if element.dimensions.is_none() {
            return Err(LoadError::Invalid {
                var_id,
                detail: "array requires a dimensionDef".into(),
            });
        }
        if array.entries.len() != expected {
            return Err(LoadError::ArraySize {
                var_id,
                actual: array.entries.len(),
                expected,
            });
        }
        let mut cells = Vec::with_capacity(array.entries.len());
        let mut refs: Vec<usize> = Vec::new();
        for entry in &array.entries {
            if let Ok(literal) = entry.parse::<f64>() {
                cells.push(ArrayCell::Literal(literal));
                continue;
            }
            let (name, scale) = match entry.strip_prefix('-') {
                Some(rest) => (rest, -1.0),
                None => (entry.as_str(), 1.0),
            };
            let source = *model.index.get(name).ok_or_else(|| LoadError::UnknownVarId {
                var_id: name.to_owned(),
            })?;
            cells.push(ArrayCell::Ref {
                index: source,
                scale,
            });
            if !refs.contains(&source) {
                refs.push(source);
            }
        }

        let mut v = model.vars[i].borrow_mut();
        let ncols = v.matrix.ncols();
        for (k, cell) in cells.iter().enumerate() {
            if let ArrayCell::Literal(literal) = cell {
                v.matrix[(k / ncols, k % ncols)] = *literal;
            }
        }
        v.has_var_cells = !refs.is_empty();
        v.array_cells = cells;
        v.independent_refs.extend(refs.iter().copied());
        v.method = VarMethod::Array;
        if !v.has_var_cells {
            v.is_current = true;
        }
    }

    if let Some(uncertainty) = &element.uncertainty {
        let spec = resolve_uncertainty(uncertainty, &model.index)?;
        model.vars[i].borrow_mut().uncertainty = Some(spec);
    }
    Ok(())
}

fn resolve_uncertainty(
    element: &UncertaintyElement,
    index: &FxHashMap<String, usize>,
) -> Result<UncertaintySpec, LoadError> {
    let effect = Effect::parse(&element.effect).ok_or_else(|| LoadError::Invalid {
        var_id: String::new(),
        detail: format!("unknown uncertainty effect \"{}\"", element.effect),
    })?;
    match &element.pdf {
        PdfElement::Normal {
            num_sigmas,
            bounds,
            correlations,
        } => {
            let mut resolved = Vec::with_capacity(correlations.len());
            for (var_id, coefficient) in correlations {
                let other = *index.get(var_id).ok_or_else(|| LoadError::UnknownVarId {
                    var_id: var_id.clone(),
                })?;
                resolved.push((other, *coefficient));
            }
            Ok(UncertaintySpec {
                pdf: Pdf::Normal {
                    num_sigmas: (*num_sigmas).max(1),
                },
                effect,
                bounds: SmallVec::from_slice(bounds),
                correlations: resolved,
            })
        }
        PdfElement::Uniform { bounds } => Ok(UncertaintySpec {
            pdf: Pdf::Uniform,
            effect,
            bounds: SmallVec::from_slice(bounds),
            correlations: Vec::new(),
        }),
    }
}

fn compile_script(model: &Model, i: usize, source: &str) -> Result<CompiledScript, LoadError> {
    let var_id = model.vars[i].borrow().var_id.clone();
    let fail = |detail: String| LoadError::ScriptCompile {
        var_id: var_id.clone(),
        detail,
    };

    let pre = script::preprocess(source).map_err(&fail)?;

    let resolve_targets = |names: &[String]| -> Result<Vec<usize>, LoadError> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let Some(&target) = model.index.get(name) else {
                return Err(fail(format!("\"{name}\" is not defined")));
            };
            if model.vars[target].borrow().is_input() {
                return Err(fail(format!(
                    "input variable \"{name}\" cannot be set from a script"
                )));
            }
            if !out.contains(&target) {
                out.push(target);
            }
        }
        Ok(out)
    };
    let sticky = resolve_targets(&pre.sticky_names)?;
    let nonsticky = resolve_targets(&pre.nonsticky_names)?;

    let mut quiet = Vec::with_capacity(pre.quiet_names.len());
    for name in &pre.quiet_names {
        let Some(&idx) = model.index.get(name) else {
            return Err(fail(format!("\"{name}\" is not defined")));
        };
        if !quiet.contains(&idx) {
            quiet.push(idx);
        }
    }

    let mut exclude: FxHashSet<String> = FxHashSet::default();
    exclude.insert(var_id.clone());
    exclude.extend(pre.sticky_names.iter().cloned());
    exclude.extend(pre.nonsticky_names.iter().cloned());
    exclude.extend(pre.quiet_names.iter().cloned());
    let dep_names = script::dependency_names(&pre.source, &exclude);
    let deps = script::resolve_names(&dep_names, &model.index);

    let reads_self = script::mentions(&pre.source, &var_id);
    let assigns_self = script::assigns_to(&pre.source, &var_id);
    let uses_set_var_def = !sticky.is_empty() || !nonsticky.is_empty();

    let ast = model.runtime.compile(&pre.source).map_err(&fail)?;

    Ok(CompiledScript {
        source: pre.source,
        ast,
        deps,
        quiet,
        sticky,
        nonsticky,
        reads_self,
        assigns_self,
        uses_set_var_def,
    })
}

/// MathML-to-script acceleration: each scalar MathML variable is transpiled,
/// both forms are evaluated, and bit-exact agreement (NaN-aware) switches the
/// variable to the script path. Matrix-valued variables always keep MathML.
fn convert_mathml_to_scripts(model: &Model) {
    for i in 0..model.vars.len() {
        let (expr, var_id, deps) = {
            let v = model.vars[i].borrow();
            if v.method != VarMethod::MathML || v.has_matrix_ops || v.is_matrix {
                continue;
            }
            let Some(expr) = v.expr.as_ref().map(Rc::clone) else {
                continue;
            };
            (expr, v.var_id.clone(), v.independent_refs.clone())
        };

        let namer = |index: usize| model.vars[index].borrow().var_id.clone();
        let source = match transpile::transpile(&expr, &namer) {
            Ok(source) => source,
            Err(refused) => {
                warn!(
                    file = %model.file_name,
                    var_id = %var_id,
                    "could not convert MathML to a script ({refused}); using MathML"
                );
                continue;
            }
        };

        // Raw tree evaluation: clamping and output scaling happen outside
        // the expression and apply identically to both forms.
        let deps_ok = deps.iter().all(|&dep| model.ensure_current(dep).is_ok());
        if !deps_ok {
            continue;
        }
        let Ok(outcome) = expr.eval_scalar(model) else {
            continue;
        };
        let mathml_value = outcome.value;

        let ast = match model.runtime.compile(&source) {
            Ok(ast) => ast,
            Err(detail) => {
                warn!(
                    file = %model.file_name,
                    var_id = %var_id,
                    "transpiled script failed to compile ({detail}); using MathML"
                );
                continue;
            }
        };

        // Trial evaluation against the same, already-current inputs.
        let mut scope = rhai::Scope::new();
        for &dep in &deps {
            let v = model.vars[dep].borrow();
            scope.push(v.var_id.clone(), v.value);
        }
        let script_value = model
            .runtime
            .eval(&ast, &mut scope)
            .ok()
            .as_ref()
            .and_then(script::dynamic_to_f64);

        let agrees = match script_value {
            Some(s) => (s.is_nan() && mathml_value.is_nan()) || s == mathml_value,
            None => false,
        };
        if !agrees {
            warn!(
                file = %model.file_name,
                var_id = %var_id,
                "MathML-to-script conversion failed the value test; using MathML"
            );
            continue;
        }

        model.install_script(
            i,
            CompiledScript {
                source,
                ast,
                deps,
                quiet: Vec::new(),
                sticky: Vec::new(),
                nonsticky: Vec::new(),
                reads_self: false,
                assigns_self: false,
                uses_set_var_def: false,
            },
        );
    }
}
