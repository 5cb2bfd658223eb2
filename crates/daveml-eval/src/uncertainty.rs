//! Uncertainty declarations attached to variables and tables.
//!
//! A variable carries at most one PDF: Normal (yields a variance) or Uniform
//! (yields additive bounds). The propagation algorithms — Jacobian-based
//! variance and vertex-enumerated bounds — live with the model, which owns
//! the dependency graph they walk.

use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pdf {
    Normal { num_sigmas: u32 },
    Uniform,
}

/// How a declared uncertainty magnitude maps to an actual perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Additive,
    Multiplicative,
    Percentage,
    Absolute,
}

impl Effect {
    pub fn parse(s: &str) -> Option<Effect> {
        match s.trim().to_ascii_lowercase().as_str() {
            "additive" => Some(Effect::Additive),
            "multiplicative" => Some(Effect::Multiplicative),
            "percentage" => Some(Effect::Percentage),
            "absolute" => Some(Effect::Absolute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Additive => "additive",
            Effect::Multiplicative => "multiplicative",
            Effect::Percentage => "percentage",
            Effect::Absolute => "absolute",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintySpec {
    pub pdf: Pdf,
    pub effect: Effect,
    /// One symmetric bound, or explicit lower/upper bounds.
    pub bounds: SmallVec<[f64; 2]>,
    /// `(variable index, correlation coefficient)` pairs; symmetric lookups
    /// consult both sides.
    pub correlations: Vec<(usize, f64)>,
}

impl UncertaintySpec {
    pub fn first_bound(&self) -> f64 {
        self.bounds.first().copied().unwrap_or(0.0)
    }
}

use crate::error::EvalError;
use crate::model::Model;
use crate::variable::VarMethod;

/// Where an effective PDF was found: declared on the variable, declared on
/// its function table, or inherited from an ancestor through the dependency
/// graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PdfSource {
    Own,
    Table,
    Inherited,
}

impl Model {
    /// Variance of a Normal-PDF variable. Uniform-PDF variables report NaN;
    /// variables with no uncertainty anywhere in their ancestry report zero.
    pub fn variance(&self, index: usize) -> Result<f64, EvalError> {
        if self.vars[index].borrow().is_current_variance {
            return Ok(self.vars[index].borrow().variance);
        }

        let (variance, cache) = match self.effective_pdf(index) {
            None => (0.0, true),
            Some((spec, _)) if spec.pdf == Pdf::Uniform => (f64::NAN, false),
            Some((spec, source)) => {
                let Pdf::Normal { num_sigmas } = spec.pdf else {
                    return Ok(f64::NAN);
                };
                let variance = match source {
                    PdfSource::Own | PdfSource::Table => {
                        self.direct_variance(index, &spec, num_sigmas)?
                    }
                    PdfSource::Inherited => self.propagated_variance(index)?,
                };
                (variance, true)
            }
        };

        let mut v = self.vars[index].borrow_mut();
        v.variance = variance;
        v.is_current_variance = cache;
        Ok(variance)
    }

    /// `n·σ` deviation of a Normal-PDF variable.
    pub fn uncertainty_value_sigmas(&self, index: usize, num_sigmas: u32) -> Result<f64, EvalError> {
        Ok(num_sigmas as f64 * self.variance(index)?.sqrt())
    }

    /// Additive bound of a Uniform-PDF variable, relative to its nominal
    /// value. Normal-PDF variables report NaN; no uncertainty reports zero.
    pub fn uncertainty_bound(&self, index: usize, is_upper: bool) -> Result<f64, EvalError> {
        if !self.vars[index].borrow().is_current_bound {
            let (lower, upper, cache) = match self.effective_pdf(index) {
                None => (0.0, 0.0, true),
                Some((spec, _)) if matches!(spec.pdf, Pdf::Normal { .. }) => {
                    (f64::NAN, f64::NAN, false)
                }
                Some((spec, source)) => {
                    let (lower, upper) = match source {
                        PdfSource::Own | PdfSource::Table => self.direct_bounds(index, &spec)?,
                        PdfSource::Inherited => self.enumerated_bounds(index)?,
                    };
                    (lower, upper, true)
                }
            };
            let mut v = self.vars[index].borrow_mut();
            v.lower_bound = lower;
            v.upper_bound = upper;
            v.is_current_bound = cache;
        }
        let v = self.vars[index].borrow();
        Ok(if is_upper { v.upper_bound } else { v.lower_bound })
    }

    /// Correlation coefficients are symmetric: declared on either side.
    pub fn correlation_coefficient(&self, index: usize, other: usize) -> f64 {
        let lookup = |a: usize, b: usize| -> Option<f64> {
            self.vars[a]
                .borrow()
                .uncertainty
                .as_ref()?
                .correlations
                .iter()
                .find(|(i, _)| *i == b)
                .map(|(_, c)| *c)
        };
        if let Some(c) = lookup(index, other) {
            if c != 0.0 {
                return c;
            }
        }
        lookup(other, index).unwrap_or(0.0)
    }

    fn effective_pdf(&self, index: usize) -> Option<(UncertaintySpec, PdfSource)> {
        {
            let v = self.vars[index].borrow();
            if let Some(u) = &v.uncertainty {
                return Some((u.clone(), PdfSource::Own));
            }
            if v.method == VarMethod::Function {
                if let Some(function_ref) = v.function_ref {
                    if let Some(u) = &self.tables[function_ref].uncertainty {
                        return Some((u.clone(), PdfSource::Table));
                    }
                }
            }
        }
        // PDF inheritance: the first declared PDF among the ultimate inputs.
        let ancestors = self.vars[index].borrow().ancestors.clone();
        for ancestor in ancestors {
            if let Some(u) = &self.vars[ancestor].borrow().uncertainty {
                return Some((u.clone(), PdfSource::Inherited));
            }
        }
        None
    }

    /* ───────────── Normal PDF ───────────── */

    fn direct_variance(
        &self,
        index: usize,
        spec: &UncertaintySpec,
        num_sigmas: u32,
    ) -> Result<f64, EvalError> {
        let sigma_factor = 1.0 / num_sigmas.max(1) as f64;
        let bound = spec.first_bound();
        let std_dev = match spec.effect {
            Effect::Additive => bound * sigma_factor,
            Effect::Multiplicative => bound * self.value(index)? * sigma_factor,
            Effect::Percentage => bound / 100.0 * self.value(index)? * sigma_factor,
            Effect::Absolute => (self.value(index)? - bound).abs() * sigma_factor,
        };
        Ok(std_dev * std_dev)
    }

    /// `Jᵀ·Σ·J` over the direct inputs: the Jacobian is a central-difference
    /// estimate, the covariance diagonal recurses up the dependency tree and
    /// the off-diagonals come from declared correlation coefficients.
    fn propagated_variance(&self, index: usize) -> Result<f64, EvalError> {
        let deps = {
            let v = self.vars[index].borrow();
            match v.method {
                VarMethod::Function | VarMethod::MathML | VarMethod::Script => {
                    v.independent_refs.clone()
                }
                _ => return Ok(0.0),
            }
        };
        let n = deps.len();
        if n == 0 {
            return Ok(0.0);
        }

        let mut jacobian = vec![0.0; n];
        let mut covariance = vec![0.0; n * n];
        for i in 0..n {
            jacobian[i] = self.jacobian_component(index, deps[i])?;
            covariance[i + n * i] = self.variance(deps[i])?;
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let coefficient = self.correlation_coefficient(deps[i], deps[j]);
                let c = coefficient * (covariance[i + n * i] * covariance[j + n * j]).sqrt();
                covariance[j + n * i] = c;
                covariance[i + n * j] = c;
            }
        }

        let mut variance = 0.0;
        for i in 0..n {
            let mut row = 0.0;
            for j in 0..n {
                row += covariance[j + n * i] * jacobian[j];
            }
            variance += jacobian[i] * row;
        }
        Ok(variance)
    }

    /// `∂(this)/∂(input)` by central difference with step `1000·ε`.
    fn jacobian_component(&self, index: usize, input: usize) -> Result<f64, EvalError> {
        if self.vars[input].borrow().is_matrix {
            return Ok(0.0);
        }
        let step = 1000.0 * f64::EPSILON;
        let saved = self.vars[input].borrow().value;

        self.set_value_for_uncertainty(input, saved - step);
        let low = self.value(index)?;
        self.set_value_for_uncertainty(input, saved + step);
        let high = self.value(index)?;
        let result = (high - low) / (2.0 * step);

        self.set_value_for_uncertainty(input, saved);
        self.value(index)?;
        Ok(result)
    }

    /* ───────────── Uniform PDF ───────────── */

    fn direct_bounds(&self, index: usize, spec: &UncertaintySpec) -> Result<(f64, f64), EvalError> {
        let value = self.value(index)?;
        let mut lower = -spec.first_bound();
        let mut upper = if spec.bounds.len() == 1 {
            spec.first_bound()
        } else {
            spec.bounds[1]
        };
        match spec.effect {
            Effect::Additive => {}
            Effect::Multiplicative => {
                lower *= value;
                upper *= value;
            }
            Effect::Percentage => {
                lower *= value * 0.01;
                upper *= value * 0.01;
            }
            Effect::Absolute => {
                lower = -lower - value;
                upper -= value;
            }
        }
        Ok((lower, upper))
    }

    /// Vertex enumeration: evaluate at every corner of the input hypercube
    /// (each input at its lower or upper uniform bound) and record the
    /// extreme deviations from the nominal output. Inputs are restored.
    fn enumerated_bounds(&self, index: usize) -> Result<(f64, f64), EvalError> {
        let deps = {
            let v = self.vars[index].borrow();
            match v.method {
                VarMethod::Function | VarMethod::MathML | VarMethod::Script => {
                    v.independent_refs.clone()
                }
                _ => return Ok((0.0, 0.0)),
            }
        };
        let n = deps.len();
        if n == 0 {
            return Ok((0.0, 0.0));
        }

        let saved_output = self.value(index)?;
        let mut saved_input = vec![0.0; n];
        let mut input_bound = vec![0.0; 2 * n];
        for (k, &dep) in deps.iter().enumerate() {
            self.uncertainty_bound(dep, true)?;
            let value = self.value(dep)?;
            let (lo, hi) = {
                let v = self.vars[dep].borrow();
                (v.lower_bound, v.upper_bound)
            };
            saved_input[k] = value;
            input_bound[2 * k] = value + hi;
            input_bound[2 * k + 1] = value + lo;
        }

        let mut lower: f64 = 0.0;
        let mut upper: f64 = 0.0;
        for vertex in 0..(1usize << n) {
            for (k, &dep) in deps.iter().enumerate() {
                if !self.vars[dep].borrow().is_matrix {
                    let bit = (vertex >> k) & 1;
                    self.set_value_for_uncertainty(dep, input_bound[2 * k + bit]);
                }
            }
            let deviation = self.value(index)? - saved_output;
            lower = lower.min(deviation);
            upper = upper.max(deviation);
        }

        for (k, &dep) in deps.iter().enumerate() {
            if !self.vars[dep].borrow().is_matrix {
                self.set_value_for_uncertainty(dep, saved_input[k]);
            }
        }
        self.value(index)?;
        Ok((lower, upper))
    }
}
