//! The interpolation collaborator: gridded function tables with shared
//! breakpoint arrays. The engine consumes these through a narrow
//! `evaluate(inputs) -> value` contract; table internals stay here.

use crate::uncertainty::UncertaintySpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Gridded,
    Ungridded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableData {
    Numeric(Vec<f64>),
    Strings(Vec<String>),
}

impl TableData {
    pub fn len(&self) -> usize {
        match self {
            TableData::Numeric(v) => v.len(),
            TableData::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A gridded function table over n breakpoint dimensions, row-major with the
/// last dimension fastest.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    pub name: String,
    /// Variable indices of the independent inputs, outermost first.
    pub independent: Vec<usize>,
    pub breakpoints: Vec<Vec<f64>>,
    pub data: TableData,
    pub kind: TableKind,
    /// Uncertainty declared on the table itself; treated as applied at the
    /// output of the dependent variable.
    pub uncertainty: Option<UncertaintySpec>,
}

impl FunctionTable {
    pub fn is_string_table(&self) -> bool {
        matches!(self.data, TableData::Strings(_))
    }

    /// Multilinear interpolation at `inputs` (one scalar per dimension).
    /// Inputs beyond the breakpoint range hold the endpoint value.
    pub fn evaluate(&self, inputs: &[f64]) -> f64 {
        let TableData::Numeric(data) = &self.data else {
            return f64::NAN;
        };
        let n = self.breakpoints.len();

        // Bracketing interval and fraction per dimension.
        let mut lower = vec![0usize; n];
        let mut frac = vec![0.0f64; n];
        for (dim, bp) in self.breakpoints.iter().enumerate() {
            let (lo, f) = bracket(bp, inputs[dim]);
            lower[dim] = lo;
            frac[dim] = f;
        }

        // Row-major strides, last dimension fastest.
        let mut stride = vec![1usize; n];
        for dim in (0..n.saturating_sub(1)).rev() {
            stride[dim] = stride[dim + 1] * self.breakpoints[dim + 1].len();
        }

        // Weighted sum over the 2^n corners of the bracketing cell.
        let mut total = 0.0;
        for corner in 0..(1usize << n) {
            let mut weight = 1.0;
            let mut index = 0usize;
            for dim in 0..n {
                let hi = (corner >> dim) & 1 == 1;
                weight *= if hi { frac[dim] } else { 1.0 - frac[dim] };
                index += (lower[dim] + usize::from(hi)) * stride[dim];
            }
            if weight != 0.0 {
                total += weight * data[index];
            }
        }
        total
    }

    /// String lookup: each input is rounded to the nearest integer and must
    /// match a breakpoint exactly; the matched indices linearise row-major.
    pub fn string_lookup(&self, inputs: &[f64]) -> Option<&str> {
        let TableData::Strings(data) = &self.data else {
            return None;
        };

        let mut index = 0usize;
        let mut stride = 1usize;
        for dim in (0..self.breakpoints.len()).rev() {
            let x = inputs[dim].round_ties_even();
            let position = self.breakpoints[dim].iter().position(|bp| *bp == x)?;
            index += position * stride;
            stride *= self.breakpoints[dim].len();
        }
        data.get(index).map(String::as_str)
    }
}

/// Bracketing lower index and interpolation fraction in `[0, 1]`, clamped to
/// the endpoints of the breakpoint array.
fn bracket(breakpoints: &[f64], x: f64) -> (usize, f64) {
    if breakpoints.len() < 2 {
        return (0, 0.0);
    }
    let last = breakpoints.len() - 1;
    if x <= breakpoints[0] {
        return (0, 0.0);
    }
    if x >= breakpoints[last] {
        return (last - 1, 1.0);
    }
    let mut lo = 0usize;
    for i in 0..last {
        if x < breakpoints[i + 1] {
            lo = i;
            break;
        }
    }
    let span = breakpoints[lo + 1] - breakpoints[lo];
    let frac = if span == 0.0 {
        0.0
    } else {
        (x - breakpoints[lo]) / span
    };
    (lo, frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn table_1d() -> FunctionTable {
        FunctionTable {
            name: "cl".into(),
            independent: vec![0],
            breakpoints: vec![vec![0.0, 5.0, 10.0]],
            data: TableData::Numeric(vec![0.0, 0.5, 0.8]),
            kind: TableKind::Gridded,
            uncertainty: None,
        }
    }

    #[test]
    fn linear_interpolation_inside_and_at_breakpoints() {
        let t = table_1d();
        assert_approx_eq!(t.evaluate(&[0.0]), 0.0, 1e-12);
        assert_approx_eq!(t.evaluate(&[5.0]), 0.5, 1e-12);
        assert_approx_eq!(t.evaluate(&[2.5]), 0.25, 1e-12);
        assert_approx_eq!(t.evaluate(&[7.5]), 0.65, 1e-12);
    }

    #[test]
    fn extrapolation_holds_endpoints() {
        let t = table_1d();
        assert_approx_eq!(t.evaluate(&[-100.0]), 0.0, 1e-12);
        assert_approx_eq!(t.evaluate(&[100.0]), 0.8, 1e-12);
    }

    #[test]
    fn bilinear_interpolation() {
        let t = FunctionTable {
            name: "grid".into(),
            independent: vec![0, 1],
            breakpoints: vec![vec![0.0, 1.0], vec![0.0, 1.0]],
            // Row-major: f(0,0)=0, f(0,1)=1, f(1,0)=2, f(1,1)=3.
            data: TableData::Numeric(vec![0.0, 1.0, 2.0, 3.0]),
            kind: TableKind::Gridded,
            uncertainty: None,
        };
        assert_approx_eq!(t.evaluate(&[0.0, 0.5]), 0.5, 1e-12);
        assert_approx_eq!(t.evaluate(&[0.5, 0.0]), 1.0, 1e-12);
        assert_approx_eq!(t.evaluate(&[0.5, 0.5]), 1.5, 1e-12);
        assert_approx_eq!(t.evaluate(&[1.0, 1.0]), 3.0, 1e-12);
    }

    #[test]
    fn string_lookup_rounds_to_breakpoints() {
        let t = FunctionTable {
            name: "mode".into(),
            independent: vec![0],
            breakpoints: vec![vec![1.0, 2.0, 3.0]],
            data: TableData::Strings(vec!["up".into(), "down".into(), "hold".into()]),
            kind: TableKind::Gridded,
            uncertainty: None,
        };
        assert_eq!(t.string_lookup(&[2.0]), Some("down"));
        assert_eq!(t.string_lookup(&[2.4]), Some("down"));
        assert_eq!(t.string_lookup(&[7.0]), None);
    }
}
