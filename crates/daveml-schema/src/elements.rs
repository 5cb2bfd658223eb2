//! Typed views of the DAVE-ML elements the engine consumes: variable
//! definitions, breakpoint sets and function tables.

use crate::dom::Element;
use crate::SchemaError;

fn parse_f64(element: &Element, text: &str) -> Result<f64, SchemaError> {
    text.trim().parse::<f64>().map_err(|_| SchemaError::Invalid {
        element: element.name.clone(),
        detail: format!("\"{}\" is not numeric", text.trim()),
    })
}

/// Whitespace- or comma-separated tokens of a data block.
fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableFlags {
    pub is_input: bool,
    pub is_output: bool,
    pub is_control: bool,
    pub is_disturbance: bool,
    pub is_state: bool,
    pub is_state_deriv: bool,
    pub is_std_aiaa: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptElement {
    pub kind: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayElement {
    /// Raw cell entries: numeric literals or (possibly `-`-prefixed) varIDs.
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PdfElement {
    Normal {
        num_sigmas: u32,
        bounds: Vec<f64>,
        /// `(varID, correlation coefficient)` pairs.
        correlations: Vec<(String, f64)>,
    },
    Uniform {
        bounds: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintyElement {
    pub effect: String,
    pub pdf: PdfElement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerturbationElement {
    pub target: String,
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableElement {
    pub name: String,
    pub var_id: String,
    pub units: String,
    pub axis_system: Option<String>,
    pub sign: Option<String>,
    pub alias: Option<String>,
    pub symbol: Option<String>,
    pub initial_value: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub description: Option<String>,
    pub flags: VariableFlags,
    pub output_scale_factor: Option<f64>,
    pub dimensions: Option<Vec<usize>>,
    /// The `<math>` subtree of a `<calculation>` element, kept as DOM for the
    /// MathML parser.
    pub calculation: Option<Element>,
    pub script: Option<ScriptElement>,
    pub array: Option<ArrayElement>,
    pub uncertainty: Option<UncertaintyElement>,
    pub perturbation: Option<PerturbationElement>,
}

impl VariableElement {
    pub fn from_dom(e: &Element) -> Result<VariableElement, SchemaError> {
        let attr_f64 = |name: &str| -> Result<Option<f64>, SchemaError> {
            e.attribute(name).map(|t| parse_f64(e, t)).transpose()
        };

        let flags = VariableFlags {
            is_input: e.has_child("isInput"),
            is_output: e.has_child("isOutput"),
            is_control: e.has_child("isControl"),
            is_disturbance: e.has_child("isDisturbance"),
            is_state: e.has_child("isState"),
            is_state_deriv: e.has_child("isStateDeriv"),
            is_std_aiaa: e.has_child("isStdAIAA"),
        };

        let calculation = e
            .child("calculation")
            .map(|c| c.require_child("math").cloned())
            .transpose()?;

        let script = e.child("script").map(|s| ScriptElement {
            kind: s.attribute("type").unwrap_or("rhai").to_owned(),
            source: s.text().to_owned(),
        });

        let array = e.child("array").map(|a| ArrayElement {
            entries: tokens(a.text()),
        });

        let dimensions = e
            .child("dimensionDef")
            .map(|d| {
                d.children_named("dim")
                    .map(|dim| {
                        dim.text().parse::<usize>().map_err(|_| {
                            SchemaError::invalid("dimensionDef", format!("bad <dim> \"{}\"", dim.text()))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let uncertainty = e.child("uncertainty").map(parse_uncertainty).transpose()?;

        let perturbation = e
            .child("perturbation")
            .map(|p| {
                Ok::<_, SchemaError>(PerturbationElement {
                    target: p.require_attribute("variableRef")?.to_owned(),
                    effect: p.require_attribute("effect")?.to_owned(),
                })
            })
            .transpose()?;

        Ok(VariableElement {
            name: e.require_attribute("name")?.to_owned(),
            var_id: e.require_attribute("varID")?.to_owned(),
            units: e.attribute("units").unwrap_or("").to_owned(),
            axis_system: e.attribute("axisSystem").map(str::to_owned),
            sign: e.attribute("sign").map(str::to_owned),
            alias: e.attribute("alias").map(str::to_owned),
            symbol: e.attribute("symbol").map(str::to_owned),
            initial_value: attr_f64("initialValue")?,
            min_value: attr_f64("minValue")?,
            max_value: attr_f64("maxValue")?,
            description: e.child("description").map(|d| d.text().to_owned()),
            flags,
            output_scale_factor: e
                .child("outputScaleFactor")
                .map(|s| parse_f64(s, s.text()))
                .transpose()?,
            dimensions,
            calculation,
            script,
            array,
            uncertainty,
            perturbation,
        })
    }
}

fn parse_uncertainty(e: &Element) -> Result<UncertaintyElement, SchemaError> {
    let effect = e.attribute("effect").unwrap_or("additive").to_owned();

    let bounds_of = |pdf: &Element| -> Result<Vec<f64>, SchemaError> {
        pdf.children_named("bounds")
            .map(|b| parse_f64(b, b.text()))
            .collect()
    };

    let pdf = if let Some(normal) = e.child("normalPDF") {
        let num_sigmas = normal
            .attribute("numSigmas")
            .unwrap_or("1")
            .parse::<u32>()
            .map_err(|_| SchemaError::invalid("normalPDF", "bad numSigmas"))?;
        let correlations = normal
            .children_named("correlation")
            .map(|c| {
                Ok::<_, SchemaError>((
                    c.require_attribute("varID")?.to_owned(),
                    parse_f64(c, c.require_attribute("corrCoef")?)?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;
        PdfElement::Normal {
            num_sigmas,
            bounds: bounds_of(normal)?,
            correlations,
        }
    } else if let Some(uniform) = e.child("uniformPDF") {
        PdfElement::Uniform {
            bounds: bounds_of(uniform)?,
        }
    } else {
        return Err(SchemaError::MissingChild {
            parent: "uncertainty".into(),
            name: "normalPDF",
        });
    };

    let bounds = match &pdf {
        PdfElement::Normal { bounds, .. } | PdfElement::Uniform { bounds } => bounds,
    };
    if bounds.is_empty() || bounds.len() > 2 {
        return Err(SchemaError::invalid(
            "uncertainty",
            "expected one or two <bounds> elements",
        ));
    }

    Ok(UncertaintyElement { effect, pdf })
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointElement {
    pub bp_id: String,
    pub values: Vec<f64>,
}

impl BreakpointElement {
    pub fn from_dom(e: &Element) -> Result<BreakpointElement, SchemaError> {
        let vals = e.require_child("bpVals")?;
        Ok(BreakpointElement {
            bp_id: e.require_attribute("bpID")?.to_owned(),
            values: tokens(vals.text())
                .iter()
                .map(|t| parse_f64(vals, t))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
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

#[derive(Debug, Clone, PartialEq)]
pub struct GriddedTableElement {
    pub breakpoint_refs: Vec<String>,
    pub data: TableData,
    /// Uncertainty declared on the table itself, applied at the output of
    /// the dependent variable.
    pub uncertainty: Option<UncertaintyElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionElement {
    pub name: String,
    /// varIDs of the independent variables, outermost dimension first.
    pub independent: Vec<String>,
    /// varID of the dependent variable this table computes.
    pub dependent: String,
    pub table: GriddedTableElement,
}

impl FunctionElement {
    pub fn from_dom(e: &Element) -> Result<FunctionElement, SchemaError> {
        let independent = e
            .children_named("independentVarRef")
            .map(|r| Ok::<_, SchemaError>(r.require_attribute("varID")?.to_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        let dependent = e
            .require_child("dependentVarRef")?
            .require_attribute("varID")?
            .to_owned();

        let defn = e.require_child("functionDefn")?;
        let gridded = defn.require_child("griddedTableDef")?;
        let breakpoint_refs = gridded
            .require_child("breakpointRefs")?
            .children_named("bpRef")
            .map(|r| Ok::<_, SchemaError>(r.require_attribute("bpID")?.to_owned()))
            .collect::<Result<Vec<_>, _>>()?;

        let data_element = gridded.require_child("dataTable")?;
        let raw = tokens(data_element.text());
        let data = if data_element.attribute("type") == Some("string") {
            TableData::Strings(raw)
        } else {
            TableData::Numeric(
                raw.iter()
                    .map(|t| parse_f64(data_element, t))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        };

        Ok(FunctionElement {
            name: e.attribute("name").unwrap_or("").to_owned(),
            independent,
            dependent,
            table: GriddedTableElement {
                breakpoint_refs,
                data,
                uncertainty: gridded.child("uncertainty").map(parse_uncertainty).transpose()?,
            },
        })
    }
}

/// The parsed top-level `<DAVEfunc>` document.
#[derive(Debug, Clone, PartialEq)]
pub struct DaveFunc {
    pub variables: Vec<VariableElement>,
    pub breakpoints: Vec<BreakpointElement>,
    pub functions: Vec<FunctionElement>,
}

impl DaveFunc {
    pub fn from_dom(root: &Element) -> Result<DaveFunc, SchemaError> {
        if root.name != "DAVEfunc" {
            return Err(SchemaError::WrongRoot {
                expected: "DAVEfunc",
            });
        }
        Ok(DaveFunc {
            variables: root
                .children_named("variableDef")
                .map(VariableElement::from_dom)
                .collect::<Result<Vec<_>, _>>()?,
            breakpoints: root
                .children_named("breakpointDef")
                .map(BreakpointElement::from_dom)
                .collect::<Result<Vec<_>, _>>()?,
            functions: root
                .children_named("function")
                .map(FunctionElement::from_dom)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::XmlDoc;

    #[test]
    fn variable_with_bounds_and_flags() {
        let doc = XmlDoc::parse(
            r#"<variableDef name="angle of attack" varID="alpha" units="deg"
                            initialValue="2.0" minValue="-10" maxValue="25">
                 <description>body-axis incidence</description>
                 <isInput/>
                 <isStdAIAA/>
               </variableDef>"#,
        )
        .unwrap();
        let v = VariableElement::from_dom(&doc.root).unwrap();
        assert_eq!(v.var_id, "alpha");
        assert_eq!(v.initial_value, Some(2.0));
        assert_eq!(v.min_value, Some(-10.0));
        assert!(v.flags.is_input);
        assert!(v.flags.is_std_aiaa);
        assert!(!v.flags.is_state);
    }

    #[test]
    fn gridded_function_table() {
        let doc = XmlDoc::parse(
            r#"<function name="CLvsAlpha">
                 <independentVarRef varID="alpha"/>
                 <dependentVarRef varID="CL"/>
                 <functionDefn>
                   <griddedTableDef>
                     <breakpointRefs><bpRef bpID="ALPHA1"/></breakpointRefs>
                     <dataTable>0.0, 0.2, 0.4</dataTable>
                   </griddedTableDef>
                 </functionDefn>
               </function>"#,
        )
        .unwrap();
        let f = FunctionElement::from_dom(&doc.root).unwrap();
        assert_eq!(f.independent, vec!["alpha"]);
        assert_eq!(f.dependent, "CL");
        assert_eq!(f.table.data, TableData::Numeric(vec![0.0, 0.2, 0.4]));
    }

    #[test]
    fn uncertainty_normal_pdf() {
        let doc = XmlDoc::parse(
            r#"<uncertainty effect="additive">
                 <normalPDF numSigmas="3">
                   <bounds>1.5</bounds>
                   <correlation varID="beta" corrCoef="0.4"/>
                 </normalPDF>
               </uncertainty>"#,
        )
        .unwrap();
        let u = parse_uncertainty(&doc.root).unwrap();
        assert_eq!(u.effect, "additive");
        match u.pdf {
            PdfElement::Normal {
                num_sigmas,
                bounds,
                correlations,
            } => {
                assert_eq!(num_sigmas, 3);
                assert_eq!(bounds, vec![1.5]);
                assert_eq!(correlations, vec![("beta".to_owned(), 0.4)]);
            }
            _ => panic!("expected a normal PDF"),
        }
    }
}
