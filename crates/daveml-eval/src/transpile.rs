//! The MathML-to-script transpiler: compiles a scalar expression tree to an
//! infix script accepted by the runtime in [`crate::script`]. Trees that
//! touch matrix operators are refused and keep their MathML evaluation.

use std::fmt;

use crate::ast::ExprNode;
use crate::export::VarNamer;

/// The transpiler declined this tree; the variable retains MathML.
#[derive(Debug, Clone, PartialEq)]
pub struct Refused {
    pub tag: &'static str,
}

impl fmt::Display for Refused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operator \"{}\" has no script form", self.tag)
    }
}

pub fn transpile(root: &ExprNode, names: &dyn VarNamer) -> Result<String, Refused> {
    emit(root, names, true)
}

fn emit(node: &ExprNode, names: &dyn VarNamer, first: bool) -> Result<String, Refused> {
    let t = |child: &ExprNode| emit(child, names, false);

    let out = match node.tag() {
        "cn" => float_literal(node.literal),
        "ci" => match node.var_index {
            Some(index) => names.var_id(index),
            None => return Err(Refused { tag: "ci" }),
        },
        "apply" => {
            let inner = t(&node.children[0])?;
            if first {
                inner
            } else {
                format!("( {inner} )")
            }
        }
        "csymbol" => t(&node.children[0])?,

        // Piecewise becomes a chained if-expression; a missing otherwise
        // falls through to NaN like the tree evaluator.
        "piecewise" => {
            let mut parts = Vec::with_capacity(node.children.len());
            for child in &node.children {
                parts.push(t(child)?);
            }
            let mut script = parts.join("\nelse ");
            if node.children.last().map(ExprNode::tag) != Some("otherwise") {
                script.push_str("\nelse { nan() }");
            }
            if first {
                script
            } else {
                format!("( {script} )")
            }
        }
        "piece" => {
            let value = t(&node.children[0])?;
            let condition = t(&node.children[1])?;
            format!("if {condition} {{ {value} }}")
        }
        "otherwise" => format!("{{ {} }}", t(&node.children[0])?),

        "eq" => infix(node, names, " == ")?,
        "neq" => infix(node, names, " != ")?,
        "gt" => infix(node, names, " > ")?,
        "geq" => infix(node, names, " >= ")?,
        "lt" => infix(node, names, " < ")?,
        "leq" => infix(node, names, " <= ")?,

        "and" => infix(node, names, " && ")?,
        "or" => infix(node, names, " || ")?,
        "not" => format!("!( {} )", t(&node.children[0])?),
        // Script xor would change the exactly-one-true semantics.
        "xor" => return Err(Refused { tag: "xor" }),

        "plus" => infix(node, names, " + ")?,
        "minus" => {
            if node.children.len() == 1 {
                format!("-( {} )", t(&node.children[0])?)
            } else {
                infix(node, names, " - ")?
            }
        }
        "times" => infix(node, names, " * ")?,
        "divide" => infix(node, names, " / ")?,
        "power" => call2(node, names, "power")?,
        "root" => {
            if node.children.len() == 1 {
                call1(node, names, "sqrt")?
            } else {
                let degree = t(&node.children[0])?;
                let x = t(&node.children[1])?;
                format!("rootn( {x}, {degree} )")
            }
        }
        "degree" | "logbase" => t(&node.children[0])?,
        "quotient" => call2(node, names, "quot")?,
        "rem" => {
            let a = t(&node.children[0])?;
            let b = t(&node.children[1])?;
            format!("frac( {a} / {b} )")
        }
        "fmod" => call2(node, names, "fmod")?,
        "factorial" => call1(node, names, "fact")?,
        "sign" => call2(node, names, "copysign")?,
        "bound" => {
            let x = t(&node.children[0])?;
            let lo = t(&node.children[1])?;
            let hi = t(&node.children[2])?;
            format!("bound( {x}, {lo}, {hi} )")
        }
        "nearbyint" => call1(node, names, "round_even")?,
        "abs" => call1(node, names, "abs")?,
        "floor" => call1(node, names, "floor")?,
        "ceiling" => call1(node, names, "ceiling")?,
        "min" => fold_call(node, names, "min")?,
        "max" => fold_call(node, names, "max")?,

        "sin" => call1(node, names, "sin")?,
        "cos" => call1(node, names, "cos")?,
        "tan" => call1(node, names, "tan")?,
        "sec" => call1(node, names, "sec")?,
        "csc" => call1(node, names, "csc")?,
        "cot" => call1(node, names, "cot")?,
        "sind" => degree_call(node, names, "sin")?,
        "cosd" => degree_call(node, names, "cos")?,
        "tand" => degree_call(node, names, "tan")?,
        "secd" => degree_call(node, names, "sec")?,
        "cscd" => degree_call(node, names, "csc")?,
        "cotd" => degree_call(node, names, "cot")?,
        "arcsin" => call1(node, names, "asin")?,
        "arccos" => call1(node, names, "acos")?,
        "arctan" => call1(node, names, "atan")?,
        "arcsec" => call1(node, names, "asec")?,
        "arccsc" => call1(node, names, "acsc")?,
        "arccot" => call1(node, names, "acot")?,
        "arcsind" => inverse_degree_call(node, names, "asin")?,
        "arccosd" => inverse_degree_call(node, names, "acos")?,
        "arctand" => inverse_degree_call(node, names, "atan")?,
        "arcsecd" => inverse_degree_call(node, names, "asec")?,
        "arccscd" => inverse_degree_call(node, names, "acsc")?,
        "arccotd" => inverse_degree_call(node, names, "acot")?,
        "atan2" => call2(node, names, "atan2")?,
        "atan2d" => {
            let y = t(&node.children[0])?;
            let x = t(&node.children[1])?;
            format!("rad2deg( atan2( {y}, {x} ) )")
        }

        "exp" => call1(node, names, "exp")?,
        "ln" => call1(node, names, "ln")?,
        "log" => {
            if node.children.len() == 1 {
                call1(node, names, "log10")?
            } else {
                let base = t(&node.children[0])?;
                let x = t(&node.children[1])?;
                format!("logn( {x}, {base} )")
            }
        }

        "pi" => "3.1415926535897932384626433832795".to_owned(),
        "exponentiale" => "2.71828182845905".to_owned(),
        "eulergamma" => "0.57721566490153286".to_owned(),
        "infinity" => "inf()".to_owned(),
        "notanumber" => "nan()".to_owned(),
        "noop" => "0.0".to_owned(),

        // Everything left is a matrix operator with no script form.
        _ => return Err(Refused { tag: node.op.tag }),
    };
    Ok(out)
}

fn infix(node: &ExprNode, names: &dyn VarNamer, separator: &str) -> Result<String, Refused> {
    let mut parts = Vec::with_capacity(node.children.len());
    for child in &node.children {
        parts.push(emit(child, names, false)?);
    }
    Ok(parts.join(separator))
}

fn call1(node: &ExprNode, names: &dyn VarNamer, function: &str) -> Result<String, Refused> {
    Ok(format!("{function}( {} )", emit(&node.children[0], names, false)?))
}

fn call2(node: &ExprNode, names: &dyn VarNamer, function: &str) -> Result<String, Refused> {
    Ok(format!(
        "{function}( {}, {} )",
        emit(&node.children[0], names, false)?,
        emit(&node.children[1], names, false)?
    ))
}

/// Variadic operators fold into nested binary calls.
fn fold_call(node: &ExprNode, names: &dyn VarNamer, function: &str) -> Result<String, Refused> {
    let mut script = emit(&node.children[0], names, false)?;
    for child in &node.children[1..] {
        script = format!("{function}( {script}, {} )", emit(child, names, false)?);
    }
    Ok(script)
}

fn degree_call(node: &ExprNode, names: &dyn VarNamer, function: &str) -> Result<String, Refused> {
    Ok(format!(
        "{function}( deg2rad( {} ) )",
        emit(&node.children[0], names, false)?
    ))
}

fn inverse_degree_call(
    node: &ExprNode,
    names: &dyn VarNamer,
    function: &str,
) -> Result<String, Refused> {
    Ok(format!(
        "rad2deg( {function}( {} ) )",
        emit(&node.children[0], names, false)?
    ))
}

/// Literals must stay float-typed in the script dialect.
fn float_literal(v: f64) -> String {
    let s = format!("{v}");
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        format!("{s}.0")
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_math;
    use daveml_schema::XmlDoc;
    use rustc_hash::FxHashMap;

    fn names() -> impl VarNamer {
        |index: usize| match index {
            0 => "alpha".to_owned(),
            _ => format!("v{index}"),
        }
    }

    fn transpiled(source: &str) -> Result<String, Refused> {
        let doc = XmlDoc::parse(source).unwrap();
        let mut map = FxHashMap::default();
        map.insert("alpha".to_owned(), 0usize);
        let resolver = move |name: &str| map.get(name).copied();
        let tree = parse_math(&doc.root, &resolver).unwrap();
        transpile(&tree, &names())
    }

    #[test]
    fn arithmetic_becomes_infix() {
        let s = transpiled(
            "<math><apply><plus/><apply><times/><cn>2</cn><ci>alpha</ci></apply><cn>3</cn></apply></math>",
        )
        .unwrap();
        assert_eq!(s, "( 2.0 * alpha ) + 3.0");
    }

    #[test]
    fn piecewise_becomes_chained_if() {
        let s = transpiled(
            "<math><piecewise>\
               <piece><cn>1</cn><apply><lt/><ci>alpha</ci><cn>0</cn></apply></piece>\
               <otherwise><cn>2</cn></otherwise>\
             </piecewise></math>",
        )
        .unwrap();
        assert_eq!(s, "if ( alpha < 0.0 ) { 1.0 }\nelse { 2.0 }");
    }

    #[test]
    fn piecewise_without_otherwise_falls_through_to_nan() {
        let s = transpiled(
            "<math><piecewise>\
               <piece><cn>1</cn><apply><lt/><ci>alpha</ci><cn>0</cn></apply></piece>\
             </piecewise></math>",
        )
        .unwrap();
        assert!(s.ends_with("else { nan() }"));
    }

    #[test]
    fn degree_trig_wraps_conversions() {
        let s = transpiled("<math><apply><csymbol>sind</csymbol><ci>alpha</ci></apply></math>")
            .unwrap();
        assert_eq!(s, "sin( deg2rad( alpha ) )");
    }

    #[test]
    fn matrix_operators_are_refused() {
        let refused =
            transpiled("<math><apply><transpose/><ci>alpha</ci></apply></math>").unwrap_err();
        assert_eq!(refused.tag, "transpose");
    }

    #[test]
    fn variadic_min_folds() {
        let s = transpiled(
            "<math><apply><min/><ci>alpha</ci><cn>1</cn><cn>2</cn></apply></math>",
        )
        .unwrap();
        assert_eq!(s, "min( min( alpha, 1.0 ), 2.0 )");
    }
}
