//! The MathML parser: lifts a content-MathML DOM subtree into an expression
//! tree, enforcing per-operator arity and binding `ci` leaves to variables.

use daveml_schema::Element;

use crate::ast::ExprNode;
use crate::error::ParseError;
use crate::ops::{self, Arity, ChildSource, Operator};

/// Resolves a `ci` identifier to a variable index. The model supplies a
/// closure over its varID table; parse-time tests supply maps.
pub trait VarResolver {
    fn resolve(&self, var_id: &str) -> Option<usize>;
}

impl<F> VarResolver for F
where
    F: Fn(&str) -> Option<usize>,
{
    fn resolve(&self, var_id: &str) -> Option<usize> {
        self(var_id)
    }
}

/// Parse the single expression under a `<math>` element.
pub fn parse_math(math: &Element, resolver: &dyn VarResolver) -> Result<ExprNode, ParseError> {
    if math.children.len() != 1 {
        return Err(ParseError::MalformedMath);
    }
    parse_element(&math.children[0], &[], resolver)
}

/// Parse one MathML element. `trailing` holds the element's following
/// siblings, consumed by operators whose operands are peers under `apply`.
pub fn parse_element(
    element: &Element,
    trailing: &[Element],
    resolver: &dyn VarResolver,
) -> Result<ExprNode, ParseError> {
    match element.name.as_str() {
        "cn" => parse_cn(element),
        "ci" => parse_ci(element, resolver),
        "apply" => parse_apply(element, resolver),
        "csymbol" => {
            // The concrete operator tag is the character data; the annotation
            // comes from `cd`, `definitionURL` or `type`, in that order.
            let attribute = element
                .attribute("cd")
                .or_else(|| element.attribute("definitionURL"))
                .or_else(|| element.attribute("type"))
                .filter(|a| !a.is_empty())
                .map(str::to_owned);
            let tag = element.text().to_owned();
            if tag == "mask" {
                let kind = attribute.as_deref().unwrap_or("times").to_owned();
                return parse_operator(
                    &format!("mask_{kind}"),
                    Some(kind),
                    element,
                    trailing,
                    resolver,
                );
            }
            parse_operator(&tag, attribute, element, trailing, resolver)
        }
        "selector" => {
            let kind = element.attribute("other").unwrap_or("element").to_owned();
            parse_operator(
                &format!("selector_{kind}"),
                Some(kind),
                element,
                trailing,
                resolver,
            )
        }
        name => parse_operator(name, None, element, trailing, resolver),
    }
}

fn parse_cn(element: &Element) -> Result<ExprNode, ParseError> {
    let text = element.text();
    let literal = text
        .parse::<f64>()
        .map_err(|_| ParseError::NotNumeric {
            text: text.to_owned(),
        })?;
    let mut node = ExprNode::new(required_op("cn"));
    node.literal = literal;
    Ok(node)
}

fn parse_ci(element: &Element, resolver: &dyn VarResolver) -> Result<ExprNode, ParseError> {
    let name = element.text();
    let index = resolver
        .resolve(name)
        .ok_or_else(|| ParseError::UnboundIdentifier {
            name: name.to_owned(),
        })?;
    let mut node = ExprNode::new(required_op("ci"));
    node.var_index = Some(index);
    Ok(node)
}

fn parse_apply(element: &Element, resolver: &dyn VarResolver) -> Result<ExprNode, ParseError> {
    let Some((operator, trailing)) = element.children.split_first() else {
        return Err(ParseError::ArityMismatch {
            tag: "apply".to_owned(),
            found: 0,
        });
    };
    let child = parse_element(operator, trailing, resolver)?;
    let mut node = ExprNode::new(required_op("apply"));
    node.ret = child.ret;
    node.children.push(child);
    Ok(node)
}

fn parse_operator(
    tag: &str,
    attribute: Option<String>,
    element: &Element,
    trailing: &[Element],
    resolver: &dyn VarResolver,
) -> Result<ExprNode, ParseError> {
    let op = ops::lookup(tag).ok_or_else(|| ParseError::UnsupportedTag {
        tag: tag.to_owned(),
    })?;

    let operands: Vec<&Element> = match op.source {
        ChildSource::Siblings => trailing.iter().collect(),
        ChildSource::Children => element.children.iter().collect(),
    };
    check_arity(op, operands.len())?;

    let mut node = ExprNode::new(op);
    node.attribute = attribute;
    for operand in operands {
        node.children.push(parse_element(operand, &[], resolver)?);
    }
    Ok(node)
}

fn check_arity(op: &Operator, found: usize) -> Result<(), ParseError> {
    // Constants take no operands and ignore stray siblings the way the DTD
    // allows them to appear inside an apply.
    if matches!(op.arity, Arity::Exact(0)) {
        return Ok(());
    }
    if !op.arity.accepts(found) {
        return Err(ParseError::ArityMismatch {
            tag: op.tag.to_owned(),
            found,
        });
    }
    Ok(())
}

fn required_op(tag: &'static str) -> &'static Operator {
    // The static table carries every structural tag; a miss here is a broken
    // build, not a data error.
    ops::lookup(tag).unwrap_or_else(|| panic!("operator table is missing \"{tag}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::RetType;
    use daveml_schema::XmlDoc;
    use rustc_hash::FxHashMap;

    fn resolver() -> impl VarResolver {
        let mut map = FxHashMap::default();
        map.insert("alpha".to_owned(), 0usize);
        map.insert("beta".to_owned(), 1usize);
        move |name: &str| map.get(name).copied()
    }

    fn parse(s: &str) -> Result<ExprNode, ParseError> {
        let doc = XmlDoc::parse(s).unwrap();
        parse_math(&doc.root, &resolver())
    }

    #[test]
    fn plus_under_apply_takes_siblings() {
        let node = parse("<math><apply><plus/><ci>alpha</ci><cn>2.5</cn></apply></math>").unwrap();
        assert_eq!(node.tag(), "apply");
        let plus = &node.children[0];
        assert_eq!(plus.tag(), "plus");
        assert_eq!(plus.children.len(), 2);
        assert_eq!(plus.children[0].var_index, Some(0));
        assert_eq!(plus.children[1].literal, 2.5);
    }

    #[test]
    fn piecewise_reads_its_own_children() {
        let node = parse(
            "<math><piecewise>\
               <piece><cn>1</cn><apply><lt/><ci>alpha</ci><cn>0</cn></apply></piece>\
               <otherwise><cn>2</cn></otherwise>\
             </piecewise></math>",
        )
        .unwrap();
        assert_eq!(node.tag(), "piecewise");
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].tag(), "piece");
        assert_eq!(node.children[1].tag(), "otherwise");
        let predicate = &node.children[0].children[1];
        assert_eq!(predicate.ret, RetType::Bool);
    }

    #[test]
    fn csymbol_resolves_to_its_cdata_tag() {
        let node =
            parse("<math><apply><csymbol cd='atrig'>sind</csymbol><cn>30</cn></apply></math>")
                .unwrap();
        let sind = &node.children[0];
        assert_eq!(sind.tag(), "sind");
        assert_eq!(sind.attribute.as_deref(), Some("atrig"));
        assert_eq!(sind.children.len(), 1);
    }

    #[test]
    fn selector_other_attribute_picks_the_variant() {
        let node = parse(
            "<math><apply><selector other='row'/><ci>alpha</ci><cn>1</cn></apply></math>",
        )
        .unwrap();
        assert_eq!(node.children[0].tag(), "selector_row");
    }

    #[test]
    fn mask_defaults_to_times() {
        let node = parse(
            "<math><apply><csymbol>mask</csymbol><ci>alpha</ci><ci>beta</ci></apply></math>",
        )
        .unwrap();
        assert_eq!(node.children[0].tag(), "mask_times");
    }

    #[test]
    fn arity_violations_are_rejected() {
        let err = parse("<math><apply><divide/><cn>1</cn></apply></math>").unwrap_err();
        assert!(matches!(err, ParseError::ArityMismatch { .. }));

        let err = parse(
            "<math><apply><selector other='row'/><ci>alpha</ci><cn>1</cn><cn>2</cn></apply></math>",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::ArityMismatch { .. }));
    }

    #[test]
    fn unknown_tags_and_identifiers_are_rejected() {
        assert!(matches!(
            parse("<math><apply><frobnicate/><cn>1</cn></apply></math>").unwrap_err(),
            ParseError::UnsupportedTag { .. }
        ));
        assert!(matches!(
            parse("<math><ci>gamma</ci></math>").unwrap_err(),
            ParseError::UnboundIdentifier { .. }
        ));
    }

    #[test]
    fn bad_number_literals_are_rejected() {
        assert!(matches!(
            parse("<math><cn>alpha</cn></math>").unwrap_err(),
            ParseError::NotNumeric { .. }
        ));
    }

    #[test]
    fn math_must_hold_exactly_one_expression() {
        assert!(matches!(
            parse("<math><cn>1</cn><cn>2</cn></math>").unwrap_err(),
            ParseError::MalformedMath
        ));
    }

    #[test]
    fn root_accepts_one_or_two_operands() {
        let sqrt = parse("<math><apply><root/><cn>9</cn></apply></math>").unwrap();
        assert_eq!(sqrt.children[0].children.len(), 1);

        let cbrt = parse(
            "<math><apply><root/><degree><cn>3</cn></degree><cn>8</cn></apply></math>",
        )
        .unwrap();
        let root = &cbrt.children[0];
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].tag(), "degree");
    }
}
