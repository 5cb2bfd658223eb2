//! The exporter: walks an expression tree back out to content MathML. The
//! output parses back into a structurally identical tree.

use quick_xml::escape::escape;

use crate::ast::ExprNode;
use crate::ops::ExportStyle;

/// varID lookup for `ci` leaves.
pub trait VarNamer {
    fn var_id(&self, index: usize) -> String;
}

impl<F> VarNamer for F
where
    F: Fn(usize) -> String,
{
    fn var_id(&self, index: usize) -> String {
        self(index)
    }
}

/// Minimal XML emitter; the exporter only needs elements, attributes and
/// character data.
pub struct XmlText {
    out: String,
}

impl XmlText {
    pub fn new() -> Self {
        XmlText { out: String::new() }
    }

    pub fn open(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.out.push('<');
        self.out.push_str(name);
        self.push_attrs(attrs);
        self.out.push('>');
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.out.push('<');
        self.out.push_str(name);
        self.push_attrs(attrs);
        self.out.push_str("/>");
    }

    pub fn close(&mut self, name: &str) {
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    pub fn text(&mut self, text: &str) {
        self.out.push_str(&escape(text));
    }

    /// Splice in already-serialised XML.
    pub fn raw(&mut self, xml: &str) {
        self.out.push_str(xml);
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn push_attrs(&mut self, attrs: &[(&str, &str)]) {
        for (key, value) in attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&escape(*value));
            self.out.push('"');
        }
    }
}

impl Default for XmlText {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialise a tree as a complete `<math>` element.
pub fn export_math(root: &ExprNode, names: &dyn VarNamer) -> String {
    let mut w = XmlText::new();
    w.open("math", &[]);
    export_node(root, names, &mut w);
    w.close("math");
    w.finish()
}

fn export_node(node: &ExprNode, names: &dyn VarNamer, w: &mut XmlText) {
    match node.op.export {
        ExportStyle::Number => {
            w.open("cn", &[]);
            w.text(&format_number(node.literal));
            w.close("cn");
        }
        ExportStyle::Identifier => {
            let var_id = node.var_index.map(|i| names.var_id(i)).unwrap_or_default();
            w.open("ci", &[]);
            w.text(&var_id);
            w.close("ci");
        }
        ExportStyle::Apply => {
            w.open("apply", &[]);
            export_node(&node.children[0], names, w);
            w.close("apply");
        }
        ExportStyle::Siblings => {
            w.empty(node.op.tag, &[]);
            for child in &node.children {
                export_node(child, names, w);
            }
        }
        ExportStyle::Sibling => {
            w.empty(node.op.tag, &[]);
            export_node(&node.children[0], names, w);
        }
        ExportStyle::Children => {
            w.open(node.op.tag, &[]);
            for child in &node.children {
                export_node(child, names, w);
            }
            w.close(node.op.tag);
        }
        ExportStyle::Child => {
            w.open(node.op.tag, &[]);
            export_node(&node.children[0], names, w);
            w.close(node.op.tag);
        }
        ExportStyle::Csymbol => {
            match node.attribute.as_deref() {
                Some(cd) => w.open("csymbol", &[("cd", cd)]),
                None => w.open("csymbol", &[]),
            }
            w.text(node.op.tag);
            w.close("csymbol");
            for child in &node.children {
                export_node(child, names, w);
            }
        }
        ExportStyle::Selector => {
            let other = node.attribute.as_deref().unwrap_or("element");
            w.empty("selector", &[("other", other)]);
            for child in &node.children {
                export_node(child, names, w);
            }
        }
        ExportStyle::Mask => {
            let kind = node.attribute.as_deref().unwrap_or("times");
            w.open("csymbol", &[("type", kind)]);
            w.text("mask");
            w.close("csymbol");
            for child in &node.children {
                export_node(child, names, w);
            }
        }
    }
}

fn format_number(v: f64) -> String {
    // `{}` on f64 prints the shortest representation that parses back to the
    // same double.
    format!("{v}")
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
            1 => "beta".to_owned(),
            _ => format!("v{index}"),
        }
    }

    fn resolver() -> impl Fn(&str) -> Option<usize> {
        let mut map = FxHashMap::default();
        map.insert("alpha".to_owned(), 0usize);
        map.insert("beta".to_owned(), 1usize);
        move |name: &str| map.get(name).copied()
    }

    fn roundtrip(source: &str) {
        let doc = XmlDoc::parse(source).unwrap();
        let tree = parse_math(&doc.root, &resolver()).unwrap();
        let exported = export_math(&tree, &names());
        let reparsed_doc = XmlDoc::parse(&exported).unwrap();
        let reparsed = parse_math(&reparsed_doc.root, &resolver()).unwrap();
        assert_eq!(tree, reparsed, "round-trip changed the tree: {exported}");
    }

    #[test]
    fn roundtrip_arithmetic() {
        roundtrip("<math><apply><plus/><ci>alpha</ci><cn>2.5</cn></apply></math>");
        roundtrip("<math><apply><minus/><ci>alpha</ci></apply></math>");
        roundtrip(
            "<math><apply><divide/><apply><times/><ci>alpha</ci><ci>beta</ci></apply><cn>3</cn></apply></math>",
        );
    }

    #[test]
    fn roundtrip_piecewise() {
        roundtrip(
            "<math><piecewise>\
               <piece><apply><times/><cn>2</cn><ci>alpha</ci></apply>\
                 <apply><lt/><ci>alpha</ci><cn>0</cn></apply></piece>\
               <otherwise><cn>100</cn></otherwise>\
             </piecewise></math>",
        );
    }

    #[test]
    fn roundtrip_csymbol_and_selector() {
        roundtrip("<math><apply><csymbol cd='atrig'>sind</csymbol><cn>30</cn></apply></math>");
        roundtrip("<math><apply><csymbol>atan2d</csymbol><cn>1</cn><cn>1</cn></apply></math>");
        roundtrip(
            "<math><apply><selector other='element'/><ci>alpha</ci><cn>1</cn><cn>2</cn></apply></math>",
        );
        roundtrip(
            "<math><apply><csymbol type='plus'>mask</csymbol><ci>alpha</ci><ci>beta</ci></apply></math>",
        );
    }

    #[test]
    fn roundtrip_matrix_operators() {
        roundtrip("<math><apply><transpose/><ci>alpha</ci></apply></math>");
        roundtrip(
            "<math><apply><root/><degree><cn>3</cn></degree><ci>alpha</ci></apply></math>",
        );
        roundtrip(
            "<math><apply><log/><logbase><cn>2</cn></logbase><ci>alpha</ci></apply></math>",
        );
    }
}
