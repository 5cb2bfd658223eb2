//! A small read-only DOM over `quick-xml`'s pull parser.
//!
//! The evaluation engine only needs node-child traversal, named-child lookup,
//! attribute retrieval and character data, so the tree keeps exactly that.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::SchemaError;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    text: String,
}

impl Element {
    fn new(name: String) -> Self {
        Element {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn require_attribute(&self, name: &'static str) -> Result<&str, SchemaError> {
        self.attribute(name).ok_or_else(|| SchemaError::MissingAttribute {
            element: self.name.clone(),
            name,
        })
    }

    /// First child with the given element name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn require_child(&self, name: &'static str) -> Result<&Element, SchemaError> {
        self.child(name).ok_or_else(|| SchemaError::MissingChild {
            parent: self.name.clone(),
            name,
        })
    }

    /// All children with the given element name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Concatenated character data (text and CDATA), trimmed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlDoc {
    pub root: Element,
}

impl XmlDoc {
    pub fn parse(source: &str) -> Result<XmlDoc, SchemaError> {
        let mut reader = Reader::from_str(source);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let mut element =
                        Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                    for attr in start.attributes() {
                        let attr = attr?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(|e| SchemaError::Xml(e.to_string()))?
                            .into_owned();
                        element.attributes.push((key, value));
                    }
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let mut element =
                        Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                    for attr in start.attributes() {
                        let attr = attr?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(|e| SchemaError::Xml(e.to_string()))?
                            .into_owned();
                        element.attributes.push((key, value));
                    }
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| SchemaError::Xml("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(
                            &text.unescape().map_err(|e| SchemaError::Xml(e.to_string()))?,
                        );
                    }
                }
                Event::CData(cdata) => {
                    if let Some(top) = stack.last_mut() {
                        top.text
                            .push_str(&String::from_utf8_lossy(cdata.as_ref()));
                    }
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions and
                // doctypes carry nothing the model needs.
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SchemaError::Xml("unterminated element".into()));
        }
        root.map(|root| XmlDoc { root })
            .ok_or_else(|| SchemaError::Xml("document has no root element".into()))
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), SchemaError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(SchemaError::Xml("multiple root elements".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_with_attributes() {
        let doc = XmlDoc::parse(
            r#"<a x="1"><b>hello</b><b y="2"/><c><d>4.5</d></c></a>"#,
        )
        .unwrap();
        assert_eq!(doc.root.name, "a");
        assert_eq!(doc.root.attribute("x"), Some("1"));
        assert_eq!(doc.root.children_named("b").count(), 2);
        assert_eq!(doc.root.child("b").unwrap().text(), "hello");
        assert_eq!(doc.root.child("c").unwrap().child("d").unwrap().text(), "4.5");
    }

    #[test]
    fn cdata_is_character_data() {
        let doc = XmlDoc::parse("<s><![CDATA[a := b + 1;]]></s>").unwrap();
        assert_eq!(doc.root.text(), "a := b + 1;");
    }

    #[test]
    fn unbalanced_document_is_rejected() {
        assert!(XmlDoc::parse("<a><b></a>").is_err());
    }
}
