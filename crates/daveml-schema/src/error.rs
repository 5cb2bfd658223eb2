use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("missing attribute \"{name}\" on <{element}>")]
    MissingAttribute { element: String, name: &'static str },

    #[error("missing <{name}> inside <{parent}>")]
    MissingChild { parent: String, name: &'static str },

    #[error("<{element}>: {detail}")]
    Invalid { element: String, detail: String },

    #[error("\"{text}\" does not parse as a number")]
    NotNumeric { text: String },

    #[error("document root is not <{expected}>")]
    WrongRoot { expected: &'static str },
}

impl SchemaError {
    pub fn invalid(element: impl Into<String>, detail: impl Into<String>) -> Self {
        SchemaError::Invalid {
            element: element.into(),
            detail: detail.into(),
        }
    }
}

impl From<quick_xml::Error> for SchemaError {
    fn from(e: quick_xml::Error) -> Self {
        SchemaError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SchemaError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        SchemaError::Xml(e.to_string())
    }
}
