use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two outcomes a caller can observe from a failed build or validation
#[derive(Error, Debug)]
pub enum XmlError {
    /// Parse errors, schema compilation errors, I/O errors, unsupported
    /// source/result pairings and every other unexpected fault
    #[error("{message}")]
    Processing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// Parsing and schema compilation succeeded but the document breaks one
    /// or more schema constraints
    #[error("XSD schema validation errors: {0}")]
    SchemaViolation(ViolationList),
}

impl XmlError {
    /// Create a processing failure without an underlying cause
    pub fn processing(message: impl Into<String>) -> Self {
        XmlError::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processing failure that keeps the underlying cause
    pub fn processing_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        XmlError::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this is a processing failure
    pub fn is_processing(&self) -> bool {
        matches!(self, XmlError::Processing { .. })
    }

    /// Check if this is a schema violation
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, XmlError::SchemaViolation(_))
    }

    /// The collected violations, if this is a schema violation
    pub fn violations(&self) -> Option<&ViolationList> {
        match self {
            XmlError::SchemaViolation(list) => Some(list),
            XmlError::Processing { .. } => None,
        }
    }
}

impl From<std::io::Error> for XmlError {
    fn from(err: std::io::Error) -> Self {
        XmlError::Processing {
            message: format!("IO error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<LibXml2Error> for XmlError {
    fn from(err: LibXml2Error) -> Self {
        XmlError::Processing {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Severity of a diagnostic reported by libxml2
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Map an `xmlErrorLevel` value; `XML_ERR_NONE` has no severity
    pub(crate) fn from_level(level: i32) -> Option<Self> {
        match level {
            1 => Some(Severity::Warning),
            2 => Some(Severity::Error),
            3 => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
            Severity::Fatal => f.write_str("fatal"),
        }
    }
}

/// A single schema constraint breach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    pub line: Option<u32>,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Ordered violations of one validation run; never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ViolationList(Vec<Violation>);

impl ViolationList {
    /// Wrap the collected violations, or `None` when nothing was collected
    pub fn new(violations: Vec<Violation>) -> Option<Self> {
        if violations.is_empty() {
            None
        } else {
            Some(ViolationList(violations))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    /// The bare messages, in the order libxml2 reported them
    pub fn messages(&self) -> Vec<&str> {
        self.0.iter().map(|v| v.message.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<Violation> {
        self.0
    }
}

impl fmt::Display for ViolationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ViolationList {
    type Item = &'a Violation;
    type IntoIter = std::slice::Iter<'a, Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// LibXML2-specific error types
///
/// These never leave the crate's public entry points; they are folded into
/// [`XmlError::Processing`] and stay reachable through `source()`.
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("Parser context creation failed")]
    ParserContextCreationFailed,

    #[error("Malformed XML: {details}")]
    DocumentParseFailed { details: String },

    #[error("Schema compilation failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Schema validation internal error (code {code}): {details}")]
    ValidationInternal { code: i32, details: String },

    #[error("Text reader creation failed")]
    ReaderCreationFailed,

    #[error("Attaching the schema to the text reader failed")]
    ReaderSchemaRejected,

    #[error("Document copy failed")]
    DocumentCopyFailed,

    #[error("Document serialization failed")]
    SerializationFailed,

    #[error("Input of {size} bytes exceeds the libxml2 buffer limit")]
    InputTooLarge { size: usize },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, XmlError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(line: Option<u32>, message: &str) -> Violation {
        Violation {
            severity: Severity::Error,
            line,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_violation_list_rejects_empty() {
        assert!(ViolationList::new(Vec::new()).is_none());

        let list = ViolationList::new(vec![violation(Some(3), "bad")]).unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list.is_empty());
    }

    #[test]
    fn test_schema_violation_display() {
        let list = ViolationList::new(vec![
            violation(Some(3), "Element 'Person': The attribute 'Name' is required but missing."),
            violation(None, "Element 'Age': 'abc' is not a valid value."),
        ])
        .unwrap();
        let error = XmlError::SchemaViolation(list);

        let display = error.to_string();
        assert!(display.starts_with("XSD schema validation errors: "));
        assert!(display.contains("line 3: Element 'Person'"));
        assert!(display.contains("; Element 'Age'"));
    }

    #[test]
    fn test_violation_messages_keep_order() {
        let list =
            ViolationList::new(vec![violation(Some(1), "first"), violation(Some(9), "second")])
                .unwrap();
        assert_eq!(list.messages(), vec!["first", "second"]);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stream closed");
        let error: XmlError = io_error.into();

        assert!(error.is_processing());
        assert!(error.to_string().contains("stream closed"));
    }

    #[test]
    fn test_libxml2_error_conversion_keeps_source() {
        use std::error::Error;

        let error: XmlError = LibXml2Error::SchemaParseFailed {
            details: "not a schema".to_string(),
        }
        .into();

        assert!(error.is_processing());
        assert!(!error.is_schema_violation());
        assert!(error.violations().is_none());

        let source = error.source().unwrap();
        assert!(source.to_string().contains("Schema compilation failed"));
    }

    #[test]
    fn test_processing_without_source() {
        use std::error::Error;

        let error = XmlError::processing("unsupported source/result combination");
        assert!(error.source().is_none());
        assert_eq!(error.to_string(), "unsupported source/result combination");
    }

    #[test]
    fn test_severity_from_level() {
        assert_eq!(Severity::from_level(0), None);
        assert_eq!(Severity::from_level(1), Some(Severity::Warning));
        assert_eq!(Severity::from_level(2), Some(Severity::Error));
        assert_eq!(Severity::from_level(3), Some(Severity::Fatal));
        assert!(Severity::Fatal > Severity::Error);
    }
}
