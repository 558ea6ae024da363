//! # xsd-dom Library
//!
//! Build namespace-aware XML trees and validate them, or XML byte streams, against XSD
//! schemas through libxml2. Every violation found in a run is collected and reported in a
//! single [`XmlError::SchemaViolation`].

pub mod builder;
pub mod config;
pub mod document;
pub mod error;
pub mod error_reporter;
pub mod events;
mod libxml2;
pub mod resolver;
pub mod validator;

pub use builder::{DocumentBuilder, build, build_with_resolver, build_with_schema};
pub use config::{
    Config, ConfigError, ConfigManager, EnvProvider, OutputConfig, OutputFormatConfig,
    ParserConfig, SystemEnvProvider, ValidationConfig, VerbosityConfig,
};
pub use document::{Attribute, Document, Node, QualifiedName};
pub use error::{Result, Severity, Violation, ViolationList, XmlError};
pub use error_reporter::{ErrorReport, ErrorReporter, VerbosityLevel};
pub use events::{EventHandler, FnHandler, NullHandler, XmlEvent};
pub use libxml2::Diagnostic;
pub use resolver::{DirectoryResolver, MemoryResolver, ResourceRequest, SchemaResolver};
pub use validator::{
    ResultSink, Validated, ViolationCollector, XmlSource, XsdValidator, validate,
    validate_document, validate_document_with, validate_events, validate_stream,
    validate_stream_with,
};
