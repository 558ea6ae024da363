//! Schema Validation Engine
//!
//! One generic operation, [`XsdValidator::validate`], validates any of the three source
//! representations against an XSD schema and hands the result to a sink of the same family:
//!
//! - **Stream**: bytes are parsed into a tree, validated, and optionally serialized back out
//! - **Events**: bytes are validated by libxml2's pull reader while events go to a handler
//! - **Tree**: a copy of an existing [`Document`] is validated and optionally returned
//!
//! Every call compiles the schema, collects diagnostics into its own
//! [`ViolationCollector`] and frees all libxml2 state before returning. Constraint breaches
//! surface as [`XmlError::SchemaViolation`]; everything else is [`XmlError::Processing`].

use std::fmt;
use std::io::{Read, Write};

use crate::config::Config;
use crate::document::Document;
use crate::error::{Result, Violation, ViolationList, XmlError};
use crate::events::{EventHandler, NullHandler};
use crate::libxml2::{CompiledSchema, Diagnostic, LibXml2Wrapper};
use crate::resolver::SchemaResolver;

/// Input to a validation call
pub enum XmlSource<'a> {
    /// Bytes parsed into a tree before validation
    Stream(&'a mut dyn Read),
    /// Bytes validated while streaming through the pull reader
    Events(&'a mut dyn Read),
    /// An existing tree; it is copied, never re-parsed or mutated
    Tree(&'a Document),
}

impl XmlSource<'_> {
    fn kind(&self) -> &'static str {
        match self {
            XmlSource::Stream(_) => "stream",
            XmlSource::Events(_) => "events",
            XmlSource::Tree(_) => "tree",
        }
    }
}

impl fmt::Debug for XmlSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XmlSource::{}", self.kind())
    }
}

/// Where a validated document goes
pub enum ResultSink<'a> {
    /// Serialized UTF-8 text of the validated tree
    Stream(&'a mut dyn Write),
    /// Events of the validated document
    Events(&'a mut dyn EventHandler),
    /// The validated tree itself, returned as [`Validated::Tree`]
    Tree,
}

impl ResultSink<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ResultSink::Stream(_) => "stream",
            ResultSink::Events(_) => "events",
            ResultSink::Tree => "tree",
        }
    }
}

impl fmt::Debug for ResultSink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultSink::{}", self.kind())
    }
}

/// What a successful validation produced
#[derive(Debug)]
pub enum Validated {
    /// No sink was given
    Discarded,
    Stream { bytes_written: usize },
    Events { delivered: usize },
    /// The augmented tree, carrying materialized defaults
    Tree(Document),
}

/// Collects the diagnostics of one validation run
///
/// Error and fatal diagnostics of the validity checker become [`Violation`]s; other
/// error-level diagnostics are faults. Warnings are dropped.
#[derive(Debug, Default)]
pub struct ViolationCollector {
    violations: Vec<Violation>,
    faults: Vec<Diagnostic>,
}

impl ViolationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        if !diagnostic.is_error() {
            return;
        }

        match diagnostic.severity {
            Some(severity) if diagnostic.is_validity() => self.violations.push(Violation {
                severity,
                line: diagnostic.line,
                message: diagnostic.message,
            }),
            _ => self.faults.push(diagnostic),
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn has_faults(&self) -> bool {
        !self.faults.is_empty()
    }

    /// Turn the run into its outcome
    ///
    /// Faults win over violations, so malformed input is never reported as a breach.
    pub fn finish(self) -> Result<()> {
        if !self.faults.is_empty() {
            let details: Vec<String> = self.faults.iter().map(|d| d.to_string()).collect();
            return Err(XmlError::processing(details.join("; ")));
        }

        match ViolationList::new(self.violations) {
            Some(list) => Err(XmlError::SchemaViolation(list)),
            None => Ok(()),
        }
    }
}

impl Extend<Diagnostic> for ViolationCollector {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, diagnostics: I) {
        for diagnostic in diagnostics {
            self.record(diagnostic);
        }
    }
}

/// XSD validator carrying parser, validation and output settings
#[derive(Debug, Clone, Default)]
pub struct XsdValidator {
    config: Config,
}

impl XsdValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate `source` against `xsd`, delivering the document to `result`
    ///
    /// `resolver` answers external schema references; without one, the configured schema
    /// directory is used if any, then libxml2's default resolution.
    pub fn validate(
        &self,
        source: XmlSource<'_>,
        result: Option<ResultSink<'_>>,
        xsd: &[u8],
        resolver: Option<&dyn SchemaResolver>,
    ) -> Result<Validated> {
        check_pairing(&source, result.as_ref())?;

        let wrapper = LibXml2Wrapper::new();
        let fallback = self.config.validation.fallback_resolver();
        let resolver = resolver.or(fallback.as_ref().map(|r| r as &dyn SchemaResolver));
        let schema = wrapper.compile_schema(xsd, resolver)?;

        match source {
            XmlSource::Tree(doc) => {
                let copy = wrapper.copy_document(doc)?;
                self.run_tree(&wrapper, &schema, copy, result)
            }
            XmlSource::Stream(reader) => {
                let bytes = read_all(reader)?;
                let doc = wrapper.parse_document(&bytes, self.config.parser.libxml2_options())?;
                self.run_tree(&wrapper, &schema, doc, result)
            }
            XmlSource::Events(reader) => {
                let bytes = read_all(reader)?;
                self.run_events(&wrapper, &schema, &bytes, result)
            }
        }
    }

    fn run_tree(
        &self,
        wrapper: &LibXml2Wrapper,
        schema: &CompiledSchema,
        mut doc: Document,
        result: Option<ResultSink<'_>>,
    ) -> Result<Validated> {
        let diagnostics = wrapper.validate_document(
            schema,
            &mut doc,
            self.config.validation.materialize_defaults,
        )?;

        let mut collector = ViolationCollector::new();
        collector.extend(diagnostics);
        collector.finish()?;

        match result {
            None => Ok(Validated::Discarded),
            Some(ResultSink::Tree) => Ok(Validated::Tree(doc)),
            Some(ResultSink::Stream(writer)) => {
                let bytes = wrapper.serialize(&doc, self.config.output.indent)?;
                writer.write_all(&bytes)?;
                writer.flush()?;
                Ok(Validated::Stream {
                    bytes_written: bytes.len(),
                })
            }
            Some(ResultSink::Events(_)) => Err(unsupported("tree", "events")),
        }
    }

    fn run_events(
        &self,
        wrapper: &LibXml2Wrapper,
        schema: &CompiledSchema,
        xml: &[u8],
        result: Option<ResultSink<'_>>,
    ) -> Result<Validated> {
        let options = self.config.parser.libxml2_options();

        let (run, keep) = match result {
            Some(ResultSink::Events(handler)) => {
                (wrapper.stream_events(schema, xml, options, handler)?, true)
            }
            None => (
                wrapper.stream_events(schema, xml, options, &mut NullHandler)?,
                false,
            ),
            Some(other) => return Err(unsupported("events", other.kind())),
        };

        let mut collector = ViolationCollector::new();
        collector.extend(run.diagnostics);
        collector.finish()?;

        Ok(if keep {
            Validated::Events {
                delivered: run.delivered,
            }
        } else {
            Validated::Discarded
        })
    }

    /// Validate an XML byte stream and return the validated document as UTF-8 text
    pub fn validate_stream<R: Read>(&self, xml: R, xsd: &[u8]) -> Result<String> {
        self.validate_stream_with(xml, xsd, None)
    }

    pub fn validate_stream_with<R: Read>(
        &self,
        mut xml: R,
        xsd: &[u8],
        resolver: Option<&dyn SchemaResolver>,
    ) -> Result<String> {
        let mut output = Vec::new();
        self.validate(
            XmlSource::Stream(&mut xml),
            Some(ResultSink::Stream(&mut output)),
            xsd,
            resolver,
        )?;
        String::from_utf8(output)
            .map_err(|e| XmlError::processing_with("Validated document is not UTF-8", e))
    }

    /// Validate a tree and return the augmented copy; `doc` is left untouched
    pub fn validate_document(&self, doc: &Document, xsd: &[u8]) -> Result<Document> {
        self.validate_document_with(doc, xsd, None)
    }

    pub fn validate_document_with(
        &self,
        doc: &Document,
        xsd: &[u8],
        resolver: Option<&dyn SchemaResolver>,
    ) -> Result<Document> {
        match self.validate(XmlSource::Tree(doc), Some(ResultSink::Tree), xsd, resolver)? {
            Validated::Tree(validated) => Ok(validated),
            other => Err(XmlError::processing(format!(
                "tree validation produced {:?}",
                other
            ))),
        }
    }

    /// Validate an XML byte stream through the pull reader, forwarding every event to
    /// `handler`; returns the number of events delivered
    pub fn validate_events<R: Read>(
        &self,
        mut xml: R,
        handler: &mut dyn EventHandler,
        xsd: &[u8],
        resolver: Option<&dyn SchemaResolver>,
    ) -> Result<usize> {
        match self.validate(
            XmlSource::Events(&mut xml),
            Some(ResultSink::Events(handler)),
            xsd,
            resolver,
        )? {
            Validated::Events { delivered } => Ok(delivered),
            other => Err(XmlError::processing(format!(
                "event validation produced {:?}",
                other
            ))),
        }
    }
}

fn check_pairing(source: &XmlSource<'_>, result: Option<&ResultSink<'_>>) -> Result<()> {
    match (source, result) {
        (_, None)
        | (XmlSource::Stream(_), Some(ResultSink::Stream(_)))
        | (XmlSource::Events(_), Some(ResultSink::Events(_)))
        | (XmlSource::Tree(_), Some(ResultSink::Tree)) => Ok(()),
        (source, Some(result)) => Err(unsupported(source.kind(), result.kind())),
    }
}

fn unsupported(source: &str, result: &str) -> XmlError {
    XmlError::processing(format!(
        "unsupported source/result combination: {} source with {} result",
        source, result
    ))
}

fn read_all(reader: &mut dyn Read) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// [`XsdValidator::validate`] with default settings
pub fn validate(
    source: XmlSource<'_>,
    result: Option<ResultSink<'_>>,
    xsd: &[u8],
    resolver: Option<&dyn SchemaResolver>,
) -> Result<Validated> {
    XsdValidator::new().validate(source, result, xsd, resolver)
}

pub fn validate_stream<R: Read>(xml: R, xsd: &[u8]) -> Result<String> {
    XsdValidator::new().validate_stream(xml, xsd)
}

pub fn validate_stream_with<R: Read>(
    xml: R,
    xsd: &[u8],
    resolver: Option<&dyn SchemaResolver>,
) -> Result<String> {
    XsdValidator::new().validate_stream_with(xml, xsd, resolver)
}

pub fn validate_document(doc: &Document, xsd: &[u8]) -> Result<Document> {
    XsdValidator::new().validate_document(doc, xsd)
}

pub fn validate_document_with(
    doc: &Document,
    xsd: &[u8],
    resolver: Option<&dyn SchemaResolver>,
) -> Result<Document> {
    XsdValidator::new().validate_document_with(doc, xsd, resolver)
}

pub fn validate_events<R: Read>(
    xml: R,
    handler: &mut dyn EventHandler,
    xsd: &[u8],
    resolver: Option<&dyn SchemaResolver>,
) -> Result<usize> {
    XsdValidator::new().validate_events(xml, handler, xsd, resolver)
}
