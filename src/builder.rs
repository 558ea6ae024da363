//! Document construction
//!
//! Parses XML bytes into a namespace-aware [`Document`] and optionally runs the result through
//! the [`XsdValidator`], returning the augmented tree.

use std::io::Read;

use crate::config::{Config, ParserConfig, ValidationConfig};
use crate::document::Document;
use crate::error::Result;
use crate::libxml2::LibXml2Wrapper;
use crate::resolver::SchemaResolver;
use crate::validator::XsdValidator;

/// Builds documents with a fixed set of parser and validation options
#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    config: Config,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn parser_config(mut self, parser: ParserConfig) -> Self {
        self.config.parser = parser;
        self
    }

    pub fn validation_config(mut self, validation: ValidationConfig) -> Self {
        self.config.validation = validation;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse `xml` into a namespace-aware tree
    pub fn build<R: Read>(&self, mut xml: R) -> Result<Document> {
        let mut bytes = Vec::new();
        xml.read_to_end(&mut bytes)?;

        let document = LibXml2Wrapper::new()
            .parse_document(&bytes, self.config.parser.libxml2_options())?;
        Ok(document)
    }

    /// Parse `xml` and validate it against `xsd`
    pub fn build_with_schema<R: Read>(&self, xml: R, xsd: &[u8]) -> Result<Document> {
        self.build_with_resolver(xml, xsd, None)
    }

    /// Parse `xml`, validate it against `xsd` and return the augmented tree
    ///
    /// Parse failures are reported before the schema is even compiled.
    pub fn build_with_resolver<R: Read>(
        &self,
        xml: R,
        xsd: &[u8],
        resolver: Option<&dyn SchemaResolver>,
    ) -> Result<Document> {
        let document = self.build(xml)?;
        XsdValidator::with_config(self.config.clone()).validate_document_with(
            &document,
            xsd,
            resolver,
        )
    }
}

/// [`DocumentBuilder::build`] with default settings
pub fn build<R: Read>(xml: R) -> Result<Document> {
    DocumentBuilder::new().build(xml)
}

pub fn build_with_schema<R: Read>(xml: R, xsd: &[u8]) -> Result<Document> {
    DocumentBuilder::new().build_with_schema(xml, xsd)
}

pub fn build_with_resolver<R: Read>(
    xml: R,
    xsd: &[u8],
    resolver: Option<&dyn SchemaResolver>,
) -> Result<Document> {
    DocumentBuilder::new().build_with_resolver(xml, xsd, resolver)
}
