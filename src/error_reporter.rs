use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{OutputConfig, OutputFormatConfig, VerbosityConfig};
use crate::error::{Violation, XmlError};

/// Verbosity levels for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    /// Only show a one-line summary
    Quiet,
    /// Show the error message
    Normal,
    /// Show every violation with its line
    Verbose,
    /// Show all available debugging information
    Debug,
}

impl From<VerbosityConfig> for VerbosityLevel {
    fn from(verbosity: VerbosityConfig) -> Self {
        match verbosity {
            VerbosityConfig::Quiet => VerbosityLevel::Quiet,
            VerbosityConfig::Normal => VerbosityLevel::Normal,
            VerbosityConfig::Verbose => VerbosityLevel::Verbose,
            VerbosityConfig::Debug => VerbosityLevel::Debug,
        }
    }
}

/// Machine-readable form of an [`XmlError`]
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Renders errors for people or tools; nothing is printed unless [`ErrorReporter::report`]
/// is called
pub struct ErrorReporter {
    verbosity: VerbosityLevel,
    format: OutputFormatConfig,
    show_timestamps: bool,
}

impl ErrorReporter {
    /// Create a new error reporter with specified verbosity
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            format: OutputFormatConfig::Human,
            show_timestamps: false,
        }
    }

    /// Create a new error reporter with additional options
    pub fn with_options(
        verbosity: VerbosityLevel,
        format: OutputFormatConfig,
        show_timestamps: bool,
    ) -> Self {
        Self {
            verbosity,
            format,
            show_timestamps,
        }
    }

    /// Create a reporter from the output section of a [`crate::Config`]
    pub fn from_config(output: &OutputConfig) -> Self {
        Self::with_options(output.verbosity.into(), output.format, false)
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    /// Print the formatted error to stderr
    pub fn report(&self, error: &XmlError) {
        eprintln!("{}", self.format_error(error));
    }

    /// Format an error in the configured format
    pub fn format_error(&self, error: &XmlError) -> String {
        match self.format {
            OutputFormatConfig::Human => self.format_human(error),
            OutputFormatConfig::Json => self.format_json(error),
        }
    }

    /// Structured view of an error
    pub fn error_report(&self, error: &XmlError) -> ErrorReport {
        let (kind, violations) = match error {
            XmlError::Processing { .. } => ("processing", Vec::new()),
            XmlError::SchemaViolation(list) => ("schema_violation", list.iter().cloned().collect()),
        };

        ErrorReport {
            kind,
            message: error.to_string(),
            violations,
            causes: error_chain(error),
            timestamp: self.show_timestamps.then(Utc::now),
        }
    }

    fn format_json(&self, error: &XmlError) -> String {
        let report = self.error_report(error);
        serde_json::to_string_pretty(&report).unwrap_or_else(|e| {
            format!(
                "{{\"kind\":\"{}\",\"message\":\"serialization failed: {}\"}}",
                report.kind, e
            )
        })
    }

    fn format_human(&self, error: &XmlError) -> String {
        match self.verbosity {
            VerbosityLevel::Quiet => self.format_error_brief(error),
            VerbosityLevel::Normal => self.format_error_normal(error),
            VerbosityLevel::Verbose => self.format_error_verbose(error),
            VerbosityLevel::Debug => self.format_error_debug(error),
        }
    }

    /// Format error for brief output (quiet mode)
    fn format_error_brief(&self, error: &XmlError) -> String {
        match error {
            XmlError::SchemaViolation(list) => {
                format!(
                    "INVALID: {} violation{}",
                    list.len(),
                    if list.len() == 1 { "" } else { "s" }
                )
            }
            XmlError::Processing { .. } => "ERROR: processing failed".to_string(),
        }
    }

    /// Format error for normal output
    fn format_error_normal(&self, error: &XmlError) -> String {
        let timestamp = if self.show_timestamps {
            format!("[{}] ", Utc::now().format("%H:%M:%S"))
        } else {
            String::new()
        };

        format!("{}{}", timestamp, error)
    }

    /// Format error for verbose output
    fn format_error_verbose(&self, error: &XmlError) -> String {
        let mut output = self.format_error_normal(error);

        match error {
            XmlError::SchemaViolation(list) => {
                for violation in list {
                    output.push_str(&format!("\n  [{}] {}", violation.severity, violation));
                }
                output.push_str("\nSuggestion: Check the document against the schema constraints");
            }
            XmlError::Processing { .. } => {
                output.push_str(
                    "\nSuggestion: Check XML well-formedness and that every schema reference resolves",
                );
            }
        }

        output
    }

    /// Format error for debug output
    fn format_error_debug(&self, error: &XmlError) -> String {
        let mut output = self.format_error_verbose(error);
        output.push_str(&format!("\nDebug Info: {:?}", error));

        output.push_str("\nError Chain:");
        for (level, cause) in error_chain(error).iter().enumerate() {
            output.push_str(&format!("\n  {}: {}", level + 1, cause));
        }

        output
    }
}

fn error_chain(error: &XmlError) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current: &dyn std::error::Error = error;
    while let Some(source) = current.source() {
        causes.push(source.to_string());
        current = source;
    }
    causes
}
