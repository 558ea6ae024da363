use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use libc::c_int;

use crate::libxml2::{XML_PARSE_HUGE, XML_PARSE_NOBLANKS, XML_PARSE_NONET};
use crate::resolver::DirectoryResolver;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Library configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub parser: ParserConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
}

/// Options handed to the libxml2 parser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ParserConfig {
    /// Let libxml2 fetch external resources over the network
    pub allow_network: bool,
    /// Drop whitespace-only text nodes
    pub strip_blank_text: bool,
    /// Lift libxml2's hardcoded size and depth limits
    pub huge_documents: bool,
}

impl ParserConfig {
    /// The equivalent `xmlParserOption` bit set
    pub fn libxml2_options(&self) -> c_int {
        let mut options = 0;
        if !self.allow_network {
            options |= XML_PARSE_NONET;
        }
        if self.strip_blank_text {
            options |= XML_PARSE_NOBLANKS;
        }
        if self.huge_documents {
            options |= XML_PARSE_HUGE;
        }
        options
    }
}

/// Validation-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Write schema default and fixed values into validated trees
    pub materialize_defaults: bool,
    /// Directory answering external schema references when a call brings no resolver
    pub schema_dir: Option<PathBuf>,
}

impl ValidationConfig {
    /// Resolver built from `schema_dir`, if one is configured
    pub fn fallback_resolver(&self) -> Option<DirectoryResolver> {
        self.schema_dir.as_ref().map(DirectoryResolver::new)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            materialize_defaults: true,
            schema_dir: None,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// Indent serialized documents
    pub indent: bool,
    /// Format used by the error reporter
    pub format: OutputFormatConfig,
    pub verbosity: VerbosityConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            indent: true,
            format: OutputFormatConfig::Human,
            verbosity: VerbosityConfig::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerbosityConfig {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment
    pub fn load_config(path: Option<&Path>) -> Result<Config> {
        let mut config = Config::default();

        if let Some(path) = path {
            let file_config = Self::load_from_file(path)?;
            config = Self::merge_configs(config, file_config);
        }

        config = Self::apply_environment_overrides(config)?;
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            Some("json") => {
                let config: Config = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    let config: Config = serde_json::from_str(&content)?;
                    Ok(config)
                }
            }
        }
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Parser settings
        if let Some(value) = env.get("XSD_DOM_ALLOW_NETWORK") {
            config.parser.allow_network = parse_bool("XSD_DOM_ALLOW_NETWORK", &value)?;
        }

        if let Some(value) = env.get("XSD_DOM_STRIP_BLANK_TEXT") {
            config.parser.strip_blank_text = parse_bool("XSD_DOM_STRIP_BLANK_TEXT", &value)?;
        }

        if let Some(value) = env.get("XSD_DOM_HUGE_DOCUMENTS") {
            config.parser.huge_documents = parse_bool("XSD_DOM_HUGE_DOCUMENTS", &value)?;
        }

        // Validation settings
        if let Some(value) = env.get("XSD_DOM_MATERIALIZE_DEFAULTS") {
            config.validation.materialize_defaults =
                parse_bool("XSD_DOM_MATERIALIZE_DEFAULTS", &value)?;
        }

        if let Some(schema_dir) = env.get("XSD_DOM_SCHEMA_DIR") {
            config.validation.schema_dir = if schema_dir.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(schema_dir))
            };
        }

        // Output settings
        if let Some(value) = env.get("XSD_DOM_INDENT") {
            config.output.indent = parse_bool("XSD_DOM_INDENT", &value)?;
        }

        if let Some(format) = env.get("XSD_DOM_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid XSD_DOM_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        if let Some(verbosity) = env.get("XSD_DOM_VERBOSITY") {
            config.output.verbosity = match verbosity.to_lowercase().as_str() {
                "quiet" => VerbosityConfig::Quiet,
                "normal" => VerbosityConfig::Normal,
                "verbose" => VerbosityConfig::Verbose,
                "debug" => VerbosityConfig::Debug,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid XSD_DOM_VERBOSITY value: {}",
                        verbosity
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge two configurations (second takes precedence for set values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        // Parser settings
        base.parser = override_config.parser;

        // Validation settings
        base.validation.materialize_defaults = override_config.validation.materialize_defaults;
        if override_config.validation.schema_dir.is_some() {
            base.validation.schema_dir = override_config.validation.schema_dir;
        }

        // Output settings
        base.output = override_config.output;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(schema_dir) = &config.validation.schema_dir {
            if schema_dir.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "Schema directory must not be empty".to_string(),
                ));
            }
            if !schema_dir.is_dir() {
                return Err(ConfigError::Validation(format!(
                    "Schema directory does not exist: {}",
                    schema_dir.display()
                )));
            }
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}
