// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every stage of the engine. Only configuration problems are
// fatal; per-series routing failures are soft and never reach these types.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Engine Errors
// ----------------------------------------------------------------------------

/// The main error type for the chart engine.
/// All subsystem errors can be converted to this type.
#[derive(Error, Debug)]
pub enum EngineError {
    // ---- Configuration Errors ----
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // ---- Template Errors ----
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    // ---- Selector Errors ----
    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    // ---- Runtime Store Errors ----
    #[error("Runtime store error: {0}")]
    RuntimeStore(String),

    // ---- Logging Errors ----
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

impl EngineError {
    /// Check if this error is recoverable without operator action
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Config(_) => false,
            EngineError::Template(_) => false,
            EngineError::Selector(_) => false,
            EngineError::RuntimeStore(_) => true,
            EngineError::Logging(_) => false,
        }
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::Template(_) => "template",
            EngineError::Selector(_) => "selector",
            EngineError::RuntimeStore(_) => "runtime_store",
            EngineError::Logging(_) => "logging",
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading, validation and option apply
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Template '{template_id}' failed to compile: {source}")]
    TemplateCompile {
        template_id: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Duplicate template id '{template_id}'")]
    DuplicateTemplate { template_id: String },

    #[error("Failed to render configuration: {message}")]
    RenderError { message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn template_compile(template_id: impl Into<String>, source: impl Into<EngineError>) -> Self {
        ConfigError::TemplateCompile {
            template_id: template_id.into(),
            source: Box::new(source.into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Template Errors
// ----------------------------------------------------------------------------

/// Hard template errors. A template that parses but cannot materialize for a
/// given series is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template cannot be empty")]
    Empty,

    #[error("invalid instance label token '{token}': {reason}")]
    InvalidInstanceToken { token: String, reason: &'static str },

    #[error("invalid metric pattern '{pattern}': {message}")]
    InvalidMetricPattern { pattern: String, message: String },
}

// ----------------------------------------------------------------------------
// Selector Errors
// ----------------------------------------------------------------------------

/// Tag selector parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector '{selector}' contains an empty word")]
    EmptyWord { selector: String },

    #[error("selector '{selector}' contains selector '{word}' with forbidden symbol")]
    ForbiddenSymbol { selector: String, word: String },
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
