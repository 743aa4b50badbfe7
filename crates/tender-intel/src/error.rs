//! Error types for the tender intelligence pipeline

use thiserror::Error;

use crate::types::ProcessingStage;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File parsing error
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Archive could not be opened or extracted
    #[error("Archive error: {0}")]
    Archive(String),

    /// Fetch collaborator failed to materialize a locator locally
    #[error("Fetch failed for '{locator}': {message}")]
    Fetch { locator: String, message: String },

    /// Format conversion failed
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// No room left in the context window for document text
    #[error(
        "Not enough room for document text: context window {context_window}, \
         system {system_tokens}, template {template_tokens}, response {response_tokens}"
    )]
    Capacity {
        context_window: usize,
        system_tokens: usize,
        template_tokens: usize,
        response_tokens: usize,
    },

    /// Generation service error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Generation reply could not be decoded against the contract
    #[error("Failed to decode extraction reply: {0}")]
    Decode(String),

    /// Record shape or aggregate mismatch
    #[error("Schema error: {0}")]
    Schema(String),

    /// Attempt to move a tender backwards through its lifecycle
    #[error("Processing stage cannot move from {from} to {to}")]
    StageRegression {
        from: ProcessingStage,
        to: ProcessingStage,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a fetch error
    pub fn fetch(locator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            locator: locator.into(),
            message: message.into(),
        }
    }

    /// Create an archive error
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }

    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
