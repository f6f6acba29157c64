use thiserror::Error;

/// Errors raised by the shared request, feature and model code
#[derive(Error, Debug)]
pub enum WafError {
    /// A corpus sample or request fragment could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Corpus provider error
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Model fitting or scoring error
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid state error
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using WafError
pub type Result<T> = std::result::Result<T, WafError>;

impl From<serde_json::Error> for WafError {
    fn from(err: serde_json::Error) -> Self {
        WafError::Serialization(err.to_string())
    }
}
