use thiserror::Error;

/// Errors raised while proxying a single request
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Method or scheme the proxy does not handle
    #[error("Unsupported request: {0}")]
    Protocol(String),

    /// Upstream connection or exchange failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream exchange exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Malformed inbound request or upstream response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model registry could not be loaded or built
    #[error("Registry error: {0}")]
    Registry(#[from] waf_common::WafError),
}

/// Result type alias using ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<httparse::Error> for ProxyError {
    fn from(err: httparse::Error) -> Self {
        ProxyError::Parse(err.to_string())
    }
}

impl ProxyError {
    /// Status and reason sent to the client when this error ends a request
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            ProxyError::Protocol(_) => (501, "Not Implemented"),
            ProxyError::Timeout(_) => (504, "Gateway Timeout"),
            ProxyError::Upstream(_) | ProxyError::Io(_) => (502, "Bad Gateway"),
            ProxyError::Parse(_) => (400, "Bad Request"),
            ProxyError::Config(_) | ProxyError::Registry(_) => (500, "Internal Server Error"),
        }
    }
}
