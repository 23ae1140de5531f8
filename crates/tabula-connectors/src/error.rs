//! Typed errors for the connectors crate.

use std::fmt;

use tabula_core::FetchError;

/// Errors that can occur while building or talking to a segment source.
#[derive(Debug)]
pub enum ConnectorError {
    /// The source URI could not be parsed or rewritten.
    InvalidUri(String),
    /// The URI scheme is not supported by any connector.
    UnsupportedUri(String),
    /// Invalid or missing configuration.
    ConfigError(String),
    /// A returned entity or page could not be decoded.
    DecodeFailed(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::InvalidUri(msg) => write!(f, "invalid URI: {}", msg),
            ConnectorError::UnsupportedUri(msg) => write!(f, "unsupported URI: {}", msg),
            ConnectorError::ConfigError(msg) => write!(f, "config error: {}", msg),
            ConnectorError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<url::ParseError> for ConnectorError {
    fn from(e: url::ParseError) -> Self {
        ConnectorError::InvalidUri(e.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::DecodeFailed(e.to_string())
    }
}

// Nothing here gets better by asking again.
impl From<ConnectorError> for FetchError {
    fn from(e: ConnectorError) -> Self {
        FetchError::Permanent(e.to_string())
    }
}
