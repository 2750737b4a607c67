//! Error type for provider calls.

use signflow_util::{JsonParseError, status_error_message};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with a non-success status.
    #[error("{operation} failed: HTTP {status}: {body}")]
    Http { operation: &'static str, status: u16, body: String },

    /// The request never produced a response.
    #[error("{operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// A success response whose body was not valid JSON.
    #[error("{operation} returned an unexpected body: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: JsonParseError,
    },

    /// Valid JSON that did not match the expected schema.
    #[error("{operation} could not decode response: {source}")]
    Schema {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A base URI returned by the provider failed validation.
    #[error("refusing to call untrusted base URI: {0}")]
    UntrustedBaseUri(#[from] crate::config::ConfigError),
}

impl ProviderError {
    /// HTTP status of the failure, when the provider answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Human-readable hint for well-known statuses.
    pub fn hint(&self) -> Option<String> {
        self.status().and_then(status_error_message)
    }
}
