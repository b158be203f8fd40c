//! Error taxonomy.
//!
//! | Type | Raised by | HTTP mapping |
//! |------|-----------|--------------|
//! | [`ValidationError`] | request parsing | `400` |
//! | [`ConfigurationError`] | credential check | `500` with `"<Provider> API key missing"` |
//! | [`ProviderError`] | embedding / chat clients | `500` with `"Server Error"` |
//! | [`ToolError`] | tool dispatch | never; fed back to the model as tool output |
//!
//! [`ChatError`] is the union the HTTP endpoint converts into a response.

use thiserror::Error;

/// The request body did not carry a usable question.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("request body is not valid JSON: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("question must be a non-empty string")]
    InvalidQuestion,
}

/// Required process configuration is absent.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{provider} API key missing")]
    MissingCredential { provider: String },
}

/// Failure talking to an upstream model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("environment variable {0} is not set")]
    MissingCredential(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Whether the call is worth retrying (rate limit, server error, network).
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Failure of a single tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no tool registered with name: {0}")]
    Unknown(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Everything the chat endpoint can fail with.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
