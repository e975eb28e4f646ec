use thiserror::Error;

/// Errors that can occur while serving a generation request.
///
/// Request-level failures end the event stream with exactly one `error`
/// frame whose `kind` is [`Error::kind`]. Failures scoped to a single tool
/// call are not represented here; see [`crate::tools::ToolError`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Model already registered: {0}")]
    DuplicateModel(String),

    #[error("Invalid descriptor for model {model}: {reason}")]
    InvalidDescriptor { model: String, reason: String },

    #[error("Access denied for model {model}: {reason}")]
    AccessDenied { model: String, reason: String },

    #[error("Authentication failed: {provider} - {message}")]
    Auth { provider: String, message: String },

    #[error("Provider error: {provider} - {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },

    #[error("Provider {provider} timed out after {elapsed_ms}ms")]
    ProviderTimeout { provider: String, elapsed_ms: u64 },

    #[error("Invalid input for tool {tool}: {message}")]
    ToolInputValidation { tool: String, message: String },

    #[error("Tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Request aborted by caller")]
    Aborted,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Streaming error: {0}")]
    Streaming(String),
}

impl Error {
    /// A provider failure that is worth another attempt (rate limits, 5xx).
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// A provider failure that will fail the same way on every attempt.
    pub fn provider_fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(provider: impl Into<String>, elapsed_ms: u64) -> Self {
        Error::ProviderTimeout {
            provider: provider.into(),
            elapsed_ms,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn streaming(message: impl Into<String>) -> Self {
        Error::Streaming(message.into())
    }

    /// The wire-level error kind reported in `error` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Http(e) if e.is_timeout() => "ProviderTimeoutError",
            Error::Http(_) | Error::Auth { .. } | Error::Provider { .. } => "ProviderError",
            Error::Serialization(_) | Error::Streaming(_) => "ProviderError",
            Error::ProviderTimeout { .. } => "ProviderTimeoutError",
            Error::UnknownModel(_) => "UnknownModelError",
            Error::DuplicateModel(_) | Error::InvalidDescriptor { .. } | Error::Config(_) => {
                "ConfigError"
            }
            Error::AccessDenied { .. } => "AccessDeniedError",
            Error::ToolInputValidation { .. } => "ToolInputValidationError",
            Error::ToolExecution { .. } => "ToolExecutionError",
            Error::Aborted => "AbortedError",
        }
    }

    /// Whether another attempt may succeed. Only consulted before any
    /// output of the failed call has reached the client.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Provider { retryable, .. } => *retryable,
            Error::ProviderTimeout { .. } | Error::Streaming(_) => true,
            _ => false,
        }
    }
}
