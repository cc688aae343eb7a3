//! Error types for the Turnwright domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the engine folds all of
//! them into a structured `RunResult` instead of returning them.

use thiserror::Error;

/// Transport-level failures raised by a provider adapter.
///
/// Any of these aborts the current run; the engine never retries them.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(status_code: u16, body: String) -> Self {
        match status_code {
            429 => Self::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => Self::AuthenticationFailed(body),
            404 => Self::ModelNotFound(body),
            _ => Self::ApiError {
                status_code,
                message: body,
            },
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool panicked: {tool_name}: {reason}")]
    Panicked { tool_name: String, reason: String },
}
