//! Error types for the Quarry domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; only [`Error`] ever reaches
//! the caller of a run, and only for failures that happen before the state
//! machine starts (or on cancellation).

use thiserror::Error;

/// The top-level error type for all Quarry operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Capability errors ---
    #[error("Capability error: {0}")]
    Tool(#[from] ToolError),

    // --- Collaborator store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Run control ---
    #[error("Run cancelled")]
    Cancelled,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) | Self::InvalidResponse(_) => {
                false
            }
        }
    }

    /// The wait the provider asked for before the next attempt, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown capability: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    #[error("Capability {capability} failed: {reason}")]
    ExecutionFailed { capability: String, reason: String },

    #[error("Capability {capability} timed out after {timeout_secs}s")]
    Timeout { capability: String, timeout_secs: u64 },

    #[error("Capability {capability} network error: {reason}")]
    Network { capability: String, reason: String },

    #[error("Permission denied for {capability}: {reason}")]
    PermissionDenied { capability: String, reason: String },
}

impl ToolError {
    /// Shorthand used by capability handlers for argument problems.
    pub fn invalid(capability: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            capability: capability.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand used by capability handlers for runtime failures.
    pub fn failed(capability: &str, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            capability: capability.to_string(),
            reason: reason.into(),
        }
    }

    /// Timeouts and network failures are retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn unknown_capability_names_the_capability() {
        let err = ToolError::NotFound("xyz".into());
        assert!(err.to_string().contains("xyz"));
    }

    #[test]
    fn provider_transience() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(ProviderError::Timeout("slow".into()).is_transient());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into()
            }
            .is_transient()
        );
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
    }

    #[test]
    fn only_rate_limits_carry_a_retry_hint() {
        let limited = ProviderError::RateLimited { retry_after_secs: 7 };
        assert_eq!(limited.retry_after(), Some(std::time::Duration::from_secs(7)));
        assert_eq!(ProviderError::Network("reset".into()).retry_after(), None);
    }

    #[test]
    fn tool_transience() {
        assert!(
            ToolError::Timeout {
                capability: "scrape_site".into(),
                timeout_secs: 60
            }
            .is_transient()
        );
        assert!(!ToolError::invalid("calculate", "missing expression").is_transient());
    }
}
