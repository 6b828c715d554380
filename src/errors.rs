//! Exporter Error Hierarchy
//!
//! Errors are split by origin: the management console (remote calls), the
//! configuration layer, and metric rendering. Only a small set of conditions is
//! fatal for the process; everything else degrades a single scrape or cycle.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failures reported by the management console client
    #[error(transparent)]
    Console(#[from] ConsoleError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Metric mapping failures
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Retry policy exhaustion
    #[error("Retry task failed: {0}")]
    RetryTaskFailed(String),

    #[error("Retry timeout after {0:?}")]
    RetryTimeoutError(Duration),

    #[error("Signal sender closed: {0}")]
    SignalSenderClosed(String),

    /// Metrics endpoint could not be started
    #[error("Server error: {0}")]
    ServerError(String),
}

impl Error {
    /// Conditions that must terminate the process instead of being retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Fatal(_) => true,
            Error::Console(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Conditions a later attempt may clear. Console errors qualify only
    /// when transient; an attempt timeout always does.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Console(e) => e.is_transient(),
            Error::RetryTimeoutError(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConsoleError {
    /// Connection could not be established or was dropped
    #[error("Connection to console failed: {0}")]
    Connection(String),

    /// Remote call exceeded its deadline
    #[error("Console request timed out after {0:?}")]
    Timeout(Duration),

    /// Credential definitively rejected (invalid, expired or locked)
    #[error("Authentication rejected by console: {0}")]
    Authentication(String),

    /// The user lacks object-access permission on the resource
    #[error("Permission denied for {uri}")]
    PermissionDenied { uri: String },

    #[error("Resource not found: {uri}")]
    NotFound { uri: String },

    /// Notification transport dropped; all subscriptions are void
    #[error("Notification channel disconnected: {0}")]
    Disconnected(String),

    /// Malformed or unexpected console response
    #[error("Console protocol error: {0}")]
    Protocol(String),
}

impl ConsoleError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConsoleError::Connection(_) | ConsoleError::Timeout(_) | ConsoleError::Disconnected(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsoleError::Authentication(_))
    }

    pub fn is_access_gap(&self) -> bool {
        matches!(
            self,
            ConsoleError::PermissionDenied { .. } | ConsoleError::NotFound { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Invalid label expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Property '{property}' missing on {uri}")]
    MissingProperty { uri: String, property: String },

    /// `.parent` navigation hit the top of the hierarchy
    #[error("Resource {uri} has no parent in the snapshot")]
    MissingParent { uri: String },

    #[error("Value of '{source_name}' is not numeric: {value}")]
    NotNumeric { source_name: String, value: String },

    /// Expression needs a context that the current value does not carry
    #[error("Expression '{0}' is not applicable here")]
    NotApplicable(String),
}
