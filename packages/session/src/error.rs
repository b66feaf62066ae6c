//! Session error types

use crate::model::EndpointDescription;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors raised while establishing, pooling or testing sessions
///
/// `Clone` so that every caller sharing one in-flight connect receives the
/// same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Invalid or incomplete client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The transport could not open or activate a session
    #[error("Connect to {endpoint} failed: {message}")]
    ConnectFailure {
        /// Endpoint url of the attempt
        endpoint: String,
        /// Failure detail
        message: String,
    },

    /// Discovery returned no endpoint satisfying the request
    #[error("No endpoint matches {requested} among {} discovered", .discovered.len())]
    NoMatchingEndpoint {
        /// Requested endpoint url
        requested: String,
        /// Everything discovery returned
        discovered: Vec<EndpointDescription>,
    },

    /// An operation ran out of time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The reverse connect listener is not running
    #[error("Reverse connect unavailable: {0}")]
    ReverseConnectUnavailable(String),

    /// The pool or manager has been disposed
    #[error("Session pool disposed")]
    Disposed,

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    /// Closing a session failed
    #[error("Closing session {session} failed: {message}")]
    Close {
        /// Session name
        session: String,
        /// Failure detail
        message: String,
    },

    /// Certificate or identity failure
    #[error("Trust error: {0}")]
    Trust(String),
}

impl SessionError {
    /// Create a connect failure for an endpoint
    pub fn connect_failure(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ConnectFailure {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            // Transient network conditions
            Self::ConnectFailure { .. } | Self::Timeout(_) => true,

            // Permanent
            Self::Configuration(_)
            | Self::NoMatchingEndpoint { .. }
            | Self::ReverseConnectUnavailable(_)
            | Self::Disposed
            | Self::ArgumentInvalid(_)
            | Self::Close { .. }
            | Self::Trust(_) => false,
        }
    }
}

impl From<ualink_trust::TrustError> for SessionError {
    fn from(err: ualink_trust::TrustError) -> Self {
        match err {
            ualink_trust::TrustError::Configuration(message) => Self::Configuration(message),
            other => Self::Trust(other.to_string()),
        }
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        Self::ArgumentInvalid(format!("invalid url: {err}"))
    }
}
