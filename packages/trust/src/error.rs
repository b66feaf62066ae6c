//! Error types for certificate store and trust lifecycle operations

use crate::store::CertificateStoreName;

/// Result type for trust operations
pub type Result<T> = std::result::Result<T, TrustError>;

/// Errors raised by certificate stores, the trust manager and the
/// application configurator
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Fatal bootstrap failure after the configurator exhausted its attempts
    #[error("Configuration failed: {0}")]
    Configuration(String),

    /// Certificate or CRL is not present in the addressed store
    #[error("Not found in {store}: {what}")]
    NotFound {
        /// Store that was searched
        store: CertificateStoreName,
        /// Thumbprint, subject or CRL issuer that was looked up
        what: String,
    },

    /// Store lacks the requested capability, e.g. CRL support
    #[error("{store} store does not support {operation}")]
    NotSupported {
        /// Store that rejected the operation
        store: CertificateStoreName,
        /// Operation name
        operation: &'static str,
    },

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    /// Underlying store operation failed
    #[error("{operation} on {store} failed for {thumbprint}: {message}")]
    Store {
        /// Store that failed
        store: CertificateStoreName,
        /// Operation that failed
        operation: &'static str,
        /// Thumbprint of the certificate involved
        thumbprint: String,
        /// Failure detail
        message: String,
    },

    /// A multi-store move failed half way and could not be rolled back
    #[error("Partial failure for {thumbprint} (subject {subject}): {message}")]
    PartialFailure {
        /// Thumbprint of the certificate involved
        thumbprint: String,
        /// Subject of the certificate involved
        subject: String,
        /// What was left behind
        message: String,
    },

    /// Certificate, chain or CRL bytes could not be decoded
    #[error("Certificate parsing failed: {0}")]
    CertificateParsing(String),

    /// Private key generation, encryption or decryption failed
    #[error("Key protection failed: {0}")]
    KeyProtection(String),

    /// Filesystem error inside a directory store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrustError {
    /// Create a not-found error for a thumbprint or subject
    pub fn not_found(store: CertificateStoreName, what: impl Into<String>) -> Self {
        Self::NotFound {
            store,
            what: what.into(),
        }
    }

    /// Create a store failure with thumbprint context
    pub fn store(
        store: CertificateStoreName,
        operation: &'static str,
        thumbprint: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Store {
            store,
            operation,
            thumbprint: thumbprint.into(),
            message: message.to_string(),
        }
    }

    /// Create a parsing error
    pub fn parsing(message: impl std::fmt::Display) -> Self {
        Self::CertificateParsing(message.to_string())
    }

    /// Whether this error means the item was missing
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rcgen::Error> for TrustError {
    fn from(err: rcgen::Error) -> Self {
        Self::KeyProtection(format!("certificate generation: {err}"))
    }
}
