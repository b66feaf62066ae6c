//! Private key passwords

use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::store::StoreType;

/// Identifies a certificate for password lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateIdentifier {
    /// Backend kind of the store holding the key
    pub store_type: StoreType,
    /// Path or label of that store
    pub store_path: String,
    /// Certificate thumbprint
    pub thumbprint: String,
    /// Certificate subject
    pub subject: String,
}

impl fmt::Display for CertificateIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} ({})",
            self.store_type, self.store_path, self.thumbprint, self.subject
        )
    }
}

/// Supplies passwords protecting private keys
///
/// Consulted exactly once per store operation that writes or reads a
/// private key.
pub trait CertificatePasswordProvider: Send + Sync {
    /// Password for the identified certificate, `None` for no password
    fn get_password(&self, identifier: &CertificateIdentifier) -> Option<Zeroizing<String>>;
}

/// Provider that never supplies a password
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPassword;

impl CertificatePasswordProvider for NoPassword {
    fn get_password(&self, _identifier: &CertificateIdentifier) -> Option<Zeroizing<String>> {
        None
    }
}

/// Provider with one fallback password and optional per-thumbprint overrides
#[derive(Default, Clone)]
pub struct StaticPasswordProvider {
    default: Option<Zeroizing<String>>,
    by_thumbprint: HashMap<String, Zeroizing<String>>,
}

impl StaticPasswordProvider {
    /// Provider returning `password` for every certificate
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            default: Some(Zeroizing::new(password.into())),
            by_thumbprint: HashMap::new(),
        }
    }

    /// Use a specific password for one thumbprint
    #[must_use]
    pub fn with_thumbprint(mut self, thumbprint: &str, password: impl Into<String>) -> Self {
        self.by_thumbprint.insert(
            thumbprint.to_ascii_uppercase(),
            Zeroizing::new(password.into()),
        );
        self
    }
}

impl fmt::Debug for StaticPasswordProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPasswordProvider")
            .field("has_default", &self.default.is_some())
            .field("overrides", &self.by_thumbprint.len())
            .finish()
    }
}

impl CertificatePasswordProvider for StaticPasswordProvider {
    fn get_password(&self, identifier: &CertificateIdentifier) -> Option<Zeroizing<String>> {
        self.by_thumbprint
            .get(&identifier.thumbprint.to_ascii_uppercase())
            .or(self.default.as_ref())
            .cloned()
    }
}
