//! Certificate store abstraction
//!
//! A store holds certificates (optionally with private keys) and, when it
//! supports them, certificate revocation lists. Two backends ship with the
//! crate: [`DirectoryStore`] on the local filesystem and [`MemoryStore`].

mod directory;
mod key_protection;
mod memory;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::x509::{Certificate, Crl};

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

/// The eight logical stores of an OPC UA application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CertificateStoreName {
    /// Own application instance certificates, with private keys
    Application,
    /// Trusted peer certificates
    Trusted,
    /// Certificates that failed validation, awaiting approval
    Rejected,
    /// CA certificates used to build peer chains
    Issuer,
    /// Trusted user certificates
    User,
    /// CA certificates for user certificate chains
    UserIssuer,
    /// Trusted HTTPS certificates
    Https,
    /// CA certificates for HTTPS chains
    HttpsIssuer,
}

impl CertificateStoreName {
    /// Every store name
    pub const ALL: [Self; 8] = [
        Self::Application,
        Self::Trusted,
        Self::Rejected,
        Self::Issuer,
        Self::User,
        Self::UserIssuer,
        Self::Https,
        Self::HttpsIssuer,
    ];

    /// Directory name below the PKI root
    #[must_use]
    pub fn default_directory(self) -> &'static str {
        match self {
            Self::Application => "own",
            Self::Trusted => "trusted",
            Self::Rejected => "rejected",
            Self::Issuer => "issuer",
            Self::User => "trustedUser",
            Self::UserIssuer => "issuerUser",
            Self::Https => "trustedHttps",
            Self::HttpsIssuer => "issuerHttps",
        }
    }
}

impl fmt::Display for CertificateStoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Backend kind of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StoreType {
    /// Files below a directory
    #[default]
    Directory,
    /// Process memory, lost on exit
    Memory,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a store lives and how it is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLocation {
    /// Backend kind
    pub store_type: StoreType,
    /// Directory for directory stores, a label for memory stores
    pub path: PathBuf,
}

impl StoreLocation {
    /// Location of a directory store
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            store_type: StoreType::Directory,
            path: path.into(),
        }
    }

    /// Location of a memory store
    pub fn memory(label: impl Into<PathBuf>) -> Self {
        Self {
            store_type: StoreType::Memory,
            path: label.into(),
        }
    }

    /// Open the store at this location
    ///
    /// `supports_crls` enables CRL files and `private_keys` keeps the keys of
    /// added certificates. Both are applied as given; which store gets which
    /// is decided by [`CertificateStores::open`](crate::CertificateStores::open).
    #[must_use]
    pub fn open(&self, supports_crls: bool, private_keys: bool) -> Arc<dyn CertificateStore> {
        match self.store_type {
            StoreType::Directory => Arc::new(
                DirectoryStore::new(self.path.clone())
                    .with_crl_support(supports_crls)
                    .with_private_keys(private_keys),
            ),
            StoreType::Memory => Arc::new(
                MemoryStore::new(self.path.to_string_lossy())
                    .with_crl_support(supports_crls)
                    .with_private_keys(private_keys),
            ),
        }
    }
}

/// Persistent collection of certificates and CRLs
///
/// Implementations must be safe to call concurrently. A store may hold more
/// than one entry with the same thumbprint; `delete` removes all of them.
#[async_trait]
pub trait CertificateStore: Send + Sync + fmt::Debug {
    /// Backend kind
    fn store_type(&self) -> StoreType;

    /// Path or label identifying this store
    fn store_path(&self) -> String;

    /// Whether CRL operations are available
    fn supports_crls(&self) -> bool;

    /// Whether private keys are kept on add and can be loaded
    fn supports_private_keys(&self) -> bool;

    /// All certificates, without private keys
    async fn enumerate(&self) -> Result<Vec<Certificate>>;

    /// Add a certificate; a carried private key is protected with `password`
    async fn add(&self, certificate: &Certificate, password: Option<&str>) -> Result<()>;

    /// Delete every entry with this thumbprint, returning whether any existed
    async fn delete(&self, thumbprint: &str) -> Result<bool>;

    /// All entries with this thumbprint, without private keys
    async fn find_by_thumbprint(&self, thumbprint: &str) -> Result<Vec<Certificate>>;

    /// Load a certificate together with its private key
    ///
    /// Returns `Ok(None)` when no entry with a private key matches the
    /// thumbprint and, if given, the subject.
    async fn load_private_key(
        &self,
        thumbprint: &str,
        subject: Option<&str>,
        password: Option<&str>,
    ) -> Result<Option<Certificate>>;

    /// All CRLs
    async fn enumerate_crls(&self) -> Result<Vec<Crl>>;

    /// Add a CRL
    async fn add_crl(&self, crl: &Crl) -> Result<()>;

    /// Delete a CRL, returning whether it existed
    async fn delete_crl(&self, crl: &Crl) -> Result<bool>;
}
