//! Certificate stores, trust lifecycle and application identity for OPC UA
//! clients.
//!
//! - [`store`]: the [`CertificateStore`] abstraction with directory and
//!   in-memory backends
//! - [`TrustManager`]: listing, adding, approving and removing certificates
//!   and CRLs across the eight logical stores
//! - [`ApplicationConfigurator`]: bounded-retry bootstrap of the client's
//!   own certificate and identity

pub mod configurator;
pub mod error;
pub mod identity;
pub mod options;
pub mod password;
pub mod store;
pub mod stores;
pub mod trust_manager;
pub mod x509;

pub use configurator::{
    ApplicationConfigurator, ConfiguredApplication, HostEnvironment, SystemHostEnvironment,
};
pub use error::{Result, TrustError};
pub use identity::{ApplicationIdentity, IdentityHandle, SecurityConfiguration};
pub use options::{ApplicationOptions, SecurityOptions, TransportQuotas};
pub use password::{
    CertificateIdentifier, CertificatePasswordProvider, NoPassword, StaticPasswordProvider,
};
pub use store::{
    CertificateStore, CertificateStoreName, DirectoryStore, MemoryStore, StoreLocation, StoreType,
};
pub use stores::CertificateStores;
pub use trust_manager::TrustManager;
pub use x509::{Certificate, Crl};
