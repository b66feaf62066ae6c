//! Registry of the eight logical certificate stores

use std::sync::Arc;

use crate::options::SecurityOptions;
use crate::store::{CertificateStore, CertificateStoreName};

/// The opened stores of one application, addressed by logical name
#[derive(Debug, Clone)]
pub struct CertificateStores {
    stores: [Arc<dyn CertificateStore>; CertificateStoreName::ALL.len()],
}

impl CertificateStores {
    /// Open every store at its configured location
    ///
    /// Only the Application store keeps private keys and never carries
    /// CRLs; the rest hold public certificates and CRLs.
    #[must_use]
    pub fn open(options: &SecurityOptions) -> Self {
        Self::from_fn(|name| {
            let is_application = name == CertificateStoreName::Application;
            options.location(name).open(!is_application, is_application)
        })
    }

    /// Build from a store factory called once per logical name
    pub fn from_fn(
        mut open: impl FnMut(CertificateStoreName) -> Arc<dyn CertificateStore>,
    ) -> Self {
        Self {
            stores: std::array::from_fn(|i| open(CertificateStoreName::ALL[i])),
        }
    }

    /// Store registered under `name`
    #[must_use]
    pub fn get(&self, name: CertificateStoreName) -> Arc<dyn CertificateStore> {
        Arc::clone(&self.stores[name as usize])
    }

    /// Swap the store registered under `name`
    #[must_use]
    pub fn replace(mut self, name: CertificateStoreName, store: Arc<dyn CertificateStore>) -> Self {
        self.stores[name as usize] = store;
        self
    }
}
