//! In-memory certificate store

use async_trait::async_trait;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use super::{CertificateStore, StoreType};
use crate::error::{Result, TrustError};
use crate::x509::{Certificate, Crl};

struct Entry {
    certificate: Certificate,
    private_key: Option<Zeroizing<Vec<u8>>>,
    password: Option<Zeroizing<String>>,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    crls: Vec<Crl>,
}

/// Store keeping everything in process memory
///
/// Entries are appended, so the same thumbprint may appear more than once
/// until deleted. A private key is only handed out again for the password
/// it was added with.
pub struct MemoryStore {
    label: String,
    supports_crls: bool,
    private_keys: bool,
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store with CRL and private key support
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            supports_crls: true,
            private_keys: true,
            state: RwLock::new(State::default()),
        }
    }

    /// Enable or disable CRL support
    #[must_use]
    pub fn with_crl_support(self, supports_crls: bool) -> Self {
        Self {
            supports_crls,
            ..self
        }
    }

    /// Keep or discard private keys on add
    #[must_use]
    pub fn with_private_keys(self, private_keys: bool) -> Self {
        Self {
            private_keys,
            ..self
        }
    }

    fn unsupported(&self, operation: &'static str) -> TrustError {
        TrustError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("memory store '{}' does not support {operation}", self.label),
        ))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("label", &self.label)
            .field("supports_crls", &self.supports_crls)
            .field("private_keys", &self.private_keys)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    fn store_type(&self) -> StoreType {
        StoreType::Memory
    }

    fn store_path(&self) -> String {
        self.label.clone()
    }

    fn supports_crls(&self) -> bool {
        self.supports_crls
    }

    fn supports_private_keys(&self) -> bool {
        self.private_keys
    }

    async fn enumerate(&self) -> Result<Vec<Certificate>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .map(|e| e.certificate.clone())
            .collect())
    }

    async fn add(&self, certificate: &Certificate, password: Option<&str>) -> Result<()> {
        let private_key = if self.private_keys {
            certificate
                .private_key()
                .map(|k| Zeroizing::new(k.to_vec()))
        } else {
            None
        };
        let password = private_key
            .as_ref()
            .and(password.filter(|p| !p.is_empty()))
            .map(|p| Zeroizing::new(p.to_string()));
        self.state.write().await.entries.push(Entry {
            certificate: certificate.without_private_key(),
            private_key,
            password,
        });
        Ok(())
    }

    async fn delete(&self, thumbprint: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|e| !e.certificate.thumbprint().eq_ignore_ascii_case(thumbprint));
        Ok(state.entries.len() != before)
    }

    async fn find_by_thumbprint(&self, thumbprint: &str) -> Result<Vec<Certificate>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.certificate.thumbprint().eq_ignore_ascii_case(thumbprint))
            .map(|e| e.certificate.clone())
            .collect())
    }

    async fn load_private_key(
        &self,
        thumbprint: &str,
        subject: Option<&str>,
        password: Option<&str>,
    ) -> Result<Option<Certificate>> {
        if !self.private_keys {
            return Ok(None);
        }
        let state = self.state.read().await;
        let entry = state.entries.iter().find(|e| {
            e.private_key.is_some()
                && e.certificate.thumbprint().eq_ignore_ascii_case(thumbprint)
                && subject.is_none_or(|s| e.certificate.subject_matches(s))
        });
        let Some(entry) = entry else {
            return Ok(None);
        };
        if entry.password.as_deref().map(String::as_str) != password.filter(|p| !p.is_empty()) {
            return Err(TrustError::KeyProtection(format!(
                "wrong password for private key {thumbprint}"
            )));
        }
        Ok(entry
            .private_key
            .clone()
            .map(|key| entry.certificate.clone().with_private_key(key)))
    }

    async fn enumerate_crls(&self) -> Result<Vec<Crl>> {
        if !self.supports_crls {
            return Err(self.unsupported("CRLs"));
        }
        Ok(self.state.read().await.crls.clone())
    }

    async fn add_crl(&self, crl: &Crl) -> Result<()> {
        if !self.supports_crls {
            return Err(self.unsupported("CRLs"));
        }
        let mut state = self.state.write().await;
        if !state.crls.contains(crl) {
            state.crls.push(crl.clone());
        }
        Ok(())
    }

    async fn delete_crl(&self, crl: &Crl) -> Result<bool> {
        if !self.supports_crls {
            return Err(self.unsupported("CRLs"));
        }
        let mut state = self.state.write().await;
        let before = state.crls.len();
        state.crls.retain(|c| c != crl);
        Ok(state.crls.len() != before)
    }
}
