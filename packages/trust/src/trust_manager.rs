//! Certificate trust lifecycle across the logical stores
//!
//! [`TrustManager`] is the public certificates surface: listing, adding,
//! approving and removing certificates and CRLs. Multi-store operations are
//! best effort and not atomic; each documents what it leaves behind when a
//! step fails.

use std::sync::Arc;
use std::time::SystemTime;

use zeroize::Zeroizing;

use crate::error::{Result, TrustError};
use crate::identity::IdentityHandle;
use crate::password::{CertificateIdentifier, CertificatePasswordProvider};
use crate::store::{CertificateStore, CertificateStoreName};
use crate::stores::CertificateStores;
use crate::x509::{self, Certificate, Crl};

use CertificateStoreName::{Application, Https, HttpsIssuer, Issuer, Rejected, Trusted};

/// Manages certificates and CRLs across the application's stores
#[derive(Clone)]
pub struct TrustManager {
    stores: CertificateStores,
    passwords: Arc<dyn CertificatePasswordProvider>,
    add_app_cert_to_trusted: bool,
    identity: Option<IdentityHandle>,
}

impl std::fmt::Debug for TrustManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustManager")
            .field("stores", &self.stores)
            .field("add_app_cert_to_trusted", &self.add_app_cert_to_trusted)
            .field("has_identity", &self.identity.is_some())
            .finish_non_exhaustive()
    }
}

impl TrustManager {
    /// Create a manager over opened stores
    pub fn new(
        stores: CertificateStores,
        passwords: Arc<dyn CertificatePasswordProvider>,
        add_app_cert_to_trusted: bool,
    ) -> Self {
        Self {
            stores,
            passwords,
            add_app_cert_to_trusted,
            identity: None,
        }
    }

    /// Attach the identity rotated when a matching own certificate is added
    #[must_use]
    pub fn with_identity(self, identity: IdentityHandle) -> Self {
        Self {
            identity: Some(identity),
            ..self
        }
    }

    /// The underlying stores
    #[must_use]
    pub fn stores(&self) -> &CertificateStores {
        &self.stores
    }

    /// The identity handle, once bootstrap has completed
    #[must_use]
    pub fn identity(&self) -> Option<&IdentityHandle> {
        self.identity.as_ref()
    }

    /// List certificates of a store
    ///
    /// For the Application store with `include_private_key`, each key is
    /// loaded with the provider's password; a certificate whose key cannot
    /// be loaded is returned without it.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Store` if the store cannot be enumerated.
    pub async fn list_certificates(
        &self,
        store_name: CertificateStoreName,
        include_private_key: bool,
    ) -> Result<Vec<Certificate>> {
        let store = self.stores.get(store_name);
        let certificates = store
            .enumerate()
            .await
            .map_err(|e| TrustError::store(store_name, "enumerate", "*", e))?;
        if !include_private_key || store_name != Application {
            return Ok(certificates);
        }

        let mut result = Vec::with_capacity(certificates.len());
        for cert in certificates {
            let password = self.password_for(store.as_ref(), &cert);
            match store
                .load_private_key(
                    cert.thumbprint(),
                    Some(cert.subject()),
                    password.as_deref().map(String::as_str),
                )
                .await
            {
                Ok(Some(with_key)) => result.push(with_key),
                Ok(None) => result.push(cert),
                Err(e) => {
                    tracing::warn!(
                        thumbprint = %cert.thumbprint(),
                        subject = %cert.subject(),
                        error = %e,
                        "Failed to load private key, listing public certificate"
                    );
                    result.push(cert);
                }
            }
        }
        Ok(result)
    }

    /// List CRLs of a store, empty when the store has no CRL support
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Store` if the store cannot be enumerated.
    pub async fn list_crls(&self, store_name: CertificateStoreName) -> Result<Vec<Crl>> {
        let store = self.stores.get(store_name);
        if !store.supports_crls() {
            return Ok(Vec::new());
        }
        store
            .enumerate_crls()
            .await
            .map_err(|e| TrustError::store(store_name, "enumerate CRLs", "*", e))
    }

    /// Add a certificate, replacing any entry with the same thumbprint
    ///
    /// `blob` is DER or a PEM bundle optionally carrying a PKCS#8 key. For
    /// the Application store the password always comes from the password
    /// provider and `password` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::CertificateParsing` for an unreadable blob and
    /// `TrustError::Store` when the store rejects the change.
    pub async fn add_certificate(
        &self,
        store_name: CertificateStoreName,
        blob: &[u8],
        password: Option<&str>,
    ) -> Result<Certificate> {
        let cert = Certificate::from_blob(blob)?;
        let store = self.stores.get(store_name);

        let password = if store_name == Application {
            self.password_for(store.as_ref(), &cert)
        } else {
            password.map(|p| Zeroizing::new(p.to_string()))
        };
        self.upsert(store_name, store.as_ref(), &cert, password.as_deref().map(String::as_str))
            .await?;

        if store_name == Application {
            if self.add_app_cert_to_trusted {
                let trusted = self.stores.get(Trusted);
                self.upsert(Trusted, trusted.as_ref(), &cert.without_private_key(), None)
                    .await?;
            }
            if let Some(identity) = &self.identity {
                if cert.has_private_key() && cert.subject_matches(&identity.load().subject_name) {
                    identity.rotate_certificate(cert.clone());
                }
            }
        }

        tracing::info!(
            store = %store_name,
            thumbprint = %cert.thumbprint(),
            subject = %cert.subject(),
            "Certificate added"
        );
        Ok(cert.without_private_key())
    }

    /// Add a CRL to a store
    ///
    /// # Errors
    ///
    /// Returns `TrustError::NotSupported` when the store has no CRL support.
    pub async fn add_crl(&self, store_name: CertificateStoreName, blob: &[u8]) -> Result<()> {
        let store = self.stores.get(store_name);
        if !store.supports_crls() {
            return Err(TrustError::NotSupported {
                store: store_name,
                operation: "CRLs",
            });
        }
        let crl = Crl::from_blob(blob)?;
        store
            .add_crl(&crl)
            .await
            .map_err(|e| TrustError::store(store_name, "add CRL", crl.issuer(), e))?;
        tracing::info!(store = %store_name, issuer = %crl.issuer(), "CRL added");
        Ok(())
    }

    /// Remove a CRL from a store
    ///
    /// # Errors
    ///
    /// Returns `TrustError::NotSupported` without CRL support and
    /// `TrustError::NotFound` when the CRL is absent.
    pub async fn remove_crl(&self, store_name: CertificateStoreName, blob: &[u8]) -> Result<()> {
        let store = self.stores.get(store_name);
        if !store.supports_crls() {
            return Err(TrustError::NotSupported {
                store: store_name,
                operation: "CRLs",
            });
        }
        let crl = Crl::from_blob(blob)?;
        let deleted = store
            .delete_crl(&crl)
            .await
            .map_err(|e| TrustError::store(store_name, "delete CRL", crl.issuer(), e))?;
        if !deleted {
            return Err(TrustError::not_found(
                store_name,
                format!("CRL issued by {}", crl.issuer()),
            ));
        }
        Ok(())
    }

    /// Move a certificate from Rejected into Trusted
    ///
    /// Stale copies already in Trusted are replaced. If removing the
    /// certificate from Rejected fails, the Trusted copy is deleted again;
    /// if that rollback also fails the certificate is left in both stores
    /// and `TrustError::PartialFailure` is returned.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::NotFound` when the thumbprint is not rejected.
    pub async fn approve_rejected(&self, thumbprint: &str) -> Result<()> {
        let thumbprint = x509::sanitize_thumbprint(thumbprint)?;
        let rejected = self.stores.get(Rejected);
        let trusted = self.stores.get(Trusted);

        let cert = rejected
            .find_by_thumbprint(&thumbprint)
            .await
            .map_err(|e| TrustError::store(Rejected, "find", thumbprint.as_str(), e))?
            .into_iter()
            .next()
            .ok_or_else(|| TrustError::not_found(Rejected, thumbprint.as_str()))?;

        self.upsert(Trusted, trusted.as_ref(), &cert, None).await?;

        let failure = match rejected.delete(&thumbprint).await {
            Ok(true) => None,
            Ok(false) => Some("certificate vanished from Rejected during approval".to_string()),
            Err(e) => Some(e.to_string()),
        };
        let Some(failure) = failure else {
            tracing::info!(
                thumbprint = %thumbprint,
                subject = %cert.subject(),
                "Rejected certificate approved"
            );
            return Ok(());
        };

        tracing::warn!(
            thumbprint = %thumbprint,
            error = %failure,
            "Approve failed, rolling back Trusted copy"
        );
        match trusted.delete(&thumbprint).await {
            Ok(_) => Err(TrustError::store(Rejected, "delete", thumbprint, failure)),
            Err(rollback) => {
                tracing::error!(
                    thumbprint = %thumbprint,
                    error = %rollback,
                    "Rollback failed, certificate remains in Trusted and Rejected"
                );
                Err(TrustError::PartialFailure {
                    thumbprint,
                    subject: cert.subject().to_string(),
                    message: format!(
                        "removing from Rejected failed ({failure}), \
                         rollback from Trusted failed ({rollback})"
                    ),
                })
            }
        }
    }

    /// Add a certificate chain, leaf first
    ///
    /// The leaf goes to Trusted (Https when `is_ssl`), every other
    /// certificate to Issuer (HttpsIssuer).
    ///
    /// # Errors
    ///
    /// Returns `TrustError::ArgumentInvalid` for an empty chain.
    pub async fn add_certificate_chain(&self, blob: &[u8], is_ssl: bool) -> Result<()> {
        let chain = x509::parse_chain(blob)?;
        let (leaf_store, issuer_store) = if is_ssl {
            (Https, HttpsIssuer)
        } else {
            (Trusted, Issuer)
        };

        let mut certs = chain.into_iter();
        if let Some(leaf) = certs.next() {
            let store = self.stores.get(leaf_store);
            self.upsert(leaf_store, store.as_ref(), &leaf, None).await?;
        }
        let store = self.stores.get(issuer_store);
        for issuer in certs {
            self.upsert(issuer_store, store.as_ref(), &issuer, None).await?;
        }
        Ok(())
    }

    /// Remove a certificate and the CRLs it issued from a store
    ///
    /// CRLs are selected before the certificate is deleted and removed
    /// afterwards; a failed CRL removal is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::ArgumentInvalid` for a malformed thumbprint and
    /// `TrustError::NotFound` when no certificate matches.
    pub async fn remove_certificate(
        &self,
        store_name: CertificateStoreName,
        thumbprint: &str,
    ) -> Result<()> {
        let thumbprint = x509::sanitize_thumbprint(thumbprint)?;
        let store = self.stores.get(store_name);

        let certs = store
            .find_by_thumbprint(&thumbprint)
            .await
            .map_err(|e| TrustError::store(store_name, "find", thumbprint.as_str(), e))?;
        let Some(cert) = certs.into_iter().next() else {
            return Err(TrustError::not_found(store_name, thumbprint));
        };

        let issued_crls: Vec<Crl> = if store.supports_crls() {
            store
                .enumerate_crls()
                .await
                .map_err(|e| {
                    TrustError::store(store_name, "enumerate CRLs", thumbprint.as_str(), e)
                })?
                .into_iter()
                .filter(|crl| crl.is_issued_by(&cert))
                .collect()
        } else {
            Vec::new()
        };

        let deleted = store
            .delete(&thumbprint)
            .await
            .map_err(|e| TrustError::store(store_name, "delete", thumbprint.as_str(), e))?;
        if !deleted {
            return Err(TrustError::not_found(store_name, thumbprint));
        }

        for crl in &issued_crls {
            if let Err(e) = store.delete_crl(crl).await {
                tracing::warn!(
                    store = %store_name,
                    issuer = %crl.issuer(),
                    error = %e,
                    "Failed to delete CRL of removed certificate"
                );
            }
        }
        tracing::info!(
            store = %store_name,
            thumbprint = %thumbprint,
            crls_removed = issued_crls.len(),
            "Certificate removed"
        );
        Ok(())
    }

    /// Delete every certificate and CRL of a store, best effort
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Store` only if the store cannot be enumerated.
    pub async fn clean(&self, store_name: CertificateStoreName) -> Result<()> {
        let store = self.stores.get(store_name);
        let certs = store
            .enumerate()
            .await
            .map_err(|e| TrustError::store(store_name, "enumerate", "*", e))?;
        for cert in &certs {
            if let Err(e) = store.delete(cert.thumbprint()).await {
                tracing::warn!(
                    store = %store_name,
                    thumbprint = %cert.thumbprint(),
                    error = %e,
                    "Failed to delete certificate"
                );
            }
        }
        if store.supports_crls() {
            match store.enumerate_crls().await {
                Ok(crls) => {
                    for crl in &crls {
                        if let Err(e) = store.delete_crl(crl).await {
                            tracing::warn!(
                                store = %store_name,
                                issuer = %crl.issuer(),
                                error = %e,
                                "Failed to delete CRL"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(store = %store_name, error = %e, "Failed to enumerate CRLs");
                }
            }
        }
        tracing::info!(store = %store_name, removed = certs.len(), "Store cleaned");
        Ok(())
    }

    /// Newest Application store certificate for `subject` whose private
    /// key can be loaded
    pub(crate) async fn load_application_certificate(
        &self,
        subject: &str,
    ) -> Result<Option<Certificate>> {
        let store = self.stores.get(Application);
        let mut candidates: Vec<Certificate> = store
            .enumerate()
            .await
            .map_err(|e| TrustError::store(Application, "enumerate", "*", e))?
            .into_iter()
            .filter(|c| c.subject_matches(subject))
            .collect();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.not_after()));

        for cert in candidates {
            let password = self.password_for(store.as_ref(), &cert);
            match store
                .load_private_key(
                    cert.thumbprint(),
                    Some(subject),
                    password.as_deref().map(String::as_str),
                )
                .await
            {
                Ok(Some(with_key)) => return Ok(Some(with_key)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        thumbprint = %cert.thumbprint(),
                        error = %e,
                        "Own certificate key not loadable"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Log the content of the Application, Issuer, Trusted and Rejected stores
    pub async fn log_store_information(&self) {
        for name in [Application, Issuer, Trusted, Rejected] {
            let store = self.stores.get(name);
            match store.enumerate().await {
                Ok(certs) => {
                    tracing::info!(
                        store = %name,
                        store_type = %store.store_type(),
                        path = %store.store_path(),
                        count = certs.len(),
                        "Certificate store contents"
                    );
                    let now = SystemTime::now();
                    for cert in &certs {
                        tracing::info!(
                            store = %name,
                            subject = %cert.subject(),
                            thumbprint = %cert.thumbprint(),
                            expired = cert.not_after() < now,
                            "  certificate"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(store = %name, error = %e, "Failed to read certificate store");
                    continue;
                }
            }
            if !store.supports_crls() {
                continue;
            }
            match store.enumerate_crls().await {
                Ok(crls) => {
                    for crl in &crls {
                        tracing::info!(
                            store = %name,
                            issuer = %crl.issuer(),
                            next_update = ?crl.next_update(),
                            revoked = crl.revoked_count(),
                            "  CRL"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(store = %name, error = %e, "Failed to read CRLs");
                }
            }
        }
    }

    fn password_for(
        &self,
        store: &dyn CertificateStore,
        cert: &Certificate,
    ) -> Option<Zeroizing<String>> {
        let identifier = CertificateIdentifier {
            store_type: store.store_type(),
            store_path: store.store_path(),
            thumbprint: cert.thumbprint().to_string(),
            subject: cert.subject().to_string(),
        };
        self.passwords.get_password(&identifier)
    }

    /// Replace any same-thumbprint entries, then add
    async fn upsert(
        &self,
        store_name: CertificateStoreName,
        store: &dyn CertificateStore,
        cert: &Certificate,
        password: Option<&str>,
    ) -> Result<()> {
        let thumbprint = cert.thumbprint();
        let existing = store
            .find_by_thumbprint(thumbprint)
            .await
            .map_err(|e| TrustError::store(store_name, "find", thumbprint, e))?;
        if !existing.is_empty() {
            store
                .delete(thumbprint)
                .await
                .map_err(|e| TrustError::store(store_name, "delete", thumbprint, e))?;
            tracing::debug!(
                store = %store_name,
                thumbprint = %thumbprint,
                replaced = existing.len(),
                "Replacing existing certificate"
            );
        }
        store
            .add(cert, password)
            .await
            .map_err(|e| TrustError::store(store_name, "add", thumbprint, e))
    }
}
