//! Filesystem backed certificate store
//!
//! Layout below the store root:
//!
//! ```text
//! certs/<name> [<THUMBPRINT>].der
//! private/<name> [<THUMBPRINT>].key
//! crl/<FINGERPRINT>.crl
//! ```
//!
//! Private key files are sealed with the password supplied on add.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::key_protection;
use super::{CertificateStore, StoreType};
use crate::error::{Result, TrustError};
use crate::x509::{Certificate, Crl};

const CERTS_DIR: &str = "certs";
const PRIVATE_DIR: &str = "private";
const CRL_DIR: &str = "crl";

/// Certificate store rooted at a directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    supports_crls: bool,
    private_keys: bool,
}

impl DirectoryStore {
    /// Create a store rooted at `root`; directories are created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            supports_crls: true,
            private_keys: true,
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

    /// Store root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn certs_dir(&self) -> PathBuf {
        self.root.join(CERTS_DIR)
    }

    fn private_dir(&self) -> PathBuf {
        self.root.join(PRIVATE_DIR)
    }

    fn crl_dir(&self) -> PathBuf {
        self.root.join(CRL_DIR)
    }

    fn file_stem(certificate: &Certificate) -> String {
        let name: String = certificate
            .common_name()
            .unwrap_or("certificate")
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        format!("{name} [{}]", certificate.thumbprint())
    }

    /// Parse every certificate file, paired with its file stem
    async fn read_entries(&self) -> Result<Vec<(String, Certificate)>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(self.certs_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("der") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            match Certificate::from_der(&bytes) {
                Ok(cert) => entries.push((stem, cert)),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable certificate file"
                    );
                }
            }
        }
        Ok(entries)
    }

    fn crls_unsupported(&self) -> TrustError {
        TrustError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("store at {} does not support CRLs", self.root.display()),
        ))
    }
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CertificateStore for DirectoryStore {
    fn store_type(&self) -> StoreType {
        StoreType::Directory
    }

    fn store_path(&self) -> String {
        self.root.display().to_string()
    }

    fn supports_crls(&self) -> bool {
        self.supports_crls
    }

    fn supports_private_keys(&self) -> bool {
        self.private_keys
    }

    async fn enumerate(&self) -> Result<Vec<Certificate>> {
        Ok(self
            .read_entries()
            .await?
            .into_iter()
            .map(|(_, cert)| cert)
            .collect())
    }

    async fn add(&self, certificate: &Certificate, password: Option<&str>) -> Result<()> {
        let stem = Self::file_stem(certificate);
        let certs_dir = self.certs_dir();
        tokio::fs::create_dir_all(&certs_dir).await?;
        tokio::fs::write(certs_dir.join(format!("{stem}.der")), certificate.der()).await?;

        let Some(key) = certificate.private_key().filter(|_| self.private_keys) else {
            return Ok(());
        };
        let sealed = key_protection::seal(key, password)?;
        let private_dir = self.private_dir();
        tokio::fs::create_dir_all(&private_dir).await?;
        let key_path = private_dir.join(format!("{stem}.key"));
        tokio::fs::write(&key_path, &sealed).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(&key_path).await?.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&key_path, perms).await?;
        }

        tracing::debug!(
            thumbprint = %certificate.thumbprint(),
            store = %self.root.display(),
            "Stored certificate with private key"
        );
        Ok(())
    }

    async fn delete(&self, thumbprint: &str) -> Result<bool> {
        let mut found = false;
        for (stem, cert) in self.read_entries().await? {
            if !cert.thumbprint().eq_ignore_ascii_case(thumbprint) {
                continue;
            }
            found |= remove_if_exists(&self.certs_dir().join(format!("{stem}.der"))).await?;
            remove_if_exists(&self.private_dir().join(format!("{stem}.key"))).await?;
        }
        Ok(found)
    }

    async fn find_by_thumbprint(&self, thumbprint: &str) -> Result<Vec<Certificate>> {
        Ok(self
            .read_entries()
            .await?
            .into_iter()
            .filter(|(_, cert)| cert.thumbprint().eq_ignore_ascii_case(thumbprint))
            .map(|(_, cert)| cert)
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
        for (stem, cert) in self.read_entries().await? {
            if !cert.thumbprint().eq_ignore_ascii_case(thumbprint) {
                continue;
            }
            if subject.is_some_and(|s| !cert.subject_matches(s)) {
                continue;
            }
            let key_path = self.private_dir().join(format!("{stem}.key"));
            let sealed = match tokio::fs::read(&key_path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let key = key_protection::open(&sealed, password)?;
            return Ok(Some(cert.with_private_key(key)));
        }
        Ok(None)
    }

    async fn enumerate_crls(&self) -> Result<Vec<Crl>> {
        if !self.supports_crls {
            return Err(self.crls_unsupported());
        }
        let mut crls = Vec::new();
        let mut dir = match tokio::fs::read_dir(self.crl_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(crls),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("crl") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match Crl::from_blob(&bytes) {
                Ok(crl) => crls.push(crl),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable CRL file"
                    );
                }
            }
        }
        Ok(crls)
    }

    async fn add_crl(&self, crl: &Crl) -> Result<()> {
        if !self.supports_crls {
            return Err(self.crls_unsupported());
        }
        let crl_dir = self.crl_dir();
        tokio::fs::create_dir_all(&crl_dir).await?;
        tokio::fs::write(crl_dir.join(format!("{}.crl", crl.fingerprint())), crl.der()).await?;
        Ok(())
    }

    async fn delete_crl(&self, crl: &Crl) -> Result<bool> {
        if !self.supports_crls {
            return Err(self.crls_unsupported());
        }
        remove_if_exists(&self.crl_dir().join(format!("{}.crl", crl.fingerprint()))).await
    }
}
