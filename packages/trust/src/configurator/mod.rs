//! Application identity bootstrap
//!
//! [`ApplicationConfigurator`] resolves the host name, application uri and
//! certificate subject, then loads or creates the own certificate. The whole
//! sequence is retried a bounded number of times; only waiting for the
//! network to come up is unbounded.

mod certificate;
mod host;

use std::sync::Arc;

use crate::error::{Result, TrustError};
use crate::identity::{ApplicationIdentity, IdentityHandle, SecurityConfiguration};
use crate::options::ApplicationOptions;
use crate::password::{CertificatePasswordProvider, NoPassword};
use crate::store::CertificateStoreName;
use crate::stores::CertificateStores;
use crate::trust_manager::TrustManager;

pub use host::{
    HostEnvironment, SystemHostEnvironment, is_valid_host_name, pseudo_host_name,
    replace_dc_localhost, sanitize_host_name_override,
};

/// Outcome of a successful bootstrap
#[derive(Debug, Clone)]
pub struct ConfiguredApplication {
    /// Current identity, rotatable
    pub identity: IdentityHandle,
    /// Certificates surface bound to that identity
    pub trust: TrustManager,
}

/// Builds the application identity with bounded retries
pub struct ApplicationConfigurator {
    options: ApplicationOptions,
    passwords: Arc<dyn CertificatePasswordProvider>,
    host: Arc<dyn HostEnvironment>,
    stores: Option<CertificateStores>,
}

impl std::fmt::Debug for ApplicationConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationConfigurator")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Values resolved before the own certificate is materialized
struct ResolvedNames {
    application_name: String,
    application_uri: String,
    host_name: String,
    subject_name: String,
}

impl ApplicationConfigurator {
    /// Configurator for the real host with no key passwords
    #[must_use]
    pub fn new(options: ApplicationOptions) -> Self {
        Self {
            options,
            passwords: Arc::new(NoPassword),
            host: Arc::new(SystemHostEnvironment),
            stores: None,
        }
    }

    /// Use a password provider for private keys
    #[must_use]
    pub fn with_password_provider(self, passwords: Arc<dyn CertificatePasswordProvider>) -> Self {
        Self { passwords, ..self }
    }

    /// Use a different host environment
    #[must_use]
    pub fn with_host_environment(self, host: Arc<dyn HostEnvironment>) -> Self {
        Self { host, ..self }
    }

    /// Use already opened stores instead of opening them from the options
    #[must_use]
    pub fn with_stores(self, stores: CertificateStores) -> Self {
        Self {
            stores: Some(stores),
            ..self
        }
    }

    /// Run the bootstrap loop
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Configuration` once every attempt has failed.
    pub async fn configure(&self) -> Result<ConfiguredApplication> {
        let attempts = self.options.configuration_attempts.max(1);
        let stores = self.open_stores();
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.try_configure(&stores).await {
                Ok(configured) => return Ok(configured),
                Err(e) => {
                    tracing::info!(
                        attempt,
                        attempts,
                        error = %e,
                        "Configuring application failed - retry"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.options.configuration_retry_delay).await;
                    }
                }
            }
        }
        tracing::error!(attempts, "Failed to configure application");
        Err(TrustError::Configuration(match last_error {
            Some(e) => format!(
                "application configuration not possible after {attempts} attempts: {e}"
            ),
            None => "application configuration not possible".to_string(),
        }))
    }

    fn open_stores(&self) -> CertificateStores {
        if let Some(stores) = &self.stores {
            return stores.clone();
        }
        let security = &self.options.security;
        // User trust store may hold private keys so user identities can be side loaded
        let user_store = security
            .location(CertificateStoreName::User)
            .open(true, true);
        CertificateStores::open(security).replace(CertificateStoreName::User, user_store)
    }

    async fn try_configure(&self, stores: &CertificateStores) -> Result<ConfiguredApplication> {
        let security = &self.options.security;
        let trust = TrustManager::new(
            stores.clone(),
            Arc::clone(&self.passwords),
            security.add_app_cert_to_trusted_store,
        );

        let names = self.resolve_names(&trust).await?;
        let certificate = match trust.load_application_certificate(&names.subject_name).await? {
            Some(cert) => {
                tracing::info!(
                    subject = %cert.subject(),
                    thumbprint = %cert.thumbprint(),
                    "Own certificate loaded"
                );
                cert
            }
            None => {
                tracing::info!(
                    subject = %names.subject_name,
                    lifetime_days = security.certificate_lifetime_days,
                    "No own certificate found, creating a self-signed one valid since yesterday"
                );
                let created = certificate::create_self_signed(
                    &names.subject_name,
                    &names.application_uri,
                    &names.host_name,
                    security.certificate_lifetime_days,
                )?;
                trust
                    .add_certificate(
                        CertificateStoreName::Application,
                        created.to_pem_bundle().as_bytes(),
                        None,
                    )
                    .await?;
                trust
                    .load_application_certificate(&names.subject_name)
                    .await?
                    .ok_or_else(|| {
                        TrustError::Configuration(
                            "own certificate could not be loaded after creation".to_string(),
                        )
                    })?
            }
        };

        if !certificate
            .san_uris()
            .iter()
            .any(|uri| uri == &names.application_uri)
        {
            tracing::warn!(
                application_uri = %names.application_uri,
                certificate_uris = ?certificate.san_uris(),
                "Own certificate does not carry the application uri"
            );
        }

        let identity = IdentityHandle::new(ApplicationIdentity {
            application_name: names.application_name,
            application_uri: names.application_uri,
            product_uri: self.options.product_uri.clone(),
            subject_name: names.subject_name,
            host_name: names.host_name,
            certificate,
            security: SecurityConfiguration {
                quotas: self.options.quotas.clone(),
                auto_accept_untrusted_certificates: security.auto_accept_untrusted_certificates,
                minimum_certificate_key_size: security.minimum_certificate_key_size,
                reject_sha1_signed_certificates: security.reject_sha1_signed_certificates,
                add_app_cert_to_trusted_store: security.add_app_cert_to_trusted_store,
                reject_unknown_revocation_status: security.reject_unknown_revocation_status,
            },
        });
        let trust = trust.with_identity(identity.clone());
        trust.log_store_information().await;
        Ok(ConfiguredApplication { identity, trust })
    }

    async fn resolve_names(&self, trust: &TrustManager) -> Result<ResolvedNames> {
        let security = &self.options.security;
        let mut application_name = self.options.application_name.clone();
        let mut application_uri = self.options.application_uri.clone();
        let mut host_name = security
            .host_name
            .as_deref()
            .map(sanitize_host_name_override);

        let mut subject_name = match &security.application_certificate_subject_name {
            Some(subject) => subject.clone(),
            None => {
                let host = match &host_name {
                    Some(host) => host.clone(),
                    None => self.machine_host_name().await?,
                };
                let subject = format!("CN={host}");
                host_name = Some(host);
                subject
            }
        };

        if security.update_application_from_existing_cert {
            if let Some((uri, name, host, subject)) = self.names_from_existing(trust).await {
                application_uri = uri;
                if let Some(name) = name {
                    application_name = name;
                }
                host_name = Some(host);
                subject_name = subject;
            }
        }

        let host_name = match host_name {
            Some(host) => host,
            None => self.machine_host_name().await?,
        };
        let application_uri = application_uri.replace("urn:localhost", &format!("urn:{host_name}"));
        let subject_name = replace_dc_localhost(&subject_name, &host_name);

        Ok(ResolvedNames {
            application_name,
            application_uri,
            host_name,
            subject_name,
        })
    }

    /// First Application store certificate, by expiry, whose SAN has both a
    /// uri and a DNS name
    async fn names_from_existing(
        &self,
        trust: &TrustManager,
    ) -> Option<(String, Option<String>, String, String)> {
        let mut certs = match trust
            .list_certificates(CertificateStoreName::Application, false)
            .await
        {
            Ok(certs) => certs,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read own certificates for configuration");
                return None;
            }
        };
        certs.sort_by_key(|c| c.not_after());
        for cert in &certs {
            if let (Some(uri), Some(dns)) =
                (cert.san_uris().first(), cert.san_dns_names().first())
            {
                return Some((
                    uri.clone(),
                    cert.common_name().map(str::to_string),
                    dns.clone(),
                    cert.subject().to_string(),
                ));
            }
            tracing::debug!(
                subject = %cert.subject(),
                thumbprint = %cert.thumbprint(),
                "Certificate lacks uri or DNS name, not usable for configuration"
            );
        }
        tracing::debug!("No own certificate to take configuration from");
        None
    }

    /// Machine host name, waiting as long as the network is unavailable
    async fn machine_host_name(&self) -> Result<String> {
        loop {
            if !self.host.is_network_available().await {
                tracing::warn!("Network not available...");
                tokio::time::sleep(self.options.network_poll_interval).await;
                continue;
            }
            let name = self.host.host_name()?;
            if !name.trim().is_empty() {
                return Ok(name);
            }
            tokio::time::sleep(self.options.network_poll_interval).await;
        }
    }
}
