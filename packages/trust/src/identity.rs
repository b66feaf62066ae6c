//! The client's cryptographic identity

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::options::TransportQuotas;
use crate::x509::Certificate;

/// Validation and transport settings in effect for the application
#[derive(Debug, Clone)]
pub struct SecurityConfiguration {
    /// Transport limits
    pub quotas: TransportQuotas,
    /// Accept untrusted server certificates
    pub auto_accept_untrusted_certificates: bool,
    /// Minimum accepted RSA key size in bits
    pub minimum_certificate_key_size: u16,
    /// Reject certificates signed with SHA-1
    pub reject_sha1_signed_certificates: bool,
    /// Copy the own certificate into the Trusted store
    pub add_app_cert_to_trusted_store: bool,
    /// Reject certificates whose revocation status is unknown
    pub reject_unknown_revocation_status: bool,
}

/// Resolved application identity
#[derive(Debug, Clone)]
pub struct ApplicationIdentity {
    /// Application name
    pub application_name: String,
    /// Application uri with the host name substituted
    pub application_uri: String,
    /// Product uri
    pub product_uri: String,
    /// Subject of the own certificate
    pub subject_name: String,
    /// Host name used in uri and subject
    pub host_name: String,
    /// Own certificate including its private key
    pub certificate: Certificate,
    /// Security settings
    pub security: SecurityConfiguration,
}

impl ApplicationIdentity {
    /// Copy with a different own certificate
    #[must_use]
    pub fn with_certificate(&self, certificate: Certificate) -> Self {
        Self {
            certificate,
            ..self.clone()
        }
    }
}

/// Shared, atomically replaceable handle to the current identity
///
/// Readers always observe a complete identity; rotation swaps the whole
/// value.
#[derive(Debug, Clone)]
pub struct IdentityHandle {
    current: Arc<ArcSwap<ApplicationIdentity>>,
}

impl IdentityHandle {
    /// Wrap an initial identity
    #[must_use]
    pub fn new(identity: ApplicationIdentity) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(identity)),
        }
    }

    /// Snapshot of the current identity
    #[must_use]
    pub fn load(&self) -> Arc<ApplicationIdentity> {
        self.current.load_full()
    }

    /// Replace the own certificate, keeping everything else
    pub fn rotate_certificate(&self, certificate: Certificate) {
        let previous = self.current.load();
        let thumbprint_old = previous.certificate.thumbprint().to_string();
        let thumbprint_new = certificate.thumbprint().to_string();
        self.current
            .rcu(|identity| Arc::new(identity.with_certificate(certificate.clone())));
        tracing::info!(
            old = %thumbprint_old,
            new = %thumbprint_new,
            "Application certificate rotated"
        );
    }
}
