//! Application and security configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{CertificateStoreName, StoreLocation, StoreType};

/// Serde adapter storing a `Duration` as whole milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as milliseconds
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Transport limits applied to every secure channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportQuotas {
    /// Timeout for a single service call
    #[serde(with = "duration_ms")]
    pub operation_timeout: Duration,
    /// Largest string accepted
    pub max_string_length: u32,
    /// Largest byte string accepted
    pub max_byte_string_length: u32,
    /// Largest array accepted
    pub max_array_length: u32,
    /// Largest encoded message
    pub max_message_size: u32,
    /// Transport buffer size
    pub max_buffer_size: u32,
    /// Secure channel lifetime
    #[serde(with = "duration_ms")]
    pub channel_lifetime: Duration,
    /// Security token lifetime
    #[serde(with = "duration_ms")]
    pub security_token_lifetime: Duration,
}

impl Default for TransportQuotas {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(120),
            max_string_length: 4 * 1024 * 1024,
            max_byte_string_length: 4 * 1024 * 1024,
            max_array_length: 65_535,
            max_message_size: 4 * 1024 * 1024,
            max_buffer_size: 65_535,
            channel_lifetime: Duration::from_secs(300),
            security_token_lifetime: Duration::from_secs(3600),
        }
    }
}

/// PKI and certificate validation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityOptions {
    /// Root directory holding the per-store directories
    pub pki_root_path: PathBuf,
    /// Backend used for stores without an explicit location
    pub store_type: StoreType,
    /// Per-store location overrides
    pub stores: HashMap<CertificateStoreName, StoreLocation>,
    /// Subject of the own certificate, defaults to `CN=<hostname>`
    pub application_certificate_subject_name: Option<String>,
    /// Host name override; invalid names are replaced by a stable pseudo name
    pub host_name: Option<String>,
    /// Take application uri, name and host from an existing own certificate
    pub update_application_from_existing_cert: bool,
    /// Accept untrusted server certificates
    pub auto_accept_untrusted_certificates: bool,
    /// Reject certificates signed with SHA-1
    pub reject_sha1_signed_certificates: bool,
    /// Minimum accepted RSA key size in bits
    pub minimum_certificate_key_size: u16,
    /// Copy the own certificate into the Trusted store
    pub add_app_cert_to_trusted_store: bool,
    /// Reject certificates whose revocation status is unknown
    pub reject_unknown_revocation_status: bool,
    /// Validity of self-signed own certificates
    pub certificate_lifetime_days: u32,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            pki_root_path: PathBuf::from("pki"),
            store_type: StoreType::Directory,
            stores: HashMap::new(),
            application_certificate_subject_name: None,
            host_name: None,
            update_application_from_existing_cert: false,
            auto_accept_untrusted_certificates: false,
            reject_sha1_signed_certificates: true,
            minimum_certificate_key_size: 1024,
            add_app_cert_to_trusted_store: true,
            reject_unknown_revocation_status: true,
            certificate_lifetime_days: 365,
        }
    }
}

impl SecurityOptions {
    /// In-memory stores, useful for tests and ephemeral clients
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store_type: StoreType::Memory,
            pki_root_path: PathBuf::from("memory"),
            ..Self::default()
        }
    }

    /// Location of a logical store
    #[must_use]
    pub fn location(&self, name: CertificateStoreName) -> StoreLocation {
        self.stores.get(&name).cloned().unwrap_or_else(|| StoreLocation {
            store_type: self.store_type,
            path: self.pki_root_path.join(name.default_directory()),
        })
    }
}

/// Identity and bootstrap settings of the client application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplicationOptions {
    /// Application name
    pub application_name: String,
    /// Application uri; `urn:localhost` is replaced with the host name
    pub application_uri: String,
    /// Product uri
    pub product_uri: String,
    /// Security settings
    pub security: SecurityOptions,
    /// Transport limits
    pub quotas: TransportQuotas,
    /// Bootstrap attempts before giving up
    pub configuration_attempts: u32,
    /// Pause between bootstrap attempts
    #[serde(with = "duration_ms")]
    pub configuration_retry_delay: Duration,
    /// Pause between network availability checks
    #[serde(with = "duration_ms")]
    pub network_poll_interval: Duration,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            application_name: "ualink client".to_string(),
            application_uri: "urn:localhost:ualink:client".to_string(),
            product_uri: "urn:ualink".to_string(),
            security: SecurityOptions::default(),
            quotas: TransportQuotas::default(),
            configuration_attempts: 60,
            configuration_retry_delay: Duration::from_secs(3),
            network_poll_interval: Duration::from_secs(3),
        }
    }
}
