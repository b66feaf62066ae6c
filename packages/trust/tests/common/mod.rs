//! Shared fixtures: generated certificates, CRLs and in-memory stores

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
    date_time_ymd,
};
use ualink_trust::{
    Certificate, CertificateIdentifier, CertificatePasswordProvider, CertificateStore,
    CertificateStoreName, CertificateStores, Crl, MemoryStore, StoreType,
};
use zeroize::Zeroizing;

/// A generated CA able to sign certificates and CRLs
pub struct TestCa {
    pub der: Vec<u8>,
    pub issuer: Issuer<'static, KeyPair>,
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        Self::build(common_name, None)
    }

    /// Intermediate CA signed by `parent`
    pub fn intermediate(common_name: &str, parent: &TestCa) -> Self {
        Self::build(common_name, Some(parent))
    }

    fn build(common_name: &str, parent: Option<&TestCa>) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let key = KeyPair::generate().expect("key pair");
        let cert = match parent {
            Some(parent) => params.signed_by(&key, &parent.issuer).expect("signed CA"),
            None => params.self_signed(&key).expect("self-signed CA"),
        };
        Self {
            der: cert.der().to_vec(),
            issuer: Issuer::new(params, key),
        }
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(&self.der).expect("CA certificate parses")
    }

    /// Leaf certificate signed by this CA
    pub fn leaf(&self, common_name: &str) -> Vec<u8> {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.subject_alt_names = vec![SanType::DnsName(
            common_name.to_string().try_into().expect("dns name"),
        )];
        let key = KeyPair::generate().expect("key pair");
        params
            .signed_by(&key, &self.issuer)
            .expect("signed leaf")
            .der()
            .to_vec()
    }

    /// Empty CRL signed by this CA
    pub fn crl(&self) -> Vec<u8> {
        let params = CertificateRevocationListParams {
            this_update: date_time_ymd(2024, 1, 1),
            next_update: date_time_ymd(2099, 1, 1),
            crl_number: SerialNumber::from_slice(&[1]),
            issuing_distribution_point: None,
            revoked_certs: Vec::new(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params
            .signed_by(&self.issuer)
            .expect("signed CRL")
            .der()
            .to_vec()
    }
}

/// Self-signed certificate bundle (PEM, with private key)
pub fn self_signed_bundle(common_name: &str, uri: &str) -> String {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![
        SanType::URI(uri.to_string().try_into().expect("uri")),
        SanType::DnsName(common_name.to_string().try_into().expect("dns")),
    ];
    let key = KeyPair::generate().expect("key pair");
    let cert = params.self_signed(&key).expect("self-signed");
    format!("{}{}", cert.pem(), key.serialize_pem())
}

/// In-memory stores laid out like a real application
pub fn memory_stores() -> CertificateStores {
    CertificateStores::from_fn(|name| {
        let is_application = name == CertificateStoreName::Application;
        Arc::new(
            MemoryStore::new(name.to_string())
                .with_crl_support(!is_application)
                .with_private_keys(is_application),
        )
    })
}

/// Password provider that counts lookups
#[derive(Default)]
pub struct CountingPasswords {
    pub calls: AtomicUsize,
    pub seen: std::sync::Mutex<Vec<CertificateIdentifier>>,
}

impl CountingPasswords {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificatePasswordProvider for CountingPasswords {
    fn get_password(&self, identifier: &CertificateIdentifier) -> Option<Zeroizing<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("lock")
            .push(identifier.clone());
        Some(Zeroizing::new("s3cret".to_string()))
    }
}

/// Memory store whose deletes can be made to fail
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_delete: AtomicBool,
}

impl FlakyStore {
    pub fn new(label: &str) -> Self {
        Self {
            inner: MemoryStore::new(label),
            fail_delete: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CertificateStore for FlakyStore {
    fn store_type(&self) -> StoreType {
        self.inner.store_type()
    }

    fn store_path(&self) -> String {
        self.inner.store_path()
    }

    fn supports_crls(&self) -> bool {
        self.inner.supports_crls()
    }

    fn supports_private_keys(&self) -> bool {
        self.inner.supports_private_keys()
    }

    async fn enumerate(&self) -> ualink_trust::Result<Vec<Certificate>> {
        self.inner.enumerate().await
    }

    async fn add(
        &self,
        certificate: &Certificate,
        password: Option<&str>,
    ) -> ualink_trust::Result<()> {
        self.inner.add(certificate, password).await
    }

    async fn delete(&self, thumbprint: &str) -> ualink_trust::Result<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ualink_trust::TrustError::Io(std::io::Error::other("disk gone")));
        }
        self.inner.delete(thumbprint).await
    }

    async fn find_by_thumbprint(&self, thumbprint: &str) -> ualink_trust::Result<Vec<Certificate>> {
        self.inner.find_by_thumbprint(thumbprint).await
    }

    async fn load_private_key(
        &self,
        thumbprint: &str,
        subject: Option<&str>,
        password: Option<&str>,
    ) -> ualink_trust::Result<Option<Certificate>> {
        self.inner.load_private_key(thumbprint, subject, password).await
    }

    async fn enumerate_crls(&self) -> ualink_trust::Result<Vec<Crl>> {
        self.inner.enumerate_crls().await
    }

    async fn add_crl(&self, crl: &Crl) -> ualink_trust::Result<()> {
        self.inner.add_crl(crl).await
    }

    async fn delete_crl(&self, crl: &Crl) -> ualink_trust::Result<bool> {
        self.inner.delete_crl(crl).await
    }
}
