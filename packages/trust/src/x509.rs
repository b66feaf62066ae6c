//! X.509 certificate and CRL value types
//!
//! Certificates and CRLs are kept as owned DER plus the handful of parsed
//! fields the trust lifecycle needs. Parsing goes through `x509-parser`,
//! PEM containers through `pem`.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use crate::error::{Result, TrustError};

/// Thumbprints longer than this are rejected before any lookup
pub const MAX_THUMBPRINT_LENGTH: usize = 64;

const PEM_CERTIFICATE: &str = "CERTIFICATE";
const PEM_PRIVATE_KEY: &str = "PRIVATE KEY";
const PEM_CRL: &str = "X509 CRL";

/// A parsed X.509 certificate, optionally carrying its PKCS#8 private key
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    thumbprint: String,
    subject: String,
    issuer: String,
    not_before: SystemTime,
    not_after: SystemTime,
    serial_number: String,
    san_uris: Vec<String>,
    san_dns_names: Vec<String>,
    common_name: Option<String>,
    is_ca: bool,
    private_key: Option<Zeroizing<Vec<u8>>>,
}

impl Certificate {
    /// Parse a DER encoded certificate
    ///
    /// # Errors
    ///
    /// Returns `TrustError::CertificateParsing` if the bytes are not a
    /// single well-formed certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, cert) = parse_x509_certificate(der)
            .map_err(|e| TrustError::parsing(format!("invalid certificate DER: {e}")))?;
        let consumed = der.len() - rest.len();

        let mut san_uris = Vec::new();
        let mut san_dns_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::URI(uri) => san_uris.push((*uri).to_string()),
                    GeneralName::DNSName(dns) => san_dns_names.push((*dns).to_string()),
                    _ => {}
                }
            }
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .is_some_and(|bc| bc.value.ca);

        Ok(Self {
            der: der[..consumed].to_vec(),
            thumbprint: thumbprint_of(&der[..consumed]),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: asn1_to_system_time(&cert.validity().not_before),
            not_after: asn1_to_system_time(&cert.validity().not_after),
            serial_number: cert.raw_serial_as_string(),
            san_uris,
            san_dns_names,
            common_name,
            is_ca,
            private_key: None,
        })
    }

    /// Parse a certificate blob: a PEM bundle (certificate plus optional
    /// PKCS#8 private key) or plain DER
    ///
    /// # Errors
    ///
    /// Returns `TrustError::CertificateParsing` when no certificate can be
    /// decoded.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if !looks_like_pem(blob) {
            return Self::from_der(blob);
        }
        let blocks = ::pem::parse_many(blob)
            .map_err(|e| TrustError::parsing(format!("invalid PEM bundle: {e}")))?;
        let cert_block = blocks
            .iter()
            .find(|p| p.tag() == PEM_CERTIFICATE)
            .ok_or_else(|| TrustError::parsing("PEM bundle contains no certificate"))?;
        let mut cert = Self::from_der(cert_block.contents())?;
        if let Some(key) = blocks.iter().find(|p| p.tag() == PEM_PRIVATE_KEY) {
            cert.private_key = Some(Zeroizing::new(key.contents().to_vec()));
        }
        Ok(cert)
    }

    /// Raw DER encoding
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding of the public certificate
    #[must_use]
    pub fn to_pem(&self) -> String {
        ::pem::encode(&::pem::Pem::new(PEM_CERTIFICATE, self.der.clone()))
    }

    /// PEM encoding of the certificate followed by its private key, if any
    #[must_use]
    pub fn to_pem_bundle(&self) -> Zeroizing<String> {
        let mut bundle = Zeroizing::new(self.to_pem());
        if let Some(key) = &self.private_key {
            bundle.push_str(&::pem::encode(&::pem::Pem::new(PEM_PRIVATE_KEY, key.to_vec())));
        }
        bundle
    }

    /// Uppercase hex SHA-1 over the DER encoding
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Subject distinguished name as rendered by the parser
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Start of the validity period
    #[must_use]
    pub fn not_before(&self) -> SystemTime {
        self.not_before
    }

    /// End of the validity period
    #[must_use]
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    /// Serial number in colon separated hex
    #[must_use]
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// URIs from the subject alternative name extension
    #[must_use]
    pub fn san_uris(&self) -> &[String] {
        &self.san_uris
    }

    /// DNS names from the subject alternative name extension
    #[must_use]
    pub fn san_dns_names(&self) -> &[String] {
        &self.san_dns_names
    }

    /// First common name of the subject
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Whether basic constraints mark this as a CA certificate
    #[must_use]
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Subject equals issuer
    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        names_equal(&self.subject, &self.issuer)
    }

    /// Whether the validity period has ended
    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() > self.not_after
    }

    /// PKCS#8 DER private key, when loaded
    #[must_use]
    pub fn private_key(&self) -> Option<&[u8]> {
        self.private_key.as_ref().map(|k| k.as_slice())
    }

    /// Whether a private key is attached
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Attach a PKCS#8 DER private key
    #[must_use]
    pub fn with_private_key(self, key: Zeroizing<Vec<u8>>) -> Self {
        Self {
            private_key: Some(key),
            ..self
        }
    }

    /// Copy of this certificate without the private key
    #[must_use]
    pub fn without_private_key(&self) -> Self {
        Self {
            private_key: None,
            ..self.clone()
        }
    }

    /// Check this certificate's subject against a configured subject name
    #[must_use]
    pub fn subject_matches(&self, subject_name: &str) -> bool {
        names_equal(&self.subject, subject_name)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("thumbprint", &self.thumbprint)
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("has_private_key", &self.private_key.is_some())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

/// A parsed certificate revocation list
#[derive(Clone)]
pub struct Crl {
    der: Vec<u8>,
    issuer: String,
    this_update: SystemTime,
    next_update: Option<SystemTime>,
    revoked_count: usize,
}

impl Crl {
    /// Parse a CRL from DER or PEM
    ///
    /// # Errors
    ///
    /// Returns `TrustError::CertificateParsing` for malformed input.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if looks_like_pem(blob) {
            let block = ::pem::parse_many(blob)
                .map_err(|e| TrustError::parsing(format!("invalid CRL PEM: {e}")))?
                .into_iter()
                .find(|p| p.tag() == PEM_CRL)
                .ok_or_else(|| TrustError::parsing("PEM contains no X509 CRL"))?;
            return Self::from_der(block.contents());
        }
        Self::from_der(blob)
    }

    /// Parse a DER encoded CRL
    ///
    /// # Errors
    ///
    /// Returns `TrustError::CertificateParsing` for malformed input.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, crl) = parse_x509_crl(der)
            .map_err(|e| TrustError::parsing(format!("invalid CRL DER: {e}")))?;
        Ok(Self {
            der: der.to_vec(),
            issuer: crl.issuer().to_string(),
            this_update: asn1_to_system_time(&crl.last_update()),
            next_update: crl.next_update().map(|t| asn1_to_system_time(&t)),
            revoked_count: crl.iter_revoked_certificates().count(),
        })
    }

    /// Raw DER encoding
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Issuer distinguished name
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// When this CRL was issued
    #[must_use]
    pub fn this_update(&self) -> SystemTime {
        self.this_update
    }

    /// When the next CRL is expected
    #[must_use]
    pub fn next_update(&self) -> Option<SystemTime> {
        self.next_update
    }

    /// Number of revoked entries
    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.revoked_count
    }

    /// Identifier used for CRL file names, hex SHA-1 of the DER
    #[must_use]
    pub fn fingerprint(&self) -> String {
        thumbprint_of(&self.der)
    }

    /// Whether `issuer` issued this CRL: names match and the signature
    /// verifies against the issuer's public key
    #[must_use]
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        if !names_equal(&self.issuer, issuer.subject()) {
            return false;
        }
        let Ok((_, crl)) = parse_x509_crl(&self.der) else {
            return false;
        };
        let Ok((_, cert)) = parse_x509_certificate(issuer.der()) else {
            return false;
        };
        match crl.verify_signature(cert.public_key()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    crl_issuer = %self.issuer,
                    thumbprint = %issuer.thumbprint(),
                    error = %e,
                    "CRL signature does not verify against certificate"
                );
                false
            }
        }
    }
}

impl fmt::Debug for Crl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crl")
            .field("issuer", &self.issuer)
            .field("next_update", &self.next_update)
            .field("revoked_count", &self.revoked_count)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Crl {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Crl {}

/// Parse a certificate chain, leaf first
///
/// Accepts a PEM bundle or concatenated DER certificates.
///
/// # Errors
///
/// Returns `TrustError::ArgumentInvalid` for an empty chain and
/// `TrustError::CertificateParsing` for undecodable content.
pub fn parse_chain(blob: &[u8]) -> Result<Vec<Certificate>> {
    if blob.is_empty() {
        return Err(TrustError::ArgumentInvalid(
            "certificate chain is empty".to_string(),
        ));
    }
    let chain = if looks_like_pem(blob) {
        ::pem::parse_many(blob)
            .map_err(|e| TrustError::parsing(format!("invalid PEM chain: {e}")))?
            .iter()
            .filter(|p| p.tag() == PEM_CERTIFICATE)
            .map(|p| Certificate::from_der(p.contents()))
            .collect::<Result<Vec<_>>>()?
    } else {
        let mut chain = Vec::new();
        let mut remaining = blob;
        while !remaining.is_empty() {
            let cert = Certificate::from_der(remaining)?;
            remaining = &remaining[cert.der().len()..];
            chain.push(cert);
        }
        chain
    };
    if chain.is_empty() {
        return Err(TrustError::ArgumentInvalid(
            "certificate chain contains no certificates".to_string(),
        ));
    }
    Ok(chain)
}

/// Uppercase hex SHA-1 of a DER blob
#[must_use]
pub fn thumbprint_of(der: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(der))
}

/// Normalize a caller supplied thumbprint
///
/// Input longer than [`MAX_THUMBPRINT_LENGTH`] is rejected as is, then line
/// endings and whitespace are stripped and the result uppercased.
///
/// # Errors
///
/// Returns `TrustError::ArgumentInvalid` for over-length or empty input.
pub fn sanitize_thumbprint(thumbprint: &str) -> Result<String> {
    if thumbprint.len() > MAX_THUMBPRINT_LENGTH {
        return Err(TrustError::ArgumentInvalid(format!(
            "thumbprint exceeds {MAX_THUMBPRINT_LENGTH} characters"
        )));
    }
    let sanitized: String = thumbprint
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    if sanitized.is_empty() {
        return Err(TrustError::ArgumentInvalid("thumbprint is empty".to_string()));
    }
    Ok(sanitized)
}

/// Compare two distinguished names ignoring case and RDN spacing
#[must_use]
pub fn names_equal(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

fn normalize_name(name: &str) -> Vec<String> {
    name.split(',')
        .map(|rdn| {
            rdn.split_once('=')
                .map(|(k, v)| format!("{}={}", k.trim(), v.trim()))
                .unwrap_or_else(|| rdn.trim().to_string())
                .to_lowercase()
        })
        .filter(|rdn| !rdn.is_empty())
        .collect()
}

fn looks_like_pem(blob: &[u8]) -> bool {
    blob.iter()
        .position(|b| !b.is_ascii_whitespace())
        .is_some_and(|start| blob[start..].starts_with(b"-----BEGIN"))
}

fn asn1_to_system_time(time: &ASN1Time) -> SystemTime {
    let secs = time.timestamp();
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}
