//! Self-signed application instance certificates

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use zeroize::Zeroizing;

use crate::error::{Result, TrustError};
use crate::x509::Certificate;

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);
const DOMAIN_COMPONENT_OID: [u64; 7] = [0, 9, 2342, 19_200_300, 100, 1, 25];

/// Create a self-signed application certificate valid since yesterday
///
/// The subject alternative name carries the application uri and the host
/// name (as DNS name or IP address).
///
/// # Errors
///
/// Returns `TrustError::ArgumentInvalid` for an unparsable subject and
/// `TrustError::KeyProtection` when generation fails.
pub(crate) fn create_self_signed(
    subject: &str,
    application_uri: &str,
    host_name: &str,
    lifetime_days: u32,
) -> Result<Certificate> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = parse_distinguished_name(subject)?;

    let host_san = match host_name.parse::<IpAddr>() {
        Ok(ip) => SanType::IpAddress(ip),
        Err(_) => SanType::DnsName(host_name.try_into()?),
    };
    params.subject_alt_names = vec![SanType::URI(application_uri.try_into()?), host_san];

    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::ContentCommitment,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DataEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    let now = SystemTime::now();
    params.not_before = (now - ONE_DAY).into();
    params.not_after = (now + ONE_DAY * lifetime_days.max(1)).into();

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    let certificate = Certificate::from_der(cert.der())?
        .with_private_key(Zeroizing::new(key_pair.serialize_der()));
    tracing::info!(
        subject = %certificate.subject(),
        thumbprint = %certificate.thumbprint(),
        lifetime_days,
        "Created self-signed application certificate"
    );
    Ok(certificate)
}

/// Parse `CN=..., O=..., DC=...` into an rcgen distinguished name
fn parse_distinguished_name(subject: &str) -> Result<DistinguishedName> {
    let mut dn = DistinguishedName::new();
    for rdn in subject.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        let (key, value) = rdn.split_once('=').ok_or_else(|| {
            TrustError::ArgumentInvalid(format!("malformed subject component '{rdn}'"))
        })?;
        let value = value.trim().trim_matches('"');
        let dn_type = match key.trim().to_ascii_uppercase().as_str() {
            "CN" => DnType::CommonName,
            "O" => DnType::OrganizationName,
            "OU" => DnType::OrganizationalUnitName,
            "C" => DnType::CountryName,
            "L" => DnType::LocalityName,
            "S" | "ST" => DnType::StateOrProvinceName,
            "DC" => DnType::CustomDnType(DOMAIN_COMPONENT_OID.to_vec()),
            other => {
                return Err(TrustError::ArgumentInvalid(format!(
                    "unsupported subject attribute '{other}'"
                )));
            }
        };
        dn.push(dn_type, value);
    }
    if dn.iter().next().is_none() {
        return Err(TrustError::ArgumentInvalid("subject name is empty".to_string()));
    }
    Ok(dn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_certificate_carries_uri_and_dns() {
        let cert = create_self_signed(
            "CN=line-7, O=Plant",
            "urn:plc-gw:ualink:client",
            "plc-gw",
            30,
        )
        .expect("certificate");
        assert!(cert.has_private_key());
        assert!(cert.is_self_signed());
        assert_eq!(cert.common_name(), Some("line-7"));
        assert_eq!(cert.san_uris(), ["urn:plc-gw:ualink:client".to_string()]);
        assert_eq!(cert.san_dns_names(), ["plc-gw".to_string()]);
        assert!(cert.subject_matches("CN=line-7,O=Plant"));
    }

    #[test]
    fn unknown_subject_attributes_are_rejected() {
        assert!(parse_distinguished_name("XX=foo").is_err());
        assert!(parse_distinguished_name("").is_err());
    }
}
