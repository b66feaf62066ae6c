//! Host name resolution and network availability

use std::net::{IpAddr, Ipv6Addr};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Result, TrustError};

/// Facts about the machine the client runs on
#[async_trait]
pub trait HostEnvironment: Send + Sync {
    /// Whether a network route is currently available
    async fn is_network_available(&self) -> bool;

    /// Machine host name
    ///
    /// # Errors
    ///
    /// Returns an error when the name cannot be read.
    fn host_name(&self) -> Result<String>;
}

/// The real machine
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostEnvironment;

#[async_trait]
impl HostEnvironment for SystemHostEnvironment {
    async fn is_network_available(&self) -> bool {
        // Connecting a UDP socket only resolves a route, nothing is sent
        let Ok(socket) = tokio::net::UdpSocket::bind("0.0.0.0:0").await else {
            return false;
        };
        if socket.connect("192.0.2.1:9").await.is_err() {
            return false;
        }
        socket
            .local_addr()
            .is_ok_and(|addr| !addr.ip().is_unspecified() && !addr.ip().is_loopback())
    }

    fn host_name(&self) -> Result<String> {
        hostname::get()
            .map_err(TrustError::Io)?
            .into_string()
            .map_err(|_| TrustError::Configuration("host name is not valid UTF-8".to_string()))
    }
}

/// Whether `name` is usable as a host: an IP address or a DNS name
#[must_use]
pub fn is_valid_host_name(name: &str) -> bool {
    if name.parse::<IpAddr>().is_ok() {
        return true;
    }
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.is_empty() || trimmed.len() > 253 {
        return false;
    }
    trimmed.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// Stable replacement for an unusable host name override
///
/// The first 16 bytes of SHA-256 over the name, rendered as an IPv6
/// address.
#[must_use]
pub fn pseudo_host_name(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&digest[..16]);
    Ipv6Addr::from(octets).to_string()
}

/// Apply the override rule: keep valid names, hash the rest
#[must_use]
pub fn sanitize_host_name_override(name: &str) -> String {
    if is_valid_host_name(name) {
        name.to_string()
    } else {
        let pseudo = pseudo_host_name(name);
        tracing::warn!(
            host_name = %name,
            replacement = %pseudo,
            "Configured host name is invalid, using pseudo host name"
        );
        pseudo
    }
}

/// Replace a `DC=localhost` component of a subject with the host name
#[must_use]
pub fn replace_dc_localhost(subject: &str, host_name: &str) -> String {
    subject
        .split(',')
        .map(|rdn| match rdn.split_once('=') {
            Some((key, value))
                if key.trim().eq_ignore_ascii_case("DC")
                    && value.trim().eq_ignore_ascii_case("localhost") =>
            {
                let indent = &rdn[..rdn.len() - rdn.trim_start().len()];
                format!("{indent}{}={host_name}", key.trim())
            }
            _ => rdn.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_are_kept() {
        assert!(is_valid_host_name("plc-gw.factory.local"));
        assert!(is_valid_host_name("10.0.0.7"));
        assert!(is_valid_host_name("fe80::1"));
        assert_eq!(sanitize_host_name_override("opc-host"), "opc-host");
    }

    #[test]
    fn invalid_override_becomes_deterministic_ipv6() {
        let a = sanitize_host_name_override("not a host!");
        let b = sanitize_host_name_override("not a host!");
        assert_eq!(a, b);
        assert!(a.parse::<Ipv6Addr>().is_ok());
        assert_ne!(a, sanitize_host_name_override("another bad name"));
    }

    #[test]
    fn dc_localhost_is_replaced() {
        assert_eq!(
            replace_dc_localhost("CN=client, DC=localhost", "plc-gw"),
            "CN=client, DC=plc-gw"
        );
        assert_eq!(replace_dc_localhost("CN=localhost", "plc-gw"), "CN=localhost");
    }

    proptest::proptest! {
        #[test]
        fn sanitized_override_is_always_valid(name in ".{0,80}") {
            let host = sanitize_host_name_override(&name);
            proptest::prop_assert!(is_valid_host_name(&host));
        }
    }
}
