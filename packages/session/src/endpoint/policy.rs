//! Security policy uris understood by the client

/// Namespace prefix shared by every standard security policy uri
pub const SECURITY_POLICY_NAMESPACE: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

/// Short names of the supported policies
pub const KNOWN_POLICIES: &[&str] = &[
    "None",
    "Basic128Rsa15",
    "Basic256",
    "Basic256Sha256",
    "Aes128_Sha256_RsaOaep",
    "Aes256_Sha256_RsaPss",
    "ECC_nistP256",
    "ECC_nistP384",
    "ECC_brainpoolP256r1",
    "ECC_brainpoolP384r1",
    "ECC_curve25519",
    "ECC_curve448",
];

/// Whether `uri` names a supported policy
#[must_use]
pub fn is_known_policy(uri: &str) -> bool {
    uri.strip_prefix(SECURITY_POLICY_NAMESPACE)
        .is_some_and(|name| KNOWN_POLICIES.contains(&name))
}

/// Whether a requested policy, full uri or short name, denotes `uri`
#[must_use]
pub fn policy_matches(requested: &str, uri: &str) -> bool {
    requested == uri
        || uri
            .strip_prefix(SECURITY_POLICY_NAMESPACE)
            .is_some_and(|name| name == requested)
}
