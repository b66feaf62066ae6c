//! Private key protection for directory stores
//!
//! Keys written with a password are sealed with AES-256-GCM under a key
//! derived by Argon2id from that password. Keys written without a password
//! are stored as plain PKCS#8 DER behind a marker.

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, generic_array::GenericArray},
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Result, TrustError};

const MAGIC_PLAIN: &[u8; 4] = b"UAK0";
const MAGIC_SEALED: &[u8; 4] = b"UAK1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

// Argon2id, 19 MiB, 2 passes
const MEMORY_COST_KIB: u32 = 19 * 1024;
const ITERATIONS: u32 = 2;
const PARALLELISM: u32 = 1;

/// Encode a PKCS#8 key for storage, sealing it when a password is given
pub(super) fn seal(key_der: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        let mut out = Vec::with_capacity(MAGIC_PLAIN.len() + key_der.len());
        out.extend_from_slice(MAGIC_PLAIN);
        out.extend_from_slice(key_der);
        return Ok(out);
    };

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| TrustError::KeyProtection(format!("invalid derived key: {e}")))?;
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), key_der)
        .map_err(|_| TrustError::KeyProtection("private key encryption failed".into()))?;

    let mut out = Vec::with_capacity(MAGIC_SEALED.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC_SEALED);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decode a stored key, unsealing it with the password when needed
pub(super) fn open(blob: &[u8], password: Option<&str>) -> Result<Zeroizing<Vec<u8>>> {
    if let Some(plain) = blob.strip_prefix(MAGIC_PLAIN.as_slice()) {
        return Ok(Zeroizing::new(plain.to_vec()));
    }
    let Some(sealed) = blob.strip_prefix(MAGIC_SEALED.as_slice()) else {
        return Err(TrustError::KeyProtection(
            "unrecognized private key file format".into(),
        ));
    };
    if sealed.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(TrustError::KeyProtection(
            "sealed private key is truncated".into(),
        ));
    }
    let password = password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| TrustError::KeyProtection("private key requires a password".into()))?;

    let (salt, rest) = sealed.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let key = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| TrustError::KeyProtection(format!("invalid derived key: {e}")))?;
    let plain = cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| TrustError::KeyProtection("wrong password or corrupted private key".into()))?;
    Ok(Zeroizing::new(plain))
}

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(MEMORY_COST_KIB, ITERATIONS, PARALLELISM, Some(32))
        .map_err(|e| TrustError::KeyProtection(format!("invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|e| TrustError::KeyProtection(format!("Argon2 key derivation failed: {e}")))?;
    Ok(key)
}
