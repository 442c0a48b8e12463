// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RSA key material for tenant credentials.

use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::codec::CodecError;

/// Modulus size for freshly rotated tenant keys.
pub const TENANT_KEY_BITS: usize = 2048;

/// PEM-encoded key pair.
pub struct GeneratedKeyPair {
    pub private_key_pem: String,
    pub public_key_pem: String,
}

/// Generate a new RSA key pair (PKCS#8 private, SPKI public).
pub fn generate_key_pair(bits: usize) -> Result<GeneratedKeyPair, CodecError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| CodecError::PrivateKey(format!("key generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CodecError::PrivateKey(format!("PKCS#8 encoding failed: {e}")))?
        .to_string();
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CodecError::PrivateKey(format!("SPKI encoding failed: {e}")))?;

    Ok(GeneratedKeyPair {
        private_key_pem,
        public_key_pem,
    })
}

/// Parse a tenant private key.
///
/// With a passphrase the PEM must be an encrypted PKCS#8 document; without
/// one, plain PKCS#8 is tried first and PKCS#1 second.
pub fn load_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey, CodecError> {
    let pem = pem.trim();
    match passphrase.filter(|p| !p.is_empty()) {
        Some(passphrase) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
            .map_err(|e| CodecError::PrivateKey(format!("encrypted PKCS#8: {e}"))),
        None => RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CodecError::PrivateKey(format!("unsupported PEM: {e}"))),
    }
}
