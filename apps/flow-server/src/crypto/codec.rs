// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hybrid-encryption transport codec.
//!
//! ## Wire Format
//!
//! - `encrypted_aes_key`: RSA-OAEP (SHA-256) wrapped AES key, base64
//! - `encrypted_flow_data`: AES-GCM ciphertext followed by the 16-byte tag, base64
//! - `initial_vector`: AES-GCM nonce, base64
//!
//! The response is sealed with the same AES key under the bitwise complement
//! of the request IV; the platform cannot decrypt a reply sealed under the
//! request IV itself.
//!
//! Everything here is pure: no I/O, no persistence, no logging.

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{Aead, AeadInPlace, KeyInit, Nonce, Tag};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::AesGcm;
use base64ct::{Base64, Encoding};
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;

use crate::models::EncryptedEnvelope;

/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

type Aes128Gcm12 = AesGcm<Aes128, U12>;
type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes256Gcm12 = AesGcm<Aes256, U12>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("symmetric key could not be unwrapped")]
    KeyUnwrap,

    #[error("payload failed authentication")]
    PayloadDecrypt,

    #[error("payload encryption failed")]
    PayloadEncrypt,

    #[error("field {0} is not valid base64")]
    Base64(&'static str),

    #[error("unsupported symmetric key length: {0} bytes")]
    KeyLength(usize),

    #[error("unsupported initialization vector length: {0} bytes")]
    IvLength(usize),

    #[error("ciphertext is shorter than the authentication tag")]
    Truncated,

    #[error("invalid private key: {0}")]
    PrivateKey(String),
}

/// Symmetric key unwrapped from a request. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Vec<u8>);

impl SymmetricKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CodecError> {
        match bytes.len() {
            16 | 32 => Ok(Self(bytes)),
            n => Err(CodecError::KeyLength(n)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey(<{} bytes>)", self.0.len())
    }
}

/// Envelope fields after base64 decoding.
#[derive(Debug, Clone)]
pub struct EnvelopeBytes {
    pub wrapped_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

impl EnvelopeBytes {
    /// Decode the base64 fields. The IV must be 12 or 16 bytes.
    pub fn decode(envelope: &EncryptedEnvelope) -> Result<Self, CodecError> {
        let iv = Base64::decode_vec(envelope.initial_vector.trim())
            .map_err(|_| CodecError::Base64("initial_vector"))?;
        if !matches!(iv.len(), 12 | 16) {
            return Err(CodecError::IvLength(iv.len()));
        }
        Ok(Self {
            wrapped_key: Base64::decode_vec(envelope.encrypted_aes_key.trim())
                .map_err(|_| CodecError::Base64("encrypted_aes_key"))?,
            ciphertext: Base64::decode_vec(envelope.encrypted_flow_data.trim())
                .map_err(|_| CodecError::Base64("encrypted_flow_data"))?,
            iv,
        })
    }
}

/// Decrypted request plus what is needed to seal the reply.
#[derive(Debug, Clone)]
pub struct DecryptedRequest {
    pub plaintext: Vec<u8>,
    pub key: SymmetricKey,
    pub request_iv: Vec<u8>,
}

/// Unwrap the per-request symmetric key with RSA-OAEP (SHA-256).
pub fn unwrap_key(
    wrapped_key: &[u8],
    private_key: &RsaPrivateKey,
) -> Result<SymmetricKey, CodecError> {
    let bytes = private_key
        .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), wrapped_key)
        .map_err(|_| CodecError::KeyUnwrap)?;
    SymmetricKey::new(bytes).map_err(|_| CodecError::KeyUnwrap)
}

/// Authenticated decryption of `ciphertext || tag`.
pub fn decrypt_payload(
    ciphertext_with_tag: &[u8],
    key: &SymmetricKey,
    iv: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if ciphertext_with_tag.len() < TAG_LEN {
        return Err(CodecError::Truncated);
    }
    let (ciphertext, tag) = ciphertext_with_tag.split_at(ciphertext_with_tag.len() - TAG_LEN);

    match (key.as_bytes().len(), iv.len()) {
        (16, 12) => open::<Aes128Gcm12>(key.as_bytes(), iv, ciphertext, tag),
        (16, 16) => open::<Aes128Gcm16>(key.as_bytes(), iv, ciphertext, tag),
        (32, 12) => open::<Aes256Gcm12>(key.as_bytes(), iv, ciphertext, tag),
        (32, 16) => open::<Aes256Gcm16>(key.as_bytes(), iv, ciphertext, tag),
        (16 | 32, n) => Err(CodecError::IvLength(n)),
        (n, _) => Err(CodecError::KeyLength(n)),
    }
}

/// Authenticated encryption producing `ciphertext || tag`.
///
/// `iv` is used as given; callers sealing a response pass [`invert_iv`] of
/// the request IV (see [`encrypt_response`]).
pub fn encrypt_payload(
    plaintext: &[u8],
    key: &SymmetricKey,
    iv: &[u8],
) -> Result<Vec<u8>, CodecError> {
    match (key.as_bytes().len(), iv.len()) {
        (16, 12) => seal::<Aes128Gcm12>(key.as_bytes(), iv, plaintext),
        (16, 16) => seal::<Aes128Gcm16>(key.as_bytes(), iv, plaintext),
        (32, 12) => seal::<Aes256Gcm12>(key.as_bytes(), iv, plaintext),
        (32, 16) => seal::<Aes256Gcm16>(key.as_bytes(), iv, plaintext),
        (16 | 32, n) => Err(CodecError::IvLength(n)),
        (n, _) => Err(CodecError::KeyLength(n)),
    }
}

/// Bitwise complement of every IV byte.
pub fn invert_iv(iv: &[u8]) -> Vec<u8> {
    iv.iter().map(|byte| !byte).collect()
}

/// Unwrap the key and decrypt the payload of one envelope.
pub fn decrypt_request(
    envelope: &EnvelopeBytes,
    private_key: &RsaPrivateKey,
) -> Result<DecryptedRequest, CodecError> {
    let key = unwrap_key(&envelope.wrapped_key, private_key)?;
    let plaintext = decrypt_payload(&envelope.ciphertext, &key, &envelope.iv)?;
    Ok(DecryptedRequest {
        plaintext,
        key,
        request_iv: envelope.iv.clone(),
    })
}

/// Seal a response body and return it base64-encoded.
pub fn encrypt_response(
    plaintext: &[u8],
    key: &SymmetricKey,
    request_iv: &[u8],
) -> Result<String, CodecError> {
    let sealed = encrypt_payload(plaintext, key, &invert_iv(request_iv))?;
    Ok(Base64::encode_string(&sealed))
}

fn open<C>(key: &[u8], iv: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>, CodecError>
where
    C: AeadInPlace + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| CodecError::KeyLength(key.len()))?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<C>::from_slice(iv),
            b"",
            &mut buffer,
            Tag::<C>::from_slice(tag),
        )
        .map_err(|_| CodecError::PayloadDecrypt)?;
    Ok(buffer)
}

fn seal<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CodecError>
where
    C: Aead + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| CodecError::KeyLength(key.len()))?;
    cipher
        .encrypt(Nonce::<C>::from_slice(iv), plaintext)
        .map_err(|_| CodecError::PayloadEncrypt)
}


#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;

    fn key16() -> SymmetricKey {
        SymmetricKey::new((0u8..16).collect()).unwrap()
    }

    fn iv16() -> Vec<u8> {
        (100u8..116).collect()
    }

    #[test]
    fn invert_iv_complements_each_byte() {
        assert_eq!(invert_iv(&[0x00, 0xFF, 0x0F, 0xA5]), vec![0xFF, 0x00, 0xF0, 0x5A]);
        assert_eq!(invert_iv(&invert_iv(&iv16())), iv16());
    }

    #[test]
    fn response_decrypts_only_under_complemented_iv() {
        let key = key16();
        let iv = iv16();
        let body = encrypt_response(br#"{"screen":"FORM"}"#, &key, &iv).unwrap();
        let sealed = Base64::decode_vec(&body).unwrap();

        let opened = decrypt_payload(&sealed, &key, &invert_iv(&iv)).unwrap();
        assert_eq!(opened, br#"{"screen":"FORM"}"#);

        assert!(matches!(
            decrypt_payload(&sealed, &key, &iv),
            Err(CodecError::PayloadDecrypt)
        ));
    }

    #[test]
    fn output_is_ciphertext_plus_tag() {
        let sealed = encrypt_payload(b"hello", &key16(), &iv16()).unwrap();
        assert_eq!(sealed.len(), 5 + TAG_LEN);
    }

    #[test]
    fn encryption_is_deterministic_for_fixed_inputs() {
        let a = encrypt_payload(b"same", &key16(), &iv16()).unwrap();
        let b = encrypt_payload(b"same", &key16(), &iv16()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn flipping_any_bit_is_detected() {
        let key = key16();
        let iv = iv16();
        let sealed = encrypt_payload(b"tamper me", &key, &iv).unwrap();

        for index in 0..sealed.len() {
            for bit in 0..8 {
                let mut corrupted = sealed.clone();
                corrupted[index] ^= 1 << bit;
                assert!(
                    matches!(
                        decrypt_payload(&corrupted, &key, &iv),
                        Err(CodecError::PayloadDecrypt)
                    ),
                    "bit {bit} of byte {index} went undetected"
                );
            }
        }
    }

    #[test]
    fn aes256_and_short_iv_supported() {
        let key = SymmetricKey::new(vec![7u8; 32]).unwrap();
        let iv = vec![9u8; 12];
        let sealed = encrypt_payload(b"wide key", &key, &iv).unwrap();
        assert_eq!(decrypt_payload(&sealed, &key, &iv).unwrap(), b"wide key");
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(SymmetricKey::new(vec![0u8; 24]), Err(CodecError::KeyLength(24))));
        assert!(matches!(
            decrypt_payload(&[0u8; 4], &key16(), &iv16()),
            Err(CodecError::Truncated)
        ));
        assert!(matches!(
            encrypt_payload(b"x", &key16(), &[0u8; 8]),
            Err(CodecError::IvLength(8))
        ));
    }

    #[test]
    fn unwrap_with_wrong_private_key_fails() {
        let owner = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let stranger = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let sealed = client::seal_request(b"{}", &RsaPublicKey::from(&owner));
        let bytes = EnvelopeBytes::decode(&sealed.envelope).unwrap();

        assert!(matches!(
            unwrap_key(&bytes.wrapped_key, &stranger),
            Err(CodecError::KeyUnwrap)
        ));

        let decrypted = decrypt_request(&bytes, &owner).unwrap();
        assert_eq!(decrypted.plaintext, b"{}");
        assert_eq!(decrypted.key, sealed.key);
        assert_eq!(decrypted.request_iv, sealed.iv);
    }

    #[test]
    fn envelope_with_bad_base64_names_the_field() {
        let envelope = EncryptedEnvelope {
            encrypted_flow_data: "AAAA".to_string(),
            encrypted_aes_key: "not base64!".to_string(),
            initial_vector: "AAAAAAAAAAAAAAAAAAAAAA==".to_string(),
        };
        assert!(matches!(
            EnvelopeBytes::decode(&envelope),
            Err(CodecError::Base64("encrypted_aes_key"))
        ));

        let short_iv = EncryptedEnvelope {
            initial_vector: "AAAA".to_string(),
            ..envelope
        };
        assert!(matches!(
            EnvelopeBytes::decode(&short_iv),
            Err(CodecError::IvLength(3))
        ));
    }

    #[test]
    fn symmetric_key_debug_hides_bytes() {
        assert_eq!(format!("{:?}", key16()), "SymmetricKey(<16 bytes>)");
    }
}
