// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tenant key resolution.
//!
//! When a request does not name its tenant, every candidate's private key is
//! tried until one unwraps the symmetric key and the payload authenticates
//! under it. Candidates come in tiers, strongest first, deduplicated:
//!
//! 1. public key acknowledged by the platform and a channel assigned
//! 2. public key acknowledged
//! 3. any complete credential
//!
//! Within a tier tenants are tried in ascending tenant id. The first success
//! wins; two tenants authenticating the same payload is possible in theory
//! and would resolve to the earlier one. At most `max_candidates` tenants
//! are tried per request.
//!
//! Resolution stops at decryption. Whether the plaintext is a valid flow
//! request is decided by the caller, the same way for both paths.

use std::collections::HashSet;
use std::sync::Arc;

use crate::crypto::codec::{decrypt_payload, unwrap_key};
use crate::crypto::keys::load_private_key;
use crate::crypto::{DecryptedRequest, EnvelopeBytes, SignatureOutcome, SignatureVerifier};
use crate::error::FlowError;
use crate::storage::{CredentialFilter, TenantCredential, TenantStore};

const CANDIDATE_TIERS: [CredentialFilter; 3] = [
    CredentialFilter {
        require_uploaded_key: true,
        require_channel: true,
    },
    CredentialFilter {
        require_uploaded_key: true,
        require_channel: false,
    },
    CredentialFilter {
        require_uploaded_key: false,
        require_channel: false,
    },
];

/// Tenant a request belongs to, with its decrypted payload.
#[derive(Debug)]
pub struct ResolvedTenant {
    pub tenant: TenantCredential,
    pub decrypted: DecryptedRequest,
    /// Signature check result; anything but `Verified` was admitted by a
    /// permissive policy.
    pub signature: SignatureOutcome,
}

/// Why one candidate did not decrypt the request.
enum Miss {
    SignatureRejected,
    Unusable,
    WrongKey,
    Corrupt,
}

pub struct TenantKeyResolver {
    tenants: Arc<dyn TenantStore>,
    verifier: SignatureVerifier,
    max_candidates: usize,
}

impl TenantKeyResolver {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        verifier: SignatureVerifier,
        max_candidates: usize,
    ) -> Self {
        Self {
            tenants,
            verifier,
            max_candidates: max_candidates.max(1),
        }
    }

    /// Candidate tenants in trial order, capped at `max_candidates`.
    pub fn candidates(&self) -> Result<Vec<TenantCredential>, FlowError> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for filter in &CANDIDATE_TIERS {
            for tenant in self.tenants.list_tenants(filter)? {
                if seen.insert(tenant.tenant_id.clone()) {
                    candidates.push(tenant);
                }
            }
        }

        if candidates.len() > self.max_candidates {
            tracing::warn!(
                candidates = candidates.len(),
                cap = self.max_candidates,
                "Tenant candidate list truncated"
            );
            candidates.truncate(self.max_candidates);
        }
        Ok(candidates)
    }

    /// Find the tenant whose key decrypts `envelope`.
    ///
    /// Fails with [`FlowError::StaleKey`] when no candidate can, or with
    /// [`FlowError::SignatureMismatch`] when every candidate was refused on
    /// its signature before any decryption.
    pub fn resolve(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        envelope: &EnvelopeBytes,
    ) -> Result<ResolvedTenant, FlowError> {
        let candidates = self.candidates()?;
        let mut signature_rejections = 0usize;
        let mut decrypt_attempts = 0usize;
        let mut corrupt = false;

        for tenant in candidates {
            match self.try_candidate(&tenant, raw_body, signature_header, envelope) {
                Ok((decrypted, signature)) => {
                    tracing::info!(
                        tenant_id = %tenant.tenant_id,
                        attempts = decrypt_attempts + 1,
                        "Resolved tenant from request key"
                    );
                    return Ok(ResolvedTenant {
                        tenant,
                        decrypted,
                        signature,
                    });
                }
                Err(Miss::SignatureRejected) => signature_rejections += 1,
                Err(Miss::Unusable) => {}
                Err(Miss::WrongKey) => decrypt_attempts += 1,
                Err(Miss::Corrupt) => {
                    decrypt_attempts += 1;
                    corrupt = true;
                }
            }
        }

        if corrupt {
            return Err(FlowError::PayloadDecrypt);
        }
        if decrypt_attempts == 0 && signature_rejections > 0 {
            tracing::warn!(
                rejections = signature_rejections,
                "No candidate tenant accepted the request signature"
            );
            return Err(FlowError::SignatureMismatch);
        }
        tracing::warn!(attempts = decrypt_attempts, "No tenant key could decrypt the request");
        Err(FlowError::StaleKey)
    }

    /// Decrypt `envelope` with a known tenant's key.
    pub fn resolve_explicit(
        &self,
        tenant_id: &str,
        raw_body: &[u8],
        signature_header: Option<&str>,
        envelope: &EnvelopeBytes,
    ) -> Result<ResolvedTenant, FlowError> {
        let tenant = self
            .tenants
            .get_tenant(tenant_id)?
            .ok_or_else(|| FlowError::TenantNotFound(tenant_id.to_string()))?;

        let signature = self.check_signature(&tenant, raw_body, signature_header);
        if !self.verifier.admits(signature) {
            tracing::warn!(
                tenant_id = %tenant_id,
                outcome = ?signature,
                "Request signature rejected"
            );
            return Err(FlowError::SignatureMismatch);
        }

        let Some(pem) = tenant.private_key_pem.as_deref() else {
            return Err(FlowError::StaleKey);
        };
        let private_key = load_private_key(pem, tenant.private_key_passphrase.as_deref())
            .map_err(|e| FlowError::Crypto(e.to_string()))?;

        let key = unwrap_key(&envelope.wrapped_key, &private_key)?;
        let plaintext = decrypt_payload(&envelope.ciphertext, &key, &envelope.iv)?;

        Ok(ResolvedTenant {
            tenant,
            decrypted: DecryptedRequest {
                plaintext,
                key,
                request_iv: envelope.iv.clone(),
            },
            signature,
        })
    }

    fn check_signature(
        &self,
        tenant: &TenantCredential,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> SignatureOutcome {
        self.verifier
            .evaluate(raw_body, signature_header, tenant.shared_secret.as_deref())
    }

    fn try_candidate(
        &self,
        tenant: &TenantCredential,
        raw_body: &[u8],
        signature_header: Option<&str>,
        envelope: &EnvelopeBytes,
    ) -> Result<(DecryptedRequest, SignatureOutcome), Miss> {
        let signature = self.check_signature(tenant, raw_body, signature_header);
        if !self.verifier.admits(signature) {
            return Err(Miss::SignatureRejected);
        }

        let pem = tenant.private_key_pem.as_deref().ok_or(Miss::Unusable)?;
        let private_key = load_private_key(pem, tenant.private_key_passphrase.as_deref())
            .map_err(|e| {
                tracing::warn!(
                    tenant_id = %tenant.tenant_id,
                    error = %e,
                    "Skipping tenant with unreadable private key"
                );
                Miss::Unusable
            })?;

        let key = match unwrap_key(&envelope.wrapped_key, &private_key) {
            Ok(key) => key,
            Err(_) => return Err(Miss::WrongKey),
        };

        let plaintext = match decrypt_payload(&envelope.ciphertext, &key, &envelope.iv) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                tracing::debug!(
                    tenant_id = %tenant.tenant_id,
                    "Key unwrapped but payload failed authentication"
                );
                return Err(Miss::Corrupt);
            }
        };

        Ok((
            DecryptedRequest {
                plaintext,
                key,
                request_iv: envelope.iv.clone(),
            },
            signature,
        ))
    }
}

/// Tenant with a freshly generated 1024-bit key pair, for tests.
#[cfg(test)]
pub(crate) fn keyed_tenant(
    tenant_id: &str,
    shared_secret: &str,
) -> (TenantCredential, rsa::RsaPublicKey) {
    use rsa::pkcs8::DecodePublicKey;

    let pair = crate::crypto::keys::generate_key_pair(1024).unwrap();
    let public_key = rsa::RsaPublicKey::from_public_key_pem(&pair.public_key_pem).unwrap();

    let mut tenant = TenantCredential::new(tenant_id);
    tenant.private_key_pem = Some(pair.private_key_pem);
    tenant.public_key_pem = Some(pair.public_key_pem);
    tenant.shared_secret = Some(shared_secret.to_string());
    (tenant, public_key)
}
