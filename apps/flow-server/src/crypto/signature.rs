// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request signature verification.
//!
//! The platform signs the exact raw request body with HMAC-SHA256 using the
//! tenant's shared secret and sends `X-Hub-Signature-256: sha256=<hex>`.
//! Verification always runs over the raw bytes; a re-serialized JSON body
//! can differ byte-for-byte and would fail.

use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// What to do when a signature cannot be verified.
///
/// Chosen once at startup (`SIGNATURE_POLICY`). Applies both to a
/// mismatching signature and to a tenant with no shared secret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    /// Refuse the request.
    #[default]
    Reject,
    /// Log a warning and continue.
    Permissive,
}

impl FromStr for SignaturePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(SignaturePolicy::Reject),
            "permissive" => Ok(SignaturePolicy::Permissive),
            other => Err(format!("unknown signature policy '{other}'")),
        }
    }
}

/// Result of checking one request against one secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOutcome {
    Verified,
    /// No shared secret configured for the tenant.
    NoSecret,
    /// Header missing, malformed, or computed over different bytes/secret.
    Mismatch,
}

/// Compute the header value for `raw_body` under `shared_secret`.
pub fn sign(raw_body: &[u8], shared_secret: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(shared_secret) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(raw_body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `signature_header` against the raw body.
pub fn verify(raw_body: &[u8], signature_header: &str, shared_secret: &[u8]) -> bool {
    let header = signature_header.trim();
    let hex_digest = header.strip_prefix(SIGNATURE_PREFIX).unwrap_or(header);
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(shared_secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

/// Applies the configured [`SignaturePolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier {
    policy: SignaturePolicy,
}

impl SignatureVerifier {
    pub fn new(policy: SignaturePolicy) -> Self {
        Self { policy }
    }

    /// Check a request without applying the policy.
    pub fn evaluate(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        shared_secret: Option<&str>,
    ) -> SignatureOutcome {
        let Some(secret) = shared_secret.filter(|s| !s.is_empty()) else {
            return SignatureOutcome::NoSecret;
        };
        match signature_header {
            Some(header) if verify(raw_body, header, secret.as_bytes()) => {
                SignatureOutcome::Verified
            }
            _ => SignatureOutcome::Mismatch,
        }
    }

    /// Whether the policy lets a request with this outcome through.
    pub fn admits(&self, outcome: SignatureOutcome) -> bool {
        match (outcome, self.policy) {
            (SignatureOutcome::Verified, _) => true,
            (_, SignaturePolicy::Permissive) => true,
            (_, SignaturePolicy::Reject) => false,
        }
    }
}
