// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope cryptography: RSA-OAEP key unwrap, AES-GCM payload codec and
//! HMAC request signatures.

pub mod codec;
pub mod keys;
pub mod signature;

pub use codec::{CodecError, DecryptedRequest, EnvelopeBytes, SymmetricKey};
pub use signature::{SignatureOutcome, SignaturePolicy, SignatureVerifier, SIGNATURE_HEADER};
