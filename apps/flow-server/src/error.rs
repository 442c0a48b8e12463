// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::crypto::CodecError;
use crate::storage::StorageError;

/// Status telling the platform to re-fetch the tenant public key.
const STALE_KEY_STATUS: u16 = 421;

/// Status the platform expects for a failed body signature.
const SIGNATURE_MISMATCH_STATUS: u16 = 432;

// =============================================================================
// Flow Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("symmetric key could not be unwrapped with the tenant key")]
    KeyUnwrap,

    #[error("payload failed authentication")]
    PayloadDecrypt,

    #[error("request signature did not verify")]
    SignatureMismatch,

    #[error("no tenant key could decrypt the request")]
    StaleKey,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} belongs to another tenant")]
    SessionConflict(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl FlowError {
    /// Stable machine-readable kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlowError::KeyUnwrap => "key_unwrap",
            FlowError::PayloadDecrypt => "payload_decrypt",
            FlowError::SignatureMismatch => "signature_mismatch",
            FlowError::StaleKey => "stale_key",
            FlowError::SessionNotFound(_) => "session_not_found",
            FlowError::SessionConflict(_) => "session_conflict",
            FlowError::UnknownAction(_) => "unknown_action",
            FlowError::InvalidRequest(_) => "invalid_request",
            FlowError::TenantNotFound(_) => "tenant_not_found",
            FlowError::Storage(_) => "storage",
            FlowError::Crypto(_) => "crypto",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FlowError::KeyUnwrap | FlowError::StaleKey => status(STALE_KEY_STATUS),
            FlowError::SignatureMismatch => status(SIGNATURE_MISMATCH_STATUS),
            FlowError::SessionNotFound(_)
            | FlowError::UnknownAction(_)
            | FlowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FlowError::SessionConflict(_) => StatusCode::CONFLICT,
            FlowError::TenantNotFound(_) => StatusCode::NOT_FOUND,
            FlowError::PayloadDecrypt | FlowError::Storage(_) | FlowError::Crypto(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to the caller.
    fn public_message(&self) -> String {
        match self {
            // storage and crypto details stay in the logs
            FlowError::Storage(_) => "internal storage error".to_string(),
            FlowError::Crypto(_) => "internal cryptographic error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<CodecError> for FlowError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::KeyUnwrap => FlowError::KeyUnwrap,
            CodecError::PayloadDecrypt | CodecError::Truncated => FlowError::PayloadDecrypt,
            CodecError::Base64(field) => {
                FlowError::InvalidRequest(format!("{field} is not valid base64"))
            }
            CodecError::IvLength(n) => FlowError::InvalidRequest(format!(
                "unsupported initialization vector length: {n} bytes"
            )),
            other => FlowError::Crypto(other.to_string()),
        }
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// =============================================================================
// API Error
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error_code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code,
            message: message.into(),
        }
    }
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        Self::new(err.status_code(), err.error_code(), err.public_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.error_code,
        });
        (self.status, body).into_response()
    }
}
