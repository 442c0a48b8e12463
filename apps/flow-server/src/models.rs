// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wire Models
//!
//! Request and response shapes exchanged with the messaging platform. All
//! types derive `Serialize`, `Deserialize`, and `ToSchema` for JSON handling
//! and OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Envelope**: the encrypted request container
//! - **Flow request**: the decrypted (or unencrypted testing) action payload
//! - **Flow response**: the screen to render next and its data

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Protocol version tag sent with every response.
pub const PROTOCOL_VERSION: &str = "3.0";

// =============================================================================
// Envelope
// =============================================================================

/// Encrypted request body as posted by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// AES-GCM ciphertext with the 16-byte tag appended (base64).
    pub encrypted_flow_data: String,
    /// RSA-OAEP wrapped AES key (base64).
    pub encrypted_aes_key: String,
    /// AES-GCM initialization vector (base64).
    pub initial_vector: String,
}

// =============================================================================
// Flow Request / Response
// =============================================================================

/// One step of a flow conversation.
///
/// Arrives encrypted inside an [`EncryptedEnvelope`], or directly as the
/// body of an unencrypted testing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct FlowRequest {
    /// Protocol version sent by the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Action tag: `INIT`, `BACK`, `data_exchange`, `complete` or `ping`.
    pub action: String,
    /// Screen the action refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<String>,
    /// Submitted fields. Unencrypted testing requests call this `payload`.
    #[serde(default, alias = "payload", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    /// Opaque conversation token issued by the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_token: Option<String>,
    /// Session to continue; echoed back unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Flow definition to use; falls back to the tenant default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
}

impl FlowRequest {
    /// Submitted fields as an object; anything else counts as no fields.
    pub fn fields(&self) -> Map<String, Value> {
        match &self.data {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// Screen to render next.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct FlowResponse {
    /// Protocol version tag.
    pub version: String,
    /// Screen identifier.
    pub screen: String,
    /// Data the screen needs.
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
    /// Session identifier of the conversation.
    pub session_id: String,
}

impl FlowResponse {
    pub fn new(
        screen: impl Into<String>,
        data: Map<String, Value>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            screen: screen.into(),
            data,
            session_id: session_id.into(),
        }
    }
}
