// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end request pipeline.
//!
//! ```text
//! raw body ─┬─ envelope ─▶ signature ─▶ tenant key ─▶ decrypt ─▶ engine ─▶ seal
//!           └─ plaintext ─▶ (testing only) ────────────────────▶ engine ─▶ JSON
//! ```
//!
//! A decrypted payload that is not a flow request is a 400 whether or not
//! the tenant was named up front.

use std::sync::Arc;

use serde_json::Value;

use crate::crypto::codec::encrypt_response;
use crate::crypto::{EnvelopeBytes, SignatureOutcome};
use crate::error::FlowError;
use crate::flow::{FlowEngine, RequestContext};
use crate::models::{EncryptedEnvelope, FlowRequest, FlowResponse};
use crate::storage::TenantStore;
use crate::tenant::{ResolvedTenant, TenantKeyResolver};

const ENVELOPE_FIELDS: [&str; 3] = ["encrypted_flow_data", "encrypted_aes_key", "initial_vector"];

/// One inbound HTTP request, as the handler saw it.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    /// Exact request bytes; the signature is computed over these.
    pub raw_body: &'a [u8],
    pub signature: Option<&'a str>,
    /// Tenant named by the route or a header.
    pub tenant_id: Option<&'a str>,
}

/// What goes back to the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowReply {
    /// Base64 envelope, sent as plain text.
    Encrypted(String),
    /// Unencrypted testing reply, sent as JSON.
    Plain(FlowResponse),
}

pub struct FlowService {
    resolver: Arc<TenantKeyResolver>,
    tenants: Arc<dyn TenantStore>,
    engine: FlowEngine,
    allow_plaintext: bool,
}

impl FlowService {
    pub fn new(
        resolver: Arc<TenantKeyResolver>,
        tenants: Arc<dyn TenantStore>,
        engine: FlowEngine,
        allow_plaintext: bool,
    ) -> Self {
        Self {
            resolver,
            tenants,
            engine,
            allow_plaintext,
        }
    }

    pub async fn handle(&self, inbound: InboundRequest<'_>) -> Result<FlowReply, FlowError> {
        let body: Value = serde_json::from_slice(inbound.raw_body)
            .map_err(|_| FlowError::InvalidRequest("body is not valid JSON".to_string()))?;

        let tenant_id = inbound
            .tenant_id
            .map(str::to_string)
            .or_else(|| body.get("tenant_id").and_then(Value::as_str).map(str::to_string))
            .filter(|id| !id.trim().is_empty());

        if is_envelope(&body) {
            let envelope: EncryptedEnvelope = serde_json::from_value(body).map_err(|_| {
                FlowError::InvalidRequest("malformed encrypted envelope".to_string())
            })?;
            self.handle_encrypted(inbound, tenant_id, &envelope).await
        } else {
            self.handle_plaintext(tenant_id, body).await
        }
    }

    async fn handle_encrypted(
        &self,
        inbound: InboundRequest<'_>,
        tenant_id: Option<String>,
        envelope: &EncryptedEnvelope,
    ) -> Result<FlowReply, FlowError> {
        let envelope = EnvelopeBytes::decode(envelope)?;
        let resolved = self.resolve(inbound, tenant_id, envelope).await?;
        if resolved.signature != SignatureOutcome::Verified {
            tracing::warn!(
                tenant_id = %resolved.tenant.tenant_id,
                outcome = ?resolved.signature,
                "Unverified request signature accepted"
            );
        }

        let request: FlowRequest =
            serde_json::from_slice(&resolved.decrypted.plaintext).map_err(|_| {
                FlowError::InvalidRequest("decrypted payload is not a flow request".to_string())
            })?;

        let ctx = RequestContext {
            tenant_id: Some(resolved.tenant.tenant_id.clone()),
            default_flow_id: resolved.tenant.default_flow_id.clone(),
        };
        let response = self.engine.handle(&ctx, &request).await?;
        tracing::info!(
            tenant_id = %resolved.tenant.tenant_id,
            action = %request.action,
            screen = %response.screen,
            session_id = %response.session_id,
            "Flow request handled"
        );

        let plaintext = serde_json::to_vec(&response)
            .map_err(|e| FlowError::Crypto(format!("response serialization failed: {e}")))?;
        let sealed = encrypt_response(
            &plaintext,
            &resolved.decrypted.key,
            &resolved.decrypted.request_iv,
        )?;
        Ok(FlowReply::Encrypted(sealed))
    }

    async fn handle_plaintext(
        &self,
        tenant_id: Option<String>,
        body: Value,
    ) -> Result<FlowReply, FlowError> {
        if !self.allow_plaintext {
            return Err(FlowError::InvalidRequest(
                "request is not an encrypted envelope".to_string(),
            ));
        }

        let request: FlowRequest = serde_json::from_value(body)
            .map_err(|e| FlowError::InvalidRequest(format!("malformed flow request: {e}")))?;

        let ctx = match tenant_id {
            Some(id) => {
                let tenant = self
                    .tenants
                    .get_tenant(&id)?
                    .ok_or_else(|| FlowError::TenantNotFound(id.clone()))?;
                RequestContext {
                    tenant_id: Some(tenant.tenant_id),
                    default_flow_id: tenant.default_flow_id,
                }
            }
            None => RequestContext::default(),
        };

        tracing::debug!(
            action = %request.action,
            tenant_id = ?ctx.tenant_id,
            "Handling unencrypted request"
        );
        let response = self.engine.handle(&ctx, &request).await?;
        Ok(FlowReply::Plain(response))
    }

    /// Run key resolution off the async runtime; it may try many RSA keys.
    async fn resolve(
        &self,
        inbound: InboundRequest<'_>,
        tenant_id: Option<String>,
        envelope: EnvelopeBytes,
    ) -> Result<ResolvedTenant, FlowError> {
        let resolver = self.resolver.clone();
        let raw_body = inbound.raw_body.to_vec();
        let signature = inbound.signature.map(str::to_string);

        tokio::task::spawn_blocking(move || match tenant_id {
            Some(id) => resolver.resolve_explicit(&id, &raw_body, signature.as_deref(), &envelope),
            None => resolver.resolve(&raw_body, signature.as_deref(), &envelope),
        })
        .await
        .map_err(|e| FlowError::Crypto(format!("key resolution task failed: {e}")))?
    }
}

fn is_envelope(body: &Value) -> bool {
    ENVELOPE_FIELDS.iter().all(|field| body.get(field).is_some())
}
