// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Flow endpoint.
//!
//! The body is taken as raw bytes: the signature covers the exact bytes the
//! platform sent, so it must be checked before any JSON parsing.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::crypto::SIGNATURE_HEADER;
use crate::error::ApiError;
use crate::models::{EncryptedEnvelope, FlowResponse};
use crate::service::{FlowReply, InboundRequest};
use crate::state::AppState;

/// Header naming the tenant explicitly.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Flow endpoint with the tenant resolved from the request key.
#[utoipa::path(
    post,
    path = "/v1/flow",
    tag = "Flow",
    request_body(
        content = EncryptedEnvelope,
        description = "Encrypted envelope, or a plaintext FlowRequest when enabled"
    ),
    params(
        (
            "X-Hub-Signature-256" = Option<String>,
            Header,
            description = "sha256=<hex> HMAC of the raw body"
        ),
        ("X-Tenant-Id" = Option<String>, Header, description = "Explicit tenant id")
    ),
    responses(
        (
            status = 200,
            description = "Base64 encrypted reply (text/plain), or FlowResponse JSON",
            body = FlowResponse
        ),
        (status = 400, description = "Malformed request, unknown action or session"),
        (status = 409, description = "Session id belongs to another tenant"),
        (status = 421, description = "No tenant key could decrypt the request"),
        (status = 432, description = "Request signature did not verify"),
        (status = 500, description = "Internal error")
    )
)]
pub async fn handle_flow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let tenant_id = header_value(&headers, TENANT_HEADER);
    dispatch(&state, &headers, tenant_id, &body).await
}

/// Flow endpoint for a known tenant.
#[utoipa::path(
    post,
    path = "/v1/flow/{tenant_id}",
    tag = "Flow",
    request_body(
        content = EncryptedEnvelope,
        description = "Encrypted envelope, or a plaintext FlowRequest when enabled"
    ),
    params(
        ("tenant_id" = String, Path, description = "Tenant id"),
        (
            "X-Hub-Signature-256" = Option<String>,
            Header,
            description = "sha256=<hex> HMAC of the raw body"
        )
    ),
    responses(
        (
            status = 200,
            description = "Base64 encrypted reply (text/plain), or FlowResponse JSON",
            body = FlowResponse
        ),
        (status = 400, description = "Malformed request, unknown action or session"),
        (status = 409, description = "Session id belongs to another tenant"),
        (status = 404, description = "Tenant not found"),
        (status = 421, description = "Tenant key could not unwrap the request"),
        (status = 432, description = "Request signature did not verify"),
        (status = 500, description = "Internal error")
    )
)]
pub async fn handle_tenant_flow(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch(&state, &headers, Some(tenant_id.as_str()), &body).await
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    tenant_id: Option<&str>,
    body: &[u8],
) -> Result<Response, ApiError> {
    let inbound = InboundRequest {
        raw_body: body,
        signature: header_value(headers, SIGNATURE_HEADER),
        tenant_id,
    };

    match state.service.handle(inbound).await {
        Ok(FlowReply::Encrypted(sealed)) => {
            Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], sealed).into_response())
        }
        Ok(FlowReply::Plain(response)) => Ok(Json(response).into_response()),
        Err(e) => {
            tracing::warn!(error_code = e.error_code(), error = %e, "Flow request failed");
            Err(e.into())
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
