// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{EncryptedEnvelope, FlowRequest, FlowResponse},
    state::AppState,
    storage::ScreenOption,
};

pub mod flow;
pub mod health;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/flow", post(flow::handle_flow))
        .route("/flow/{tenant_id}", post(flow::handle_tenant_flow))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        flow::handle_flow,
        flow::handle_tenant_flow,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            EncryptedEnvelope,
            FlowRequest,
            FlowResponse,
            ScreenOption,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    tags(
        (name = "Flow", description = "Encrypted flow data exchange"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
