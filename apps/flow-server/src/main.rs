// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relational_flow_server::{
    api::router,
    config::AppConfig,
    crypto::SignatureVerifier,
    flow::{FlowCatalog, FlowEngine},
    logging::init_tracing,
    screen_data::ScreenDataProvider,
    service::FlowService,
    state::AppState,
    storage::FlowDatabase,
    sweeper::SessionSweeper,
    tenant::TenantKeyResolver,
};

/// Time given to in-flight requests after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().expect("Invalid configuration");
    init_tracing(config.log_format);

    let db = Arc::new(
        FlowDatabase::open(&config.database_path()).expect("Failed to open flow database"),
    );
    info!(path = %config.database_path().display(), "Opened flow database");

    if let Some(path) = &config.tenant_seed_path {
        let seeded = db.seed_tenants_from_file(path).expect("Failed to seed tenants");
        info!(count = seeded, path = %path.display(), "Seeded tenants");
    }

    let catalog = match &config.flow_definitions_path {
        Some(path) => FlowCatalog::from_file(path).expect("Failed to load flow definitions"),
        None => {
            warn!("FLOW_DEFINITIONS_PATH not set; INIT falls back to the requested screen");
            FlowCatalog::default()
        }
    };
    info!(flows = catalog.len(), "Loaded flow catalogue");

    let screen_data = ScreenDataProvider::new(db.clone(), config.screen_data)
        .expect("Failed to build screen data client");
    let session_ttl =
        chrono::Duration::from_std(config.session_ttl).expect("SESSION_TTL_SECS out of range");
    let engine = FlowEngine::new(
        db.clone(),
        Arc::new(screen_data),
        Arc::new(catalog),
        session_ttl,
    );

    let resolver = TenantKeyResolver::new(
        db.clone(),
        SignatureVerifier::new(config.signature_policy),
        config.max_resolution_candidates,
    );
    let service = FlowService::new(
        Arc::new(resolver),
        db.clone(),
        engine,
        config.allow_plaintext_requests,
    );
    info!(
        signature_policy = ?config.signature_policy,
        allow_plaintext = config.allow_plaintext_requests,
        max_candidates = config.max_resolution_candidates,
        "Flow service ready"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(SessionSweeper::new(db.clone(), config.sweep_interval).run(shutdown.clone()));

    let app = router(AppState::new(service, db));

    let handle = Handle::new();
    let signal_handle = handle.clone();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
        signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    let addr = config.bind_addr;
    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .expect("Failed to load TLS certificate and key");
            info!(%addr, "Flow server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTPS server failed");
        }
        None => {
            info!(%addr, "Flow server listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTP server failed");
        }
    }

    shutdown.cancel();
    info!("Flow server stopped");
}
