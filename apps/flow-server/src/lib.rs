// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Flow Server - Encrypted Flow Endpoint
//!
//! Endpoint a messaging platform calls to drive multi-screen forms. Every
//! request is hybrid-encrypted for one tenant; the server finds the tenant,
//! advances the conversation and seals the reply.
//!
//! ## Modules
//!
//! - `crypto` - Envelope codec, request signatures, tenant RSA keys
//! - `tenant` - Tenant key resolution for requests without a tenant id
//! - `flow` - Action tags, flow catalogue, navigation state machine
//! - `screen_data` - Option lists for screens, cached and refreshed
//! - `service` - Request pipeline tying the above together
//! - `storage` - redb-backed tenants, sessions, answers, screen cache
//! - `api` - HTTP handlers (Axum)

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod flow;
pub mod logging;
pub mod models;
pub mod screen_data;
pub mod service;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod tenant;
