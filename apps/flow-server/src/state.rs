// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::service::FlowService;
use crate::storage::FlowDatabase;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FlowService>,
    pub db: Arc<FlowDatabase>,
}

impl AppState {
    pub fn new(service: FlowService, db: Arc<FlowDatabase>) -> Self {
        Self {
            service: Arc::new(service),
            db,
        }
    }
}
