// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Sweeper
//!
//! Background task removing sessions past their expiry. The engine treats an
//! expired session as absent; this task only reclaims the storage.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`, checked between sweeps and
//! raced against the sleep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::SessionStore;

pub struct SessionSweeper {
    sessions: Arc<dyn SessionStore>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<dyn SessionStore>, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Session sweeper starting");

        loop {
            if shutdown.is_cancelled() {
                info!("Session sweeper shutting down");
                return;
            }

            self.sweep_once();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Session sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One pass; returns how many sessions were removed.
    pub fn sweep_once(&self) -> usize {
        match self.sessions.purge_expired(Utc::now()) {
            Ok(0) => {
                debug!("No expired sessions");
                0
            }
            Ok(purged) => {
                info!(purged, "Purged expired sessions");
                purged
            }
            Err(e) => {
                warn!(error = %e, "Session sweep failed");
                0
            }
        }
    }
}
