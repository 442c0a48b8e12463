// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Screen data resolution.
//!
//! Lookup order for one (screen, kind) option list:
//!
//! 1. In-process LRU entry younger than the TTL
//! 2. Live refresh from the data source, bounded by a hard timeout; on
//!    success both caches are overwritten
//! 3. Last persisted value from the `screen_cache` table
//! 4. Empty list
//!
//! Refresh failures are logged and never surface to the caller.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;
use reqwest::Client;
use serde_json::{Map, Value};

use super::source::{fetch, transform_items, DataSourceConfig, DataSourceError};
use crate::flow::ScreenDefinition;
use crate::storage::screen_cache::cache_key;
use crate::storage::{ScreenCacheEntry, ScreenCacheStore, ScreenOption};

#[derive(Debug, Clone, Copy)]
pub struct ScreenDataSettings {
    /// Hard bound on one external refresh.
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for ScreenDataSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 256,
        }
    }
}

struct HotEntry {
    options: Vec<ScreenOption>,
    inserted_at: Instant,
}

pub struct ScreenDataProvider {
    http: Client,
    timeout: Duration,
    ttl: Duration,
    hot: Mutex<LruCache<String, HotEntry>>,
    store: Arc<dyn ScreenCacheStore>,
}

impl ScreenDataProvider {
    pub fn new(
        store: Arc<dyn ScreenCacheStore>,
        settings: ScreenDataSettings,
    ) -> Result<Self, DataSourceError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DataSourceError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            timeout: settings.timeout,
            ttl: settings.cache_ttl,
            hot: Mutex::new(LruCache::new(
                NonZeroUsize::new(settings.cache_capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            store,
        })
    }

    /// Data for a screen: its static data plus one option list per source.
    pub async fn resolve(&self, screen: Option<&ScreenDefinition>) -> Map<String, Value> {
        let Some(screen) = screen else {
            return Map::new();
        };

        let mut data = screen.data.clone();
        for source in &screen.data_sources {
            let options = self.options(&screen.id, source).await;
            data.insert(source.kind.clone(), options_to_value(&options));
        }
        data
    }

    /// Option list for one source of a screen. Never fails.
    pub async fn options(&self, screen_id: &str, source: &DataSourceConfig) -> Vec<ScreenOption> {
        let key = cache_key(screen_id, &source.kind);
        if let Some(options) = self.hot_get(&key) {
            return options;
        }

        match self.refresh(source).await {
            Ok(options) => {
                self.hot_put(key, options.clone());
                let entry = ScreenCacheEntry {
                    screen_id: screen_id.to_string(),
                    kind: source.kind.clone(),
                    options: options.clone(),
                    updated_at: Utc::now(),
                };
                if let Err(e) = self.store.put_cache_entry(&entry) {
                    tracing::warn!(
                        screen_id = %screen_id,
                        kind = %source.kind,
                        error = %e,
                        "Failed to persist screen data"
                    );
                }
                options
            }
            Err(e) => {
                tracing::warn!(
                    screen_id = %screen_id,
                    kind = %source.kind,
                    error = %e,
                    "Screen data refresh failed; serving cached data"
                );
                self.fallback(screen_id, &source.kind)
            }
        }
    }

    async fn refresh(
        &self,
        source: &DataSourceConfig,
    ) -> Result<Vec<ScreenOption>, DataSourceError> {
        let document = tokio::time::timeout(self.timeout, fetch(&self.http, source))
            .await
            .map_err(|_| DataSourceError::Timeout(self.timeout))??;
        transform_items(&document, source.transform.as_ref())
    }

    fn fallback(&self, screen_id: &str, kind: &str) -> Vec<ScreenOption> {
        match self.store.get_cache_entry(screen_id, kind) {
            Ok(Some(entry)) => entry.options,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    screen_id = %screen_id,
                    kind = %kind,
                    error = %e,
                    "Failed to read cached screen data"
                );
                Vec::new()
            }
        }
    }

    fn hot_get(&self, key: &str) -> Option<Vec<ScreenOption>> {
        let mut cache = self.hot.lock().ok()?;
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.options.clone());
            }
            cache.pop(key);
        }
        None
    }

    fn hot_put(&self, key: String, options: Vec<ScreenOption>) {
        if let Ok(mut cache) = self.hot.lock() {
            cache.put(
                key,
                HotEntry {
                    options,
                    inserted_at: Instant::now(),
                },
            );
        }
    }
}

fn options_to_value(options: &[ScreenOption]) -> Value {
    serde_json::to_value(options).unwrap_or_else(|_| Value::Array(Vec::new()))
}
