// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Flow catalogue.
//!
//! Each flow is a screen graph loaded from JSON at startup:
//!
//! ```json
//! [{
//!   "flow_id": "default",
//!   "first_screen": "FORM",
//!   "screens": [{
//!     "id": "FORM",
//!     "routes": [{"field": "country", "equals": "CA", "next": "PROVINCE"}],
//!     "data_sources": [{"kind": "countries", "endpoint": "https://example.test/countries"}]
//!   }, {"id": "PROVINCE"}]
//! }]
//! ```
//!
//! A screen without a matching route or `next` ends the flow.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::screen_data::DataSourceConfig;
use crate::storage::COMPLETED_SCREEN;

/// Flow used when neither the request nor the tenant names one.
pub const DEFAULT_FLOW_ID: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read flow catalogue: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse flow catalogue: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("flow {flow_id}: {reason}")]
    Invalid { flow_id: String, reason: String },
}

/// Conditional transition out of a screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteRule {
    pub field: String,
    pub equals: Value,
    pub next: String,
}

impl RouteRule {
    fn matches(&self, submitted: &Map<String, Value>) -> bool {
        submitted.get(&self.field) == Some(&self.equals)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScreenDefinition {
    pub id: String,
    /// Unconditional successor, used when no route matches.
    #[serde(default)]
    pub next: Option<String>,
    /// Checked in order; the first match wins.
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    /// Static data merged into every response for this screen.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowDefinition {
    pub flow_id: String,
    #[serde(default)]
    pub first_screen: Option<String>,
    #[serde(default)]
    pub screens: Vec<ScreenDefinition>,
}

impl FlowDefinition {
    pub fn screen(&self, screen_id: &str) -> Option<&ScreenDefinition> {
        self.screens.iter().find(|s| s.id == screen_id)
    }

    /// Next screen after `from_screen` given the submitted fields.
    ///
    /// `None` means the flow is complete.
    pub fn route(&self, from_screen: &str, submitted: &Map<String, Value>) -> Option<String> {
        let screen = self.screen(from_screen)?;
        let next = screen
            .routes
            .iter()
            .find(|rule| rule.matches(submitted))
            .map(|rule| rule.next.clone())
            .or_else(|| screen.next.clone())?;

        if next == COMPLETED_SCREEN {
            None
        } else {
            Some(next)
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: String| CatalogError::Invalid {
            flow_id: self.flow_id.clone(),
            reason,
        };

        if self.flow_id.trim().is_empty() {
            return Err(invalid("flow_id must not be empty".into()));
        }
        if let Some(first) = &self.first_screen {
            if self.screen(first).is_none() {
                return Err(invalid(format!("first screen {first} is not defined")));
            }
        }
        for screen in &self.screens {
            let targets = screen
                .routes
                .iter()
                .map(|r| &r.next)
                .chain(screen.next.iter());
            for target in targets {
                if target != COMPLETED_SCREEN && self.screen(target).is_none() {
                    return Err(invalid(format!(
                        "screen {} routes to undefined screen {target}",
                        screen.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// All known flows, keyed by flow id.
#[derive(Debug, Default)]
pub struct FlowCatalog {
    flows: HashMap<String, FlowDefinition>,
    empty: FlowDefinition,
}

impl FlowCatalog {
    pub fn from_definitions(definitions: Vec<FlowDefinition>) -> Result<Self, CatalogError> {
        let mut flows = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            definition.validate()?;
            flows.insert(definition.flow_id.clone(), definition);
        }
        Ok(Self {
            flows,
            empty: FlowDefinition::default(),
        })
    }

    /// Load a JSON array of flow definitions.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read(path)?;
        let definitions: Vec<FlowDefinition> = serde_json::from_slice(&raw)?;
        Self::from_definitions(definitions)
    }

    /// Definition for `flow_id`, or an empty one with no screens.
    pub fn definition(&self, flow_id: &str) -> &FlowDefinition {
        self.flows.get(flow_id).unwrap_or(&self.empty)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
