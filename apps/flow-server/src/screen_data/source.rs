// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External screen-data sources and the transform into `{id, title}` lists.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::ScreenOption;

const ID_FIELDS: [&str; 2] = ["id", "value"];
const TITLE_FIELDS: [&str; 4] = ["title", "label", "name", "text"];
const ITEM_CONTAINERS: [&str; 4] = ["data", "items", "results", "options"];

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("unsupported HTTP method: {0}")]
    Method(String),

    #[error("data source request failed: {0}")]
    Request(String),

    #[error("data source returned {0}")]
    Status(u16),

    #[error("data source timed out after {0:?}")]
    Timeout(Duration),

    #[error("data source response was invalid: {0}")]
    InvalidResponse(String),
}

/// How to fetch one option list for a screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSourceConfig {
    /// Key the option list is stored under in the screen data.
    pub kind: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub endpoint: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub transform: Option<TransformSpec>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Explicit mapping from a response document to options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransformSpec {
    /// JSON pointer to the item array, e.g. `/data/countries`.
    #[serde(default)]
    pub items_pointer: Option<String>,
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub title_field: Option<String>,
}

/// Call the source and return its JSON document.
pub async fn fetch(http: &Client, source: &DataSourceConfig) -> Result<Value, DataSourceError> {
    let method = Method::from_bytes(source.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| DataSourceError::Method(source.method.clone()))?;

    let mut request = http.request(method, &source.endpoint);
    for (name, value) in &source.headers {
        request = request.header(name, value);
    }
    if let Some(body) = &source.body {
        request = request.json(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| DataSourceError::Request(e.without_url().to_string()))?;

    if !response.status().is_success() {
        return Err(DataSourceError::Status(response.status().as_u16()));
    }

    response
        .json()
        .await
        .map_err(|e| DataSourceError::InvalidResponse(format!("invalid JSON: {e}")))
}

/// Turn a source document into options.
///
/// Without an explicit pointer the document itself, or the first array
/// under `data`/`items`/`results`/`options`, is used. Items without an id
/// are dropped; a missing title falls back to the id.
pub fn transform_items(
    document: &Value,
    spec: Option<&TransformSpec>,
) -> Result<Vec<ScreenOption>, DataSourceError> {
    let items = locate_items(document, spec.and_then(|s| s.items_pointer.as_deref()))?;

    let id_field = spec.and_then(|s| s.id_field.as_deref());
    let title_field = spec.and_then(|s| s.title_field.as_deref());

    Ok(items
        .iter()
        .filter_map(|item| to_option(item, id_field, title_field))
        .collect())
}

fn locate_items<'a>(
    document: &'a Value,
    pointer: Option<&str>,
) -> Result<&'a Vec<Value>, DataSourceError> {
    if let Some(pointer) = pointer {
        return document
            .pointer(pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| DataSourceError::InvalidResponse(format!("no array at {pointer}")));
    }

    if let Some(items) = document.as_array() {
        return Ok(items);
    }

    ITEM_CONTAINERS
        .iter()
        .find_map(|key| document.get(key).and_then(Value::as_array))
        .ok_or_else(|| DataSourceError::InvalidResponse("no item array found".to_string()))
}

fn to_option(
    item: &Value,
    id_field: Option<&str>,
    title_field: Option<&str>,
) -> Option<ScreenOption> {
    if let Some(text) = item.as_str() {
        return Some(ScreenOption {
            id: text.to_string(),
            title: text.to_string(),
        });
    }

    let id = match id_field {
        Some(field) => scalar_text(item.get(field)?),
        None => ID_FIELDS.iter().find_map(|f| item.get(f).and_then(scalar_text)),
    }?;

    let title = match title_field {
        Some(field) => item.get(field).and_then(scalar_text),
        None => TITLE_FIELDS.iter().find_map(|f| item.get(f).and_then(scalar_text)),
    }
    .unwrap_or_else(|| id.clone());

    Some(ScreenOption { id, title })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(options: &[ScreenOption]) -> Vec<(&str, &str)> {
        options
            .iter()
            .map(|o| (o.id.as_str(), o.title.as_str()))
            .collect()
    }

    #[test]
    fn heuristics_pick_common_field_names() {
        let doc = json!([
            {"id": "US", "title": "United States"},
            {"value": 2, "label": "Two"},
            {"id": "x", "name": "Named"},
            {"id": "y", "text": "Texted"},
            {"id": "z"}
        ]);
        let options = transform_items(&doc, None).unwrap();
        assert_eq!(
            pairs(&options),
            vec![
                ("US", "United States"),
                ("2", "Two"),
                ("x", "Named"),
                ("y", "Texted"),
                ("z", "z"),
            ]
        );
    }

    #[test]
    fn explicit_transform_overrides_heuristics() {
        let doc = json!({
            "payload": {"rows": [{"code": "CA", "display": "Canada", "id": "ignored"}]}
        });
        let spec = TransformSpec {
            items_pointer: Some("/payload/rows".into()),
            id_field: Some("code".into()),
            title_field: Some("display".into()),
        };
        let options = transform_items(&doc, Some(&spec)).unwrap();
        assert_eq!(pairs(&options), vec![("CA", "Canada")]);
    }

    #[test]
    fn nested_container_and_plain_strings() {
        let doc = json!({"items": ["red", "green"]});
        let options = transform_items(&doc, None).unwrap();
        assert_eq!(pairs(&options), vec![("red", "red"), ("green", "green")]);
    }

    #[test]
    fn items_without_id_are_dropped() {
        let doc = json!({"data": [{"title": "orphan"}, {"id": "kept"}]});
        let options = transform_items(&doc, None).unwrap();
        assert_eq!(pairs(&options), vec![("kept", "kept")]);
    }

    #[test]
    fn missing_array_is_invalid() {
        assert!(matches!(
            transform_items(&json!({"count": 3}), None),
            Err(DataSourceError::InvalidResponse(_))
        ));
        let spec = TransformSpec {
            items_pointer: Some("/nope".into()),
            ..TransformSpec::default()
        };
        assert!(transform_items(&json!([]), Some(&spec)).is_err());
    }

    #[test]
    fn config_defaults_to_get() {
        let source: DataSourceConfig =
            serde_json::from_value(json!({"kind": "countries", "endpoint": "http://x"})).unwrap();
        assert_eq!(source.method, "GET");
        assert!(source.headers.is_empty());
        assert!(source.transform.is_none());
    }
}
