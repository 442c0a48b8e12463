// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistent fallback cache for screen option lists.

use chrono::{DateTime, Utc};
use redb::ReadableDatabase;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{FlowDatabase, StorageResult, SCREEN_CACHE};
use super::ScreenCacheStore;

/// One selectable option, the uniform shape every data source is mapped to.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ScreenOption {
    pub id: String,
    pub title: String,
}

/// Last successfully fetched option list for a (screen, kind) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenCacheEntry {
    pub screen_id: String,
    pub kind: String,
    pub options: Vec<ScreenOption>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn cache_key(screen_id: &str, kind: &str) -> String {
    format!("{screen_id}|{kind}")
}

impl ScreenCacheStore for FlowDatabase {
    fn get_cache_entry(
        &self,
        screen_id: &str,
        kind: &str,
    ) -> StorageResult<Option<ScreenCacheEntry>> {
        let key = cache_key(screen_id, kind);
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(SCREEN_CACHE)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put_cache_entry(&self, entry: &ScreenCacheEntry) -> StorageResult<()> {
        let key = cache_key(&entry.screen_id, &entry.kind);
        let json = serde_json::to_vec(entry)?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(SCREEN_CACHE)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
