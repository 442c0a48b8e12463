// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only answer log.
//!
//! One record per submitted field. Resubmitting a field appends a new record;
//! earlier records are never updated or deleted.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::database::{FlowDatabase, StorageError, StorageResult, ANSWERS};
use super::AnswerStore;

/// A single submitted value plus the full answer set at submission time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowAnswerRecord {
    pub record_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub flow_id: String,
    pub screen: String,
    pub field: String,
    pub value: Value,
    pub answers_snapshot: Map<String, Value>,
    pub submitted_at: DateTime<Utc>,
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Length-prefixed session id, so one session id can never prefix another.
fn make_prefix(session_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + session_id.len());
    prefix.extend_from_slice(&(session_id.len() as u32).to_be_bytes());
    prefix.extend_from_slice(session_id.as_bytes());
    prefix
}

/// Upper bound for a range scan over one session's records.
fn make_prefix_end(session_id: &str) -> Vec<u8> {
    let mut end = make_prefix(session_id);
    end.extend_from_slice(&[0xFF; 64]);
    end
}

/// Format: `len | session_id | micros_be | seq_be | record_id`
///
/// Records sort by submission time, then by position within one submission.
fn make_record_key(record: &FlowAnswerRecord, seq: u32) -> Vec<u8> {
    let mut key = make_prefix(&record.session_id);
    let micros = record.submitted_at.timestamp_micros().max(0) as u64;
    key.extend_from_slice(&micros.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key.extend_from_slice(record.record_id.as_bytes());
    key
}

/// Insert `records` into an open answers table.
///
/// Every record must belong to `session_id`; the caller commits or drops the
/// surrounding transaction.
pub(super) fn append_records(
    table: &mut Table<'_, &'static [u8], &'static [u8]>,
    session_id: &str,
    records: &[FlowAnswerRecord],
) -> StorageResult<()> {
    for (seq, record) in records.iter().enumerate() {
        if record.session_id != session_id {
            return Err(StorageError::InvalidRecord(format!(
                "answer {} belongs to session {}, not {session_id}",
                record.record_id, record.session_id
            )));
        }
        let key = make_record_key(record, seq as u32);
        let json = serde_json::to_vec(record)?;
        table.insert(key.as_slice(), json.as_slice())?;
    }
    Ok(())
}

impl AnswerStore for FlowDatabase {
    fn list_answers(&self, session_id: &str) -> StorageResult<Vec<FlowAnswerRecord>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(ANSWERS)?;

        let prefix = make_prefix(session_id);
        let prefix_end = make_prefix_end(session_id);

        let mut records = Vec::new();
        for entry in table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }
}
