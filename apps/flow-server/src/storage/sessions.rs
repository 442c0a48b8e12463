// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Flow session records.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::answers::{append_records, FlowAnswerRecord};
use super::database::{FlowDatabase, StorageResult, ANSWERS, SESSIONS};
use super::SessionStore;

/// Screen marker for a session that reached completion.
pub const COMPLETED_SCREEN: &str = "COMPLETED";

/// One in-progress multi-screen conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowSession {
    pub session_id: String,
    /// Owning tenant (None for unencrypted testing requests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_token: Option<String>,
    pub current_screen: String,
    /// Accumulated free-form answers, opaque to the engine
    #[serde(default)]
    pub answers: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FlowSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_completed(&self) -> bool {
        self.current_screen == COMPLETED_SCREEN
    }
}

impl SessionStore for FlowDatabase {
    fn get_session(&self, session_id: &str) -> StorageResult<Option<FlowSession>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        match table.get(session_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn create_session(&self, session: &FlowSession, now: DateTime<Utc>) -> StorageResult<bool> {
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;

            let existing_bytes = table
                .get(session.session_id.as_str())?
                .map(|existing| existing.value().to_vec());
            if let Some(bytes) = existing_bytes {
                let existing: FlowSession = serde_json::from_slice(&bytes)?;
                if !existing.is_expired(now) && existing.tenant_id != session.tenant_id {
                    return Ok(false);
                }
            }

            let json = serde_json::to_vec(session)?;
            table.insert(session.session_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    fn update_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&mut FlowSession) -> bool,
    ) -> StorageResult<Option<FlowSession>> {
        self.update_session_with_answers(session_id, now, &mut |session| {
            apply(session).then(Vec::new)
        })
    }

    fn update_session_with_answers(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&mut FlowSession) -> Option<Vec<FlowAnswerRecord>>,
    ) -> StorageResult<Option<FlowSession>> {
        let write_txn = self.db().begin_write()?;
        let updated = {
            let mut sessions = write_txn.open_table(SESSIONS)?;

            // Read existing value and deserialize before mutating
            let existing_bytes = match sessions.get(session_id)? {
                Some(existing) => existing.value().to_vec(),
                None => return Ok(None),
            };

            let mut session: FlowSession = serde_json::from_slice(&existing_bytes)?;
            if session.is_expired(now) {
                return Ok(None);
            }
            let Some(records) = apply(&mut session) else {
                return Ok(None);
            };
            session.updated_at = now;

            let json = serde_json::to_vec(&session)?;
            sessions.insert(session_id, json.as_slice())?;

            // Dropping the transaction on error discards the session write too
            let mut answers = write_txn.open_table(ANSWERS)?;
            append_records(&mut answers, session_id, &records)?;
            session
        };
        write_txn.commit()?;
        Ok(Some(updated))
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let write_txn = self.db().begin_write()?;
        let purged = {
            let mut table = write_txn.open_table(SESSIONS)?;

            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let session: FlowSession = serde_json::from_slice(value.value())?;
                if session.is_expired(now) {
                    expired.push(key.value().to_string());
                }
            }

            for session_id in &expired {
                table.remove(session_id.as_str())?;
            }
            expired.len()
        };
        write_txn.commit()?;
        Ok(purged)
    }
}

#[cfg(test)]
pub(crate) fn sample_session(session_id: &str, now: DateTime<Utc>) -> FlowSession {
    FlowSession {
        session_id: session_id.to_string(),
        tenant_id: Some("tenant-a".to_string()),
        flow_id: "default".to_string(),
        flow_token: None,
        current_screen: "FORM".to_string(),
        answers: Map::new(),
        created_at: now,
        updated_at: now,
        expires_at: now + chrono::Duration::hours(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_database;
    use crate::storage::AnswerStore;
    use serde_json::json;
    use std::sync::Arc;

    fn answer(session: &FlowSession, field: &str, now: DateTime<Utc>) -> FlowAnswerRecord {
        FlowAnswerRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            session_id: session.session_id.clone(),
            tenant_id: session.tenant_id.clone(),
            flow_id: session.flow_id.clone(),
            screen: session.current_screen.clone(),
            field: field.to_string(),
            value: json!(true),
            answers_snapshot: session.answers.clone(),
            submitted_at: now,
        }
    }

    #[test]
    fn create_and_get_session() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        let session = sample_session("s-1", now);
        assert!(db.create_session(&session, now).unwrap());

        assert_eq!(db.get_session("s-1").unwrap(), Some(session));
        assert_eq!(db.get_session("s-missing").unwrap(), None);
    }

    #[test]
    fn update_applies_mutation_atomically() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        db.create_session(&sample_session("s-2", now), now).unwrap();

        let later = now + chrono::Duration::minutes(1);
        let updated = db
            .update_session("s-2", later, &mut |s| {
                s.current_screen = "DETAILS".to_string();
                true
            })
            .unwrap()
            .unwrap();

        assert_eq!(updated.current_screen, "DETAILS");
        assert_eq!(updated.updated_at, later);
        assert_eq!(db.get_session("s-2").unwrap().unwrap().current_screen, "DETAILS");
    }

    #[test]
    fn update_missing_session_writes_nothing() {
        let (_dir, db) = test_database();
        let mut called = false;
        let result = db
            .update_session("ghost", Utc::now(), &mut |_| {
                called = true;
                true
            })
            .unwrap();
        assert!(result.is_none());
        assert!(!called);
        assert!(db.get_session("ghost").unwrap().is_none());
    }

    #[test]
    fn update_expired_session_is_inert() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        db.create_session(&sample_session("s-old", now), now).unwrap();

        let after_expiry = now + chrono::Duration::hours(2);
        let result = db
            .update_session("s-old", after_expiry, &mut |s| {
                s.current_screen = "OTHER".to_string();
                true
            })
            .unwrap();
        assert!(result.is_none());
        assert_eq!(db.get_session("s-old").unwrap().unwrap().current_screen, "FORM");
    }

    #[test]
    fn rejected_update_is_not_committed() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        db.create_session(&sample_session("s-3", now), now).unwrap();

        let result = db
            .update_session("s-3", now, &mut |s| {
                s.current_screen = "NOPE".to_string();
                false
            })
            .unwrap();
        assert!(result.is_none());
        assert_eq!(db.get_session("s-3").unwrap().unwrap().current_screen, "FORM");
    }

    #[test]
    fn purge_removes_only_expired() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        let mut stale = sample_session("stale", now);
        stale.expires_at = now - chrono::Duration::seconds(1);
        db.create_session(&stale, now).unwrap();
        db.create_session(&sample_session("live", now), now).unwrap();

        assert_eq!(db.purge_expired(now).unwrap(), 1);
        assert!(db.get_session("stale").unwrap().is_none());
        assert!(db.get_session("live").unwrap().is_some());
    }

    #[test]
    fn create_refuses_live_session_of_another_tenant() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        assert!(db.create_session(&sample_session("s-shared", now), now).unwrap());

        let mut other = sample_session("s-shared", now);
        other.tenant_id = Some("tenant-b".to_string());
        other.current_screen = "START".to_string();
        assert!(!db.create_session(&other, now).unwrap());

        let mut unowned = sample_session("s-shared", now);
        unowned.tenant_id = None;
        assert!(!db.create_session(&unowned, now).unwrap());

        let stored = db.get_session("s-shared").unwrap().unwrap();
        assert_eq!(stored.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(stored.current_screen, "FORM");
    }

    #[test]
    fn create_replaces_own_or_expired_session() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        db.create_session(&sample_session("s-4", now), now).unwrap();

        let mut restarted = sample_session("s-4", now);
        restarted.current_screen = "START".to_string();
        assert!(db.create_session(&restarted, now).unwrap());
        assert_eq!(db.get_session("s-4").unwrap().unwrap().current_screen, "START");

        let after_expiry = now + chrono::Duration::hours(2);
        let mut other = sample_session("s-4", after_expiry);
        other.tenant_id = Some("tenant-b".to_string());
        assert!(db.create_session(&other, after_expiry).unwrap());
        let stored = db.get_session("s-4").unwrap().unwrap();
        assert_eq!(stored.tenant_id.as_deref(), Some("tenant-b"));
    }

    #[test]
    fn update_with_answers_commits_both() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        db.create_session(&sample_session("s-5", now), now).unwrap();

        let updated = db
            .update_session_with_answers("s-5", now, &mut |s| {
                s.answers.insert("country".to_string(), json!("US"));
                s.current_screen = COMPLETED_SCREEN.to_string();
                Some(vec![answer(s, "country", now)])
            })
            .unwrap()
            .unwrap();

        assert!(updated.is_completed());
        let records = db.list_answers("s-5").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].answers_snapshot["country"], json!("US"));
    }

    #[test]
    fn failed_answer_write_leaves_session_unmoved() {
        let (_dir, db) = test_database();
        let now = Utc::now();
        db.create_session(&sample_session("s-6", now), now).unwrap();

        let err = db
            .update_session_with_answers("s-6", now, &mut |s| {
                s.current_screen = COMPLETED_SCREEN.to_string();
                let mut stray = answer(s, "country", now);
                stray.session_id = "s-elsewhere".to_string();
                Some(vec![answer(s, "plan", now), stray])
            })
            .unwrap_err();

        assert!(matches!(err, crate::storage::StorageError::InvalidRecord(_)));
        assert_eq!(db.get_session("s-6").unwrap().unwrap().current_screen, "FORM");
        assert!(db.list_answers("s-6").unwrap().is_empty());
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        const WRITERS: usize = 16;

        let (_dir, db) = test_database();
        let now = Utc::now();
        db.create_session(&sample_session("s-race", now), now).unwrap();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.update_session("s-race", now, &mut |s| {
                        s.answers.insert(format!("field-{i}"), json!(i));
                        true
                    })
                    .unwrap()
                    .is_some()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        let session = db.get_session("s-race").unwrap().unwrap();
        assert_eq!(session.answers.len(), WRITERS);
        for i in 0..WRITERS {
            assert_eq!(session.answers[&format!("field-{i}")], json!(i));
        }
    }
}
