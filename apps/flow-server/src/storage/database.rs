// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded flow database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `tenants`: tenant_id → serialized TenantCredential
//! - `sessions`: session_id → serialized FlowSession
//! - `answers`: composite key (len|session_id|micros|seq|record_id) → serialized FlowAnswerRecord
//! - `screen_cache`: `screen_id|kind` → serialized ScreenCacheEntry
//!
//! redb serializes write transactions, so every read-modify-write done inside
//! a single `begin_write` is atomic with respect to other writers.

use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition};

// =============================================================================
// Table Definitions
// =============================================================================

/// Tenant credentials: tenant_id → JSON bytes.
pub(super) const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Flow sessions: session_id → JSON bytes.
pub(super) const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Append-only answer log, range-scannable per session.
pub(super) const ANSWERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("answers");

/// Screen data fallback cache: `screen_id|kind` → JSON bytes.
pub(super) const SCREEN_CACHE: TableDefinition<&str, &[u8]> = TableDefinition::new("screen_cache");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// FlowDatabase
// =============================================================================

/// Embedded ACID store for tenants, sessions, answers and screen cache.
pub struct FlowDatabase {
    db: Database,
}

impl FlowDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TENANTS)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(ANSWERS)?;
            let _ = write_txn.open_table(SCREEN_CACHE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Verify the database answers a read transaction.
    pub fn health_check(&self) -> StorageResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(SESSIONS)?;
        Ok(())
    }

    pub(super) fn db(&self) -> &Database {
        &self.db
    }
}

#[cfg(test)]
pub(crate) fn test_database() -> (tempfile::TempDir, FlowDatabase) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = FlowDatabase::open(&dir.path().join("flow.redb")).expect("open database");
    (dir, db)
}
