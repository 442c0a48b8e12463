// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Flow Storage
//!
//! Persistent state shared between requests: tenant credentials, flow
//! sessions, the append-only answer log and the screen data fallback cache.
//!
//! The engine and resolver only see the traits below. [`FlowDatabase`]
//! implements all of them on a single redb file; tests open one database per
//! case so tenant populations never leak between them.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   flow.redb
//!     tenants       tenant_id → TenantCredential
//!     sessions      session_id → FlowSession
//!     answers       session-scoped key → FlowAnswerRecord (append-only)
//!     screen_cache  screen_id|kind → ScreenCacheEntry
//! ```

use chrono::{DateTime, Utc};

pub mod answers;
pub mod database;
pub mod screen_cache;
pub mod sessions;
pub mod tenants;

pub use answers::FlowAnswerRecord;
pub use database::{FlowDatabase, StorageError, StorageResult};
pub use screen_cache::{ScreenCacheEntry, ScreenOption};
pub use sessions::{FlowSession, COMPLETED_SCREEN};
pub use tenants::{CredentialFilter, TenantCredential};

/// Tenant lookup used by key resolution.
pub trait TenantStore: Send + Sync {
    fn get_tenant(&self, tenant_id: &str) -> StorageResult<Option<TenantCredential>>;

    /// Tenants matching `filter`, in a stable order (ascending tenant id).
    fn list_tenants(&self, filter: &CredentialFilter) -> StorageResult<Vec<TenantCredential>>;
}

/// Per-conversation navigation state.
pub trait SessionStore: Send + Sync {
    fn get_session(&self, session_id: &str) -> StorageResult<Option<FlowSession>>;

    /// Start a conversation under `session.session_id`, atomically.
    ///
    /// Inserts when the id is free or its session expired at `now`, and
    /// replaces a session owned by the same tenant. Returns `false` without
    /// writing when another tenant owns a live session with this id.
    fn create_session(&self, session: &FlowSession, now: DateTime<Utc>) -> StorageResult<bool>;

    /// Atomic read-modify-write keyed by session id.
    ///
    /// Returns `None` without writing when the session is absent, expired at
    /// `now`, or when `apply` returns `false`.
    fn update_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&mut FlowSession) -> bool,
    ) -> StorageResult<Option<FlowSession>>;

    /// [`SessionStore::update_session`] that also appends the answer records
    /// returned by `apply`, in the same transaction.
    ///
    /// `apply` returns `None` to leave the session untouched. Either the
    /// session update and every record are committed, or nothing is.
    fn update_session_with_answers(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&mut FlowSession) -> Option<Vec<FlowAnswerRecord>>,
    ) -> StorageResult<Option<FlowSession>>;

    /// Remove sessions expired at `now`, returning how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize>;
}

/// Read side of the append-only answer history.
///
/// Records are only ever written together with their session update, see
/// [`SessionStore::update_session_with_answers`].
pub trait AnswerStore: Send + Sync {
    /// Records of one session in submission order.
    fn list_answers(&self, session_id: &str) -> StorageResult<Vec<FlowAnswerRecord>>;
}

/// Fallback cache for screen option lists.
pub trait ScreenCacheStore: Send + Sync {
    fn get_cache_entry(
        &self,
        screen_id: &str,
        kind: &str,
    ) -> StorageResult<Option<ScreenCacheEntry>>;

    fn put_cache_entry(&self, entry: &ScreenCacheEntry) -> StorageResult<()>;
}
