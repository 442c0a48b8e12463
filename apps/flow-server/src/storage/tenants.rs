// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tenant credential records.
//!
//! A tenant owns one RSA key pair, one shared signing secret, one platform
//! access token and one platform channel identifier. The private key and the
//! shared secret are written together; a tenant only takes part in key
//! resolution when both are present.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};

use super::database::{FlowDatabase, StorageError, StorageResult, TENANTS};
use super::TenantStore;
use crate::crypto::keys::{generate_key_pair, TENANT_KEY_BITS};

/// Tenant credential stored in the `tenants` table.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantCredential {
    /// Unique tenant identifier
    pub tenant_id: String,
    /// PEM private key (PKCS#8, optionally encrypted, or PKCS#1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_pem: Option<String>,
    /// Passphrase for an encrypted PKCS#8 private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
    /// PEM public key registered with the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_pem: Option<String>,
    /// HMAC secret used to sign request bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
    /// Platform access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Platform-assigned channel identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Whether the platform acknowledged the current public key
    #[serde(default)]
    pub public_key_uploaded: bool,
    /// Flow used when a request does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_flow_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl TenantCredential {
    /// New tenant with no credentials yet.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            private_key_pem: None,
            private_key_passphrase: None,
            public_key_pem: None,
            shared_secret: None,
            access_token: None,
            channel_id: None,
            public_key_uploaded: false,
            default_flow_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Private key and shared secret are both present and non-empty.
    pub fn has_complete_credentials(&self) -> bool {
        non_empty(&self.private_key_pem) && non_empty(&self.shared_secret)
    }

    /// Private key and shared secret must be set together or not at all.
    pub fn credentials_consistent(&self) -> bool {
        non_empty(&self.private_key_pem) == non_empty(&self.shared_secret)
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredential")
            .field("tenant_id", &self.tenant_id)
            .field("has_private_key", &non_empty(&self.private_key_pem))
            .field("has_shared_secret", &non_empty(&self.shared_secret))
            .field("has_access_token", &non_empty(&self.access_token))
            .field("channel_id", &self.channel_id)
            .field("public_key_uploaded", &self.public_key_uploaded)
            .field("default_flow_id", &self.default_flow_id)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Filter applied when listing resolution candidates.
///
/// Complete credentials are always required; the flags narrow further.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialFilter {
    pub require_uploaded_key: bool,
    pub require_channel: bool,
}

impl CredentialFilter {
    pub fn matches(&self, tenant: &TenantCredential) -> bool {
        tenant.has_complete_credentials()
            && (!self.require_uploaded_key || tenant.public_key_uploaded)
            && (!self.require_channel || non_empty(&tenant.channel_id))
    }
}

impl FlowDatabase {
    /// Insert or replace a tenant record.
    ///
    /// Rejects records where only one of private key and shared secret is set.
    pub fn upsert_tenant(&self, tenant: &TenantCredential) -> StorageResult<()> {
        if !tenant.credentials_consistent() {
            return Err(StorageError::InvalidRecord(format!(
                "tenant {} must set private key and shared secret together",
                tenant.tenant_id
            )));
        }
        let json = serde_json::to_vec(tenant)?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(TENANTS)?;
            table.insert(tenant.tenant_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Replace the tenant's key pair wholesale.
    ///
    /// The old pair is discarded and the upload acknowledgement is reset, so
    /// the new public key has to be registered with the platform again.
    /// `shared_secret` replaces the signing secret alongside the key pair.
    pub fn rotate_tenant_keys(
        &self,
        tenant_id: &str,
        shared_secret: &str,
    ) -> StorageResult<TenantCredential> {
        let pair = generate_key_pair(TENANT_KEY_BITS)
            .map_err(|e| StorageError::KeyGeneration(e.to_string()))?;

        let write_txn = self.db().begin_write()?;
        let tenant = {
            let mut table = write_txn.open_table(TENANTS)?;
            let existing_bytes = {
                let existing = table
                    .get(tenant_id)?
                    .ok_or_else(|| StorageError::NotFound(format!("Tenant {tenant_id}")))?;
                existing.value().to_vec()
            };

            let mut tenant: TenantCredential = serde_json::from_slice(&existing_bytes)?;
            tenant.private_key_pem = Some(pair.private_key_pem);
            tenant.private_key_passphrase = None;
            tenant.public_key_pem = Some(pair.public_key_pem);
            tenant.shared_secret = Some(shared_secret.to_string());
            tenant.public_key_uploaded = false;
            tenant.updated_at = Utc::now();

            let json = serde_json::to_vec(&tenant)?;
            table.insert(tenant_id, json.as_slice())?;
            tenant
        };
        write_txn.commit()?;

        tracing::info!(tenant_id = %tenant_id, "Rotated tenant key pair");
        Ok(tenant)
    }

    /// Upsert every tenant in a JSON array file, returning how many were written.
    ///
    /// The whole file is validated before anything is written.
    pub fn seed_tenants_from_file(&self, path: &Path) -> StorageResult<usize> {
        let raw = std::fs::read(path)?;
        let tenants: Vec<TenantCredential> = serde_json::from_slice(&raw)?;
        if let Some(bad) = tenants.iter().find(|t| !t.credentials_consistent()) {
            return Err(StorageError::InvalidRecord(format!(
                "tenant {} must set private key and shared secret together",
                bad.tenant_id
            )));
        }
        for tenant in &tenants {
            self.upsert_tenant(tenant)?;
        }
        Ok(tenants.len())
    }

    /// Record that the platform acknowledged the tenant's public key.
    pub fn mark_public_key_uploaded(&self, tenant_id: &str) -> StorageResult<()> {
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(TENANTS)?;
            let existing_bytes = {
                let existing = table
                    .get(tenant_id)?
                    .ok_or_else(|| StorageError::NotFound(format!("Tenant {tenant_id}")))?;
                existing.value().to_vec()
            };

            let mut tenant: TenantCredential = serde_json::from_slice(&existing_bytes)?;
            tenant.public_key_uploaded = true;
            tenant.updated_at = Utc::now();

            let json = serde_json::to_vec(&tenant)?;
            table.insert(tenant_id, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl TenantStore for FlowDatabase {
    fn get_tenant(&self, tenant_id: &str) -> StorageResult<Option<TenantCredential>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(TENANTS)?;
        match table.get(tenant_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_tenants(&self, filter: &CredentialFilter) -> StorageResult<Vec<TenantCredential>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(TENANTS)?;

        let mut tenants = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match serde_json::from_slice::<TenantCredential>(value.value()) {
                Ok(tenant) if filter.matches(&tenant) => tenants.push(tenant),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %key.value(),
                        error = %e,
                        "Skipping unreadable tenant record"
                    );
                }
            }
        }
        Ok(tenants)
    }
}
