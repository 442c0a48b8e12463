// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Loaded once from the environment at startup. Invalid values stop the
//! process with a [`ConfigError`]; nothing re-reads the environment later.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `flow.redb` | `./data` |
//! | `SIGNATURE_POLICY` | `reject` or `permissive` | `reject` |
//! | `ALLOW_PLAINTEXT_REQUESTS` | Accept unencrypted testing requests | `false` |
//! | `SESSION_TTL_SECS` | Sliding session lifetime | `86400` |
//! | `MAX_RESOLUTION_CANDIDATES` | Tenants tried per implicit request | `64` |
//! | `SCREEN_DATA_TIMEOUT_MS` | Hard bound on one data source refresh | `5000` |
//! | `SCREEN_DATA_CACHE_TTL_SECS` | Freshness of the in-process cache | `300` |
//! | `SCREEN_DATA_CACHE_CAPACITY` | In-process cache entries | `256` |
//! | `SWEEP_INTERVAL_SECS` | Expired session sweep period | `600` |
//! | `FLOW_DEFINITIONS_PATH` | JSON flow catalogue | none |
//! | `TENANT_SEED_PATH` | JSON array of tenants upserted at boot | none |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | Serve HTTPS when both are set | none |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::SignaturePolicy;
use crate::screen_data::ScreenDataSettings;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const SIGNATURE_POLICY_ENV: &str = "SIGNATURE_POLICY";
pub const ALLOW_PLAINTEXT_ENV: &str = "ALLOW_PLAINTEXT_REQUESTS";
pub const SESSION_TTL_ENV: &str = "SESSION_TTL_SECS";
pub const MAX_CANDIDATES_ENV: &str = "MAX_RESOLUTION_CANDIDATES";
pub const SCREEN_DATA_TIMEOUT_ENV: &str = "SCREEN_DATA_TIMEOUT_MS";
pub const SCREEN_DATA_TTL_ENV: &str = "SCREEN_DATA_CACHE_TTL_SECS";
pub const SCREEN_DATA_CAPACITY_ENV: &str = "SCREEN_DATA_CACHE_CAPACITY";
pub const SWEEP_INTERVAL_ENV: &str = "SWEEP_INTERVAL_SECS";
pub const FLOW_DEFINITIONS_ENV: &str = "FLOW_DEFINITIONS_PATH";
pub const TENANT_SEED_ENV: &str = "TENANT_SEED_PATH";
pub const TLS_CERT_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Name of the redb file inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "flow.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set together with {1}")]
    Incomplete(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("expected json or pretty, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub signature_policy: SignaturePolicy,
    pub allow_plaintext_requests: bool,
    pub session_ttl: Duration,
    pub max_resolution_candidates: usize,
    pub screen_data: ScreenDataSettings,
    pub sweep_interval: Duration,
    pub flow_definitions_path: Option<PathBuf>,
    pub tenant_seed_path: Option<PathBuf>,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let host = env.or_default(HOST_ENV, "0.0.0.0");
        let port: u16 = env.parse_or(PORT_ENV, 8080)?;
        let bind_addr = parse_value(HOST_ENV, &format!("{host}:{port}"))?;

        let tls = match (env.optional(TLS_CERT_ENV), env.optional(TLS_KEY_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Incomplete(TLS_CERT_ENV, TLS_KEY_ENV)),
            (None, Some(_)) => return Err(ConfigError::Incomplete(TLS_KEY_ENV, TLS_CERT_ENV)),
        };

        Ok(Self {
            bind_addr,
            data_dir: env.or_default(DATA_DIR_ENV, "./data").into(),
            signature_policy: env.parse_or(SIGNATURE_POLICY_ENV, SignaturePolicy::Reject)?,
            allow_plaintext_requests: env.flag(ALLOW_PLAINTEXT_ENV)?,
            session_ttl: Duration::from_secs(env.positive(SESSION_TTL_ENV, 86_400)?),
            max_resolution_candidates: env.positive(MAX_CANDIDATES_ENV, 64)? as usize,
            screen_data: ScreenDataSettings {
                timeout: Duration::from_millis(env.positive(SCREEN_DATA_TIMEOUT_ENV, 5_000)?),
                cache_ttl: Duration::from_secs(env.parse_or(SCREEN_DATA_TTL_ENV, 300)?),
                cache_capacity: env.positive(SCREEN_DATA_CAPACITY_ENV, 256)? as usize,
            },
            sweep_interval: Duration::from_secs(env.positive(SWEEP_INTERVAL_ENV, 600)?),
            flow_definitions_path: env.optional(FLOW_DEFINITIONS_ENV).map(PathBuf::from),
            tenant_seed_path: env.optional(TENANT_SEED_ENV).map(PathBuf::from),
            tls,
            log_format: env.parse_or(LOG_FORMAT_ENV, LogFormat::Pretty)?,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

// =============================================================================
// Env helpers
// =============================================================================

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(value) => parse_value(name, &value),
            None => Ok(default),
        }
    }

    fn positive(&self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.parse_or(name, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                name,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.optional(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                name,
                value: v,
                reason: "expected a boolean".to_string(),
            }),
        }
    }
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
