// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process configuration from environment variables.
//!
//! Every option has a default; a present-but-unparseable value is a
//! configuration error (daemon exit code 1), never silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SnapshotReason;

/// Sliding-window size for all rate limits.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Invalid configuration value.
#[derive(Debug, Error)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Per-reason snapshot retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTtls {
    pub pre_compact: Duration,
    pub manual: Duration,
    pub checkpoint: Duration,
    pub error_recovery: Duration,
}

impl Default for SnapshotTtls {
    fn default() -> Self {
        Self {
            pre_compact: Duration::from_secs(7 * 24 * 3600),
            manual: Duration::from_secs(2 * 3600),
            checkpoint: Duration::from_secs(2 * 3600),
            error_recovery: Duration::from_secs(2 * 3600),
        }
    }
}

impl SnapshotTtls {
    pub fn for_reason(&self, reason: SnapshotReason) -> Duration {
        match reason {
            SnapshotReason::PreCompact => self.pre_compact,
            SnapshotReason::Manual => self.manual,
            SnapshotReason::Checkpoint => self.checkpoint,
            SnapshotReason::ErrorRecovery => self.error_recovery,
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// KV connection string (`KV_URL`)
    pub kv_url: String,
    /// Optional relational store DSN (`DB_URL`)
    pub db_url: Option<String>,
    /// Transport listen port (`PORT`)
    pub port: u16,
    /// WebSocket upgrade path (`WS_PATH`)
    pub ws_path: String,
    /// Instance sweep period (`HEALTH_CHECK_INTERVAL_MS`)
    pub health_check_interval: Duration,
    /// Threshold to mark an instance OFFLINE (`STALE_INSTANCE_MS`)
    pub stale_instance_after: Duration,
    /// Per-process concurrency cap (`MAX_IN_FLIGHT`)
    pub max_in_flight: usize,
    /// Fallback handler timeout (`DEFAULT_TIMEOUT_MS`)
    pub default_timeout: Duration,
    /// Fallback cache TTL (`CACHE_DEFAULT_TTL_S`); zero disables caching
    pub cache_default_ttl: Duration,
    /// Per-reason snapshot retention (`SNAPSHOT_TTL_<REASON>_S`)
    pub snapshot_ttls: SnapshotTtls,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kv_url: "redis://127.0.0.1:6379".to_string(),
            db_url: None,
            port: 3000,
            ws_path: "/ws".to_string(),
            health_check_interval: Duration::from_secs(5),
            stale_instance_after: Duration::from_secs(60),
            max_in_flight: 1024,
            default_timeout: Duration::from_secs(5),
            cache_default_ttl: Duration::ZERO,
            snapshot_ttls: SnapshotTtls::default(),
        }
    }
}

impl Config {
    /// Load from process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        if let Ok(url) = std::env::var("KV_URL") {
            if !url.is_empty() {
                cfg.kv_url = url;
            }
        }
        cfg.db_url = std::env::var("DB_URL").ok().filter(|s| !s.is_empty());
        if let Some(port) = parse_var::<u16>("PORT")? {
            cfg.port = port;
        }
        if let Ok(path) = std::env::var("WS_PATH") {
            if !path.is_empty() {
                cfg.ws_path = path;
            }
        }
        if let Some(ms) = parse_var::<u64>("HEALTH_CHECK_INTERVAL_MS")? {
            cfg.health_check_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("STALE_INSTANCE_MS")? {
            cfg.stale_instance_after = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize>("MAX_IN_FLIGHT")? {
            cfg.max_in_flight = n;
        }
        if let Some(ms) = parse_var::<u64>("DEFAULT_TIMEOUT_MS")? {
            cfg.default_timeout = Duration::from_millis(ms);
        }
        if let Some(s) = parse_var::<u64>("CACHE_DEFAULT_TTL_S")? {
            cfg.cache_default_ttl = Duration::from_secs(s);
        }
        if let Some(s) = parse_var::<u64>("SNAPSHOT_TTL_PRE_COMPACT_S")? {
            cfg.snapshot_ttls.pre_compact = Duration::from_secs(s);
        }
        if let Some(s) = parse_var::<u64>("SNAPSHOT_TTL_MANUAL_S")? {
            cfg.snapshot_ttls.manual = Duration::from_secs(s);
        }
        if let Some(s) = parse_var::<u64>("SNAPSHOT_TTL_CHECKPOINT_S")? {
            cfg.snapshot_ttls.checkpoint = Duration::from_secs(s);
        }
        if let Some(s) = parse_var::<u64>("SNAPSHOT_TTL_ERROR_RECOVERY_S")? {
            cfg.snapshot_ttls.error_recovery = Duration::from_secs(s);
        }

        Ok(cfg)
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError { var, value: raw }),
        _ => Ok(None),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
