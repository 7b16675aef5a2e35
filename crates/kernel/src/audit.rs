// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capped audit log of handler invocations.

use serde::{Deserialize, Serialize};

use cb_core::keys;
use cb_kv::{KvError, KvStore};

/// Retention cap of the audit list.
pub const AUDIT_CAP: i64 = 10_000;

/// One compact audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event: String,
    pub caller: String,
    pub ok: bool,
    pub latency_ms: u64,
    pub ts: u64,
}

/// Append one record, trimming to the cap.
pub async fn record(kv: &dyn KvStore, entry: &AuditRecord) -> Result<(), KvError> {
    let line = serde_json::to_string(entry)
        .map_err(|err| KvError::Command(format!("audit encode: {err}")))?;
    kv.lpush(&keys::audit_log(), &line).await?;
    kv.ltrim(&keys::audit_log(), 0, AUDIT_CAP - 1).await?;
    Ok(())
}

/// Most recent records, newest first.
pub async fn recent(kv: &dyn KvStore, count: i64) -> Result<Vec<AuditRecord>, KvError> {
    let lines = kv.lrange(&keys::audit_log(), 0, count - 1).await?;
    Ok(lines
        .iter()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
