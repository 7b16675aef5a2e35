// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-event counters and global aggregates, stored in KV hashes.

use std::collections::BTreeMap;

use cb_core::keys;
use cb_kv::{ops, KvError, KvStore};

/// Latency histogram bucket upper bounds, in milliseconds.
const BUCKETS_MS: [u64; 6] = [10, 50, 100, 500, 1000, 5000];

fn bucket_field(latency_ms: u64) -> String {
    for bound in BUCKETS_MS {
        if latency_ms <= bound {
            return format!("latency_le_{bound}");
        }
    }
    "latency_le_inf".to_string()
}

/// Record one invocation outcome against the event's counter hash
/// (a single pipelined round trip).
pub async fn record_call(
    kv: &dyn KvStore,
    event: &str,
    ok: bool,
    latency_ms: u64,
) -> Result<(), KvError> {
    let key = keys::metrics_event(event);
    kv.hincr_many(
        &key,
        &[
            ("invocations".to_string(), 1),
            ((if ok { "success" } else { "failure" }).to_string(), 1),
            (bucket_field(latency_ms), 1),
            ("latency_total_ms".to_string(), latency_ms as i64),
        ],
    )
    .await?;
    kv.sadd(&keys::metrics_index(), event).await?;
    Ok(())
}

/// Fold every event's counters into the global aggregate hash. Returns
/// the number of events that had new data.
pub async fn aggregate(kv: &dyn KvStore) -> Result<u64, KvError> {
    let events = kv.smembers(&keys::metrics_index()).await?;
    let mut changed = 0;
    for event in events {
        if ops::metrics_fold(kv, &event).await? > 0 {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Read a counter hash as a sorted map (per-event or global).
pub async fn read_counters(
    kv: &dyn KvStore,
    event: Option<&str>,
) -> Result<BTreeMap<String, i64>, KvError> {
    let key = match event {
        Some(event) => keys::metrics_event(event),
        None => keys::metrics_global(),
    };
    let fields = kv.hgetall(&key).await?;
    Ok(fields
        .into_iter()
        .filter_map(|(field, value)| value.parse().ok().map(|v| (field, v)))
        .collect())
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
