// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state processor: ordered event log plus condensed views.
//!
//! Every persisted event is appended to the session's stream and folded
//! into the condensed hash in the same pass. The condensed view is only
//! ever derived from appended events, so its counters always match the
//! stream (up to the stream's retention trim).

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use cb_core::config::SnapshotTtls;
use cb_core::{
    keys, ClockHandle, KernelError, SessionContext, SessionEventRecord, Snapshot, SnapshotId,
    SnapshotReason, MAX_LAST_TASKS, MAX_LAST_TOOLS,
};
use cb_kv::{KvError, KvStore, StreamEntry};

/// Retention cap of each session stream (approximate, store-side trim).
pub const STREAM_MAXLEN: u64 = 10_000;
/// Upper bound on one replay batch.
pub const REPLAY_MAX: u64 = 500;

fn dep(err: KvError) -> KernelError {
    KernelError::dependency(err.to_string())
}

/// Maintains `cb:stream:session:{id}` and `cb:session:state:{id}`.
#[derive(Clone)]
pub struct StateProcessor {
    kv: Arc<dyn KvStore>,
    clock: ClockHandle,
    snapshot_ttls: SnapshotTtls,
}

impl StateProcessor {
    pub fn new(kv: Arc<dyn KvStore>, clock: ClockHandle, snapshot_ttls: SnapshotTtls) -> Self {
        Self { kv, clock, snapshot_ttls }
    }

    /// Append one persisted event and fold it into the condensed view.
    /// Returns the stored record with its stream-assigned id.
    pub async fn record_event(
        &self,
        session_id: &str,
        event_type: &str,
        params: &Value,
        result: &Value,
        labels: &[String],
        producer: Option<&str>,
    ) -> Result<SessionEventRecord, KernelError> {
        let now = self.clock.epoch_ms();
        let params_json = params.to_string();
        let result_json = result.to_string();
        let labels_json = serde_json::to_string(labels)
            .map_err(|err| KernelError::internal(format!("labels encode: {err}")))?;

        let event_id = self
            .kv
            .xadd(
                &keys::session_stream(session_id),
                Some(STREAM_MAXLEN),
                &[
                    ("eventType".to_string(), event_type.to_string()),
                    ("params".to_string(), params_json.clone()),
                    ("result".to_string(), result_json.clone()),
                    ("labels".to_string(), labels_json),
                    ("timestamp".to_string(), now.to_string()),
                ],
            )
            .await
            .map_err(dep)?;

        self.fold_into_state(session_id, event_type, params, result, producer, now)
            .await?;

        debug!(session_id, event_type, %event_id, "session event recorded");
        Ok(SessionEventRecord {
            event_id,
            event_type: event_type.to_string(),
            params: params_json,
            result: result_json,
            labels: labels.to_vec(),
            timestamp: now,
        })
    }

    async fn fold_into_state(
        &self,
        session_id: &str,
        event_type: &str,
        params: &Value,
        result: &Value,
        producer: Option<&str>,
        now: u64,
    ) -> Result<(), KernelError> {
        let state_key = keys::session_state(session_id);
        let mut fields = vec![
            ("sessionId".to_string(), session_id.to_string()),
            ("updatedAt".to_string(), now.to_string()),
        ];
        if let Some(producer) = producer {
            fields.push(("instanceId".to_string(), producer.to_string()));
        }

        match event_type {
            "hook.user_prompt" => {
                if let Some(prompt) = params.get("prompt").and_then(Value::as_str) {
                    fields.push(("lastPrompt".to_string(), prompt.to_string()));
                }
            }
            "hook.pre_tool" | "hook.post_tool" => {
                if let Some(tool) = params.get("tool").and_then(Value::as_str) {
                    let tools = self
                        .push_bounded(&state_key, "lastTools", tool, MAX_LAST_TOOLS)
                        .await?;
                    fields.push(("lastTools".to_string(), tools));
                }
            }
            "hook.todo_write" => {
                if let Some(todos) = params.get("todos") {
                    fields.push(("activeTodos".to_string(), todos.to_string()));
                }
            }
            _ if event_type.starts_with("task.") => {
                let task_id = params
                    .get("taskId")
                    .or_else(|| result.get("id"))
                    .or_else(|| result.get("taskId"))
                    .and_then(Value::as_str);
                if let Some(task_id) = task_id {
                    let tasks = self
                        .push_bounded(&state_key, "lastTasks", task_id, MAX_LAST_TASKS)
                        .await?;
                    fields.push(("lastTasks".to_string(), tasks));
                }
            }
            _ => {}
        }

        self.kv.hset(&state_key, &fields).await.map_err(dep)?;
        self.kv
            .hincr_by(&state_key, &format!("count:{event_type}"), 1)
            .await
            .map_err(dep)?;
        Ok(())
    }

    /// Append to a JSON-array hash field, keeping the newest `cap`
    /// entries. Sessions are folded by their owning process, so the
    /// read-modify-write here does not race.
    async fn push_bounded(
        &self,
        state_key: &str,
        field: &str,
        value: &str,
        cap: usize,
    ) -> Result<String, KernelError> {
        let mut items: Vec<String> = match self.kv.hget(state_key, field).await.map_err(dep)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        items.push(value.to_string());
        if items.len() > cap {
            items.drain(0..items.len() - cap);
        }
        serde_json::to_string(&items)
            .map_err(|err| KernelError::internal(format!("list encode: {err}")))
    }

    /// Condensed view; an unknown session yields an empty context.
    pub async fn context(&self, session_id: &str) -> Result<SessionContext, KernelError> {
        let fields = self
            .kv
            .hgetall(&keys::session_state(session_id))
            .await
            .map_err(dep)?;
        let mut ctx = SessionContext::new(session_id);
        for (field, value) in fields {
            match field.as_str() {
                "sessionId" => {}
                "instanceId" => ctx.instance_id = Some(value),
                "lastPrompt" => ctx.last_prompt = Some(value),
                "lastTools" => ctx.last_tools = serde_json::from_str(&value).unwrap_or_default(),
                "activeTodos" => {
                    ctx.active_todos = serde_json::from_str(&value).unwrap_or_default()
                }
                "lastTasks" => ctx.last_tasks = serde_json::from_str(&value).unwrap_or_default(),
                "updatedAt" => ctx.updated_at = value.parse().unwrap_or(0),
                other => {
                    if let Some(event_type) = other.strip_prefix("count:") {
                        if let Ok(count) = value.parse() {
                            ctx.event_counts.insert(event_type.to_string(), count);
                        }
                    }
                }
            }
        }
        Ok(ctx)
    }

    /// Replay persisted events after `after_ms` (exclusive of entries at
    /// earlier timestamps), bounded by `count` ≤ [`REPLAY_MAX`].
    pub async fn replay(
        &self,
        session_id: &str,
        after_ms: Option<u64>,
        count: u64,
    ) -> Result<Vec<SessionEventRecord>, KernelError> {
        let start = match after_ms {
            Some(ms) => format!("{}-0", ms.saturating_add(1)),
            None => "-".to_string(),
        };
        let entries = self
            .kv
            .xrange(
                &keys::session_stream(session_id),
                &start,
                "+",
                Some(count.min(REPLAY_MAX)),
            )
            .await
            .map_err(dep)?;
        Ok(entries.iter().map(entry_to_record).collect())
    }

    /// Stream length (before retention trimming, equals the condensed
    /// view's total event count).
    pub async fn stream_len(&self, session_id: &str) -> Result<u64, KernelError> {
        self.kv
            .xlen(&keys::session_stream(session_id))
            .await
            .map_err(dep)
    }

    /// Capture the condensed context under a snapshot key with the
    /// reason's retention TTL.
    pub async fn create_snapshot(
        &self,
        session_id: &str,
        reason: SnapshotReason,
    ) -> Result<Snapshot, KernelError> {
        let context = self.context(session_id).await?;
        let snapshot = Snapshot {
            id: SnapshotId::new(),
            session_id: session_id.to_string(),
            timestamp: self.clock.epoch_ms(),
            reason,
            event_count: context.total_events(),
            context,
        };
        let key = keys::snapshot(session_id, snapshot.id.as_str());
        let context_json = serde_json::to_string(&snapshot.context)
            .map_err(|err| KernelError::internal(format!("snapshot encode: {err}")))?;
        self.kv
            .hset(
                &key,
                &[
                    ("id".to_string(), snapshot.id.to_string()),
                    ("sessionId".to_string(), snapshot.session_id.clone()),
                    ("timestamp".to_string(), snapshot.timestamp.to_string()),
                    ("reason".to_string(), reason.as_str().to_string()),
                    ("eventCount".to_string(), snapshot.event_count.to_string()),
                    ("context".to_string(), context_json),
                ],
            )
            .await
            .map_err(dep)?;
        let ttl = self.snapshot_ttls.for_reason(reason);
        self.kv
            .pexpire(&key, ttl.as_millis() as u64)
            .await
            .map_err(dep)?;
        debug!(session_id, id = %snapshot.id, reason = reason.as_str(), "snapshot created");
        Ok(snapshot)
    }

    pub async fn get_snapshot(
        &self,
        session_id: &str,
        snapshot_id: &str,
    ) -> Result<Option<Snapshot>, KernelError> {
        let fields = self
            .kv
            .hgetall(&keys::snapshot(session_id, snapshot_id))
            .await
            .map_err(dep)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let get = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        let reason = SnapshotReason::parse(&get("reason"))
            .ok_or_else(|| KernelError::internal("snapshot has unknown reason"))?;
        let context: SessionContext = serde_json::from_str(&get("context"))
            .map_err(|err| KernelError::internal(format!("snapshot decode: {err}")))?;
        Ok(Some(Snapshot {
            id: SnapshotId::from_string(get("id")),
            session_id: get("sessionId"),
            timestamp: get("timestamp").parse().unwrap_or(0),
            reason,
            event_count: get("eventCount").parse().unwrap_or(0),
            context,
        }))
    }

    /// Restore a snapshot's condensed context over the live session
    /// state. The stream is untouched; only the view is rewound.
    pub async fn restore_snapshot(
        &self,
        session_id: &str,
        snapshot_id: &str,
    ) -> Result<SessionContext, KernelError> {
        let snapshot = self
            .get_snapshot(session_id, snapshot_id)
            .await?
            .ok_or_else(|| {
                KernelError::not_found(format!("snapshot {snapshot_id} for session {session_id}"))
            })?;
        let state_key = keys::session_state(session_id);
        self.kv.del(&state_key).await.map_err(dep)?;
        let ctx = &snapshot.context;
        let mut fields = vec![
            ("sessionId".to_string(), session_id.to_string()),
            ("updatedAt".to_string(), self.clock.epoch_ms().to_string()),
        ];
        if let Some(instance) = &ctx.instance_id {
            fields.push(("instanceId".to_string(), instance.clone()));
        }
        if let Some(prompt) = &ctx.last_prompt {
            fields.push(("lastPrompt".to_string(), prompt.clone()));
        }
        fields.push((
            "lastTools".to_string(),
            serde_json::to_string(&ctx.last_tools)
                .map_err(|err| KernelError::internal(format!("restore encode: {err}")))?,
        ));
        fields.push((
            "activeTodos".to_string(),
            serde_json::to_string(&ctx.active_todos)
                .map_err(|err| KernelError::internal(format!("restore encode: {err}")))?,
        ));
        fields.push((
            "lastTasks".to_string(),
            serde_json::to_string(&ctx.last_tasks)
                .map_err(|err| KernelError::internal(format!("restore encode: {err}")))?,
        ));
        for (event_type, count) in &ctx.event_counts {
            fields.push((format!("count:{event_type}"), count.to_string()));
        }
        self.kv.hset(&state_key, &fields).await.map_err(dep)?;
        Ok(snapshot.context)
    }
}

fn entry_to_record(entry: &StreamEntry) -> SessionEventRecord {
    SessionEventRecord {
        event_id: entry.id.clone(),
        event_type: entry.field("eventType").unwrap_or_default().to_string(),
        params: entry.field("params").unwrap_or("null").to_string(),
        result: entry.field("result").unwrap_or("null").to_string(),
        labels: entry
            .field("labels")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default(),
        timestamp: entry
            .field("timestamp")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0),
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
