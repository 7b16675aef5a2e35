// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative KV key namespaces.
//!
//! Every kernel key is prefixed `cb:`. All key construction goes through
//! this module so the reserved suffixes stay in one place.

/// Prefix shared by every kernel key.
pub const PREFIX: &str = "cb:";

/// `cb:instance:{id}`: instance hash
pub fn instance(id: &str) -> String {
    format!("cb:instance:{id}")
}

/// `cb:instances`: set of registered instance ids
pub fn instances_index() -> String {
    "cb:instances".to_string()
}

/// `cb:role:{role}`: set of instance ids holding a role
pub fn role(role: &str) -> String {
    format!("cb:role:{role}")
}

/// `cb:task:{id}`: task hash
pub fn task(id: &str) -> String {
    format!("cb:task:{id}")
}

/// `cb:task:{id}:attachment:{key}`: attachment hash
pub fn task_attachment(id: &str, key: &str) -> String {
    format!("cb:task:{id}:attachment:{key}")
}

/// `cb:task:{id}:attachments`: sorted-set index of attachment keys
pub fn task_attachments_index(id: &str) -> String {
    format!("cb:task:{id}:attachments")
}

/// `cb:queue:tasks:pending`: global pending queue (score = priority)
pub fn pending_queue() -> String {
    "cb:queue:tasks:pending".to_string()
}

/// `cb:queue:instance:{id}`: per-instance queue (score = assignment ts)
pub fn instance_queue(id: &str) -> String {
    format!("cb:queue:instance:{id}")
}

/// `cb:queue:instance:{id}:prio`: original priorities for reassignment
pub fn instance_queue_priorities(id: &str) -> String {
    format!("cb:queue:instance:{id}:prio")
}

/// `cb:queue:{role}`: waiting subtasks for a role
pub fn role_queue(role: &str) -> String {
    format!("cb:queue:{role}")
}

/// `cb:capacity:{id}`: in-flight assignment counter
pub fn capacity(id: &str) -> String {
    format!("cb:capacity:{id}")
}

/// `cb:circuit:{event}`: circuit hash {state, failures, openUntil}
pub fn circuit(event: &str) -> String {
    format!("cb:circuit:{event}")
}

/// `cb:ratelimit:{event}:{caller}`: sliding-window sorted set
pub fn ratelimit(event: &str, caller: &str) -> String {
    format!("cb:ratelimit:{event}:{caller}")
}

/// `cb:cache:{event}:{fingerprint}`: cached output
pub fn cache(event: &str, fingerprint: &str) -> String {
    format!("cb:cache:{event}:{fingerprint}")
}

/// `cb:stream:session:{id}`: append-only session event stream
pub fn session_stream(session_id: &str) -> String {
    format!("cb:stream:session:{session_id}")
}

/// `cb:session:state:{id}`: condensed session hash
pub fn session_state(session_id: &str) -> String {
    format!("cb:session:state:{session_id}")
}

/// `cb:snapshot:{session}:{id}`: snapshot hash
pub fn snapshot(session_id: &str, snapshot_id: &str) -> String {
    format!("cb:snapshot:{session_id}:{snapshot_id}")
}

/// `cb:metrics:event:{event}`: per-event counter hash
pub fn metrics_event(event: &str) -> String {
    format!("cb:metrics:event:{event}")
}

/// `cb:metrics:events`: set of event names with metrics
pub fn metrics_index() -> String {
    "cb:metrics:events".to_string()
}

/// `cb:metrics:global`: folded global aggregates
pub fn metrics_global() -> String {
    "cb:metrics:global".to_string()
}

/// `cb:audit:log`: capped audit list
pub fn audit_log() -> String {
    "cb:audit:log".to_string()
}

/// `cb:events:processed`: idempotency marker set (capped)
pub fn events_processed() -> String {
    "cb:events:processed".to_string()
}

/// `cb:events:{eventType}`: pub/sub channel for one event type
pub fn event_channel(event_type: &str) -> String {
    format!("cb:events:{event_type}")
}

/// Pattern matching every event channel (wildcard subscription)
pub fn event_channel_pattern() -> String {
    "cb:events:*".to_string()
}

/// `cb:history:assignments`: capped assignment history list
pub fn assignment_history() -> String {
    "cb:history:assignments".to_string()
}

/// `cb:scheduler:leader`: scheduler leadership lock
pub fn scheduler_leader() -> String {
    "cb:scheduler:leader".to_string()
}

/// `cb:redistributed:from:{id}`: marker left after queue reassignment
pub fn redistributed_marker(instance_id: &str) -> String {
    format!("cb:redistributed:from:{instance_id}")
}

/// `cb:decomposition:{taskId}`: decomposition record hash
pub fn decomposition(task_id: &str) -> String {
    format!("cb:decomposition:{task_id}")
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
