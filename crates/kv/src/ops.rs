// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The named scripted-op library and its typed wrappers.
//!
//! Callers never hand raw Lua to the store: every multi-key mutation is a
//! [`ScriptOp`] with a fixed key/arg contract, executed all-or-nothing.
//! The wrappers below build the key lists from [`cb_core::keys`] and parse
//! replies into structured outcomes.

use cb_core::keys;

use crate::scripts;
use crate::store::{KvError, KvStore, ScriptReply};

/// Retention cap for the idempotency marker set.
pub const PROCESSED_CAP: u64 = 10_000;
/// Retention cap for the assignment history list.
pub const ASSIGNMENT_HISTORY_CAP: u64 = 1_000;

/// Named scripted operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptOp {
    RateLimit,
    CircuitAdmit,
    CircuitRecord,
    TaskAssign,
    TaskComplete,
    QueueReassign,
    LeaderAcquire,
    LeaderRenew,
    MetricsFold,
    MarkProcessed,
    DecompositionStore,
    ProgressSynthesis,
}

impl ScriptOp {
    /// Lua source for the Redis implementation.
    pub fn source(self) -> &'static str {
        match self {
            ScriptOp::RateLimit => scripts::RATE_LIMIT,
            ScriptOp::CircuitAdmit => scripts::CIRCUIT_ADMIT,
            ScriptOp::CircuitRecord => scripts::CIRCUIT_RECORD,
            ScriptOp::TaskAssign => scripts::TASK_ASSIGN,
            ScriptOp::TaskComplete => scripts::TASK_COMPLETE,
            ScriptOp::QueueReassign => scripts::QUEUE_REASSIGN,
            ScriptOp::LeaderAcquire => scripts::LEADER_ACQUIRE,
            ScriptOp::LeaderRenew => scripts::LEADER_RENEW,
            ScriptOp::MetricsFold => scripts::METRICS_FOLD,
            ScriptOp::MarkProcessed => scripts::MARK_PROCESSED,
            ScriptOp::DecompositionStore => scripts::DECOMPOSITION_STORE,
            ScriptOp::ProgressSynthesis => scripts::PROGRESS_SYNTH,
        }
    }
}

/// Outcome of a rate-limit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow { remaining: u32 },
    Deny { retry_after_ms: u64 },
}

/// Outcome of a circuit admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitAdmission {
    /// Circuit closed, proceed normally
    Closed,
    /// Half-open; this caller holds the single probe slot
    Probe,
    /// Open until the given epoch-ms deadline
    Open { open_until_ms: u64 },
}

/// Circuit state after recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStateName {
    Closed,
    Open,
}

/// Outcome of a scripted assignment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    /// Assigned; capacity now in use on the chosen instance
    Assigned { capacity_in_use: u64 },
    /// Task hash does not exist
    Missing,
    /// Task is not pending (double assignment or terminal)
    Conflict { status: String },
    /// Instance already at capacity
    AtCapacity,
}

/// Outcome of a scripted completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed { duration_ms: u64 },
    Missing,
    /// Assigned to a different instance (or unassigned)
    NotAssigned { assigned_to: String },
    /// Already completed
    AlreadyCompleted,
}

/// Leadership state after acquire/renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Held,
    Lost,
}

/// Synthesized decomposition progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSummary {
    pub completed: u64,
    pub in_progress: u64,
    pub total: u64,
    pub percent: u64,
}

fn reply_error(op: ScriptOp, reply: &ScriptReply) -> KvError {
    KvError::Reply(format!("{op:?} returned {reply:?}"))
}

/// One sliding-window rate-limit attempt for `(event, caller)`.
pub async fn rate_limit(
    kv: &dyn KvStore,
    event: &str,
    caller: &str,
    now_ms: u64,
    window_ms: u64,
    quota: u32,
    member: &str,
) -> Result<RateLimitDecision, KvError> {
    let reply = kv
        .script(
            ScriptOp::RateLimit,
            &[keys::ratelimit(event, caller)],
            &[
                now_ms.to_string(),
                window_ms.to_string(),
                quota.to_string(),
                member.to_string(),
            ],
        )
        .await?;
    let items = reply.as_array().ok_or_else(|| reply_error(ScriptOp::RateLimit, &reply))?;
    match (items.first().and_then(ScriptReply::as_int), items.get(1).and_then(ScriptReply::as_int)) {
        (Some(1), Some(remaining)) => Ok(RateLimitDecision::Allow { remaining: remaining.max(0) as u32 }),
        (Some(0), Some(retry)) => Ok(RateLimitDecision::Deny { retry_after_ms: retry.max(0) as u64 }),
        _ => Err(reply_error(ScriptOp::RateLimit, &reply)),
    }
}

/// Circuit admission for one call attempt.
pub async fn circuit_admit(
    kv: &dyn KvStore,
    event: &str,
    now_ms: u64,
) -> Result<CircuitAdmission, KvError> {
    let reply = kv
        .script(ScriptOp::CircuitAdmit, &[keys::circuit(event)], &[now_ms.to_string()])
        .await?;
    let items = reply.as_array().ok_or_else(|| reply_error(ScriptOp::CircuitAdmit, &reply))?;
    match items.first().and_then(ScriptReply::as_str) {
        Some("closed") => Ok(CircuitAdmission::Closed),
        Some("probe") => Ok(CircuitAdmission::Probe),
        Some("open") => {
            let open_until = items.get(1).and_then(ScriptReply::as_int).unwrap_or(0);
            Ok(CircuitAdmission::Open { open_until_ms: open_until.max(0) as u64 })
        }
        _ => Err(reply_error(ScriptOp::CircuitAdmit, &reply)),
    }
}

/// Record a success/failure outcome against the circuit.
pub async fn circuit_record(
    kv: &dyn KvStore,
    event: &str,
    now_ms: u64,
    ok: bool,
    threshold: u32,
    cooloff_ms: u64,
) -> Result<CircuitStateName, KvError> {
    let reply = kv
        .script(
            ScriptOp::CircuitRecord,
            &[keys::circuit(event)],
            &[
                now_ms.to_string(),
                if ok { "1" } else { "0" }.to_string(),
                threshold.to_string(),
                cooloff_ms.to_string(),
            ],
        )
        .await?;
    match reply.as_str() {
        Some("closed") => Ok(CircuitStateName::Closed),
        Some("open") => Ok(CircuitStateName::Open),
        _ => Err(reply_error(ScriptOp::CircuitRecord, &reply)),
    }
}

/// Attempt to assign a pending task to an instance.
pub async fn task_assign(
    kv: &dyn KvStore,
    task_id: &str,
    instance_id: &str,
    now_ms: u64,
    max_capacity: u64,
) -> Result<AssignOutcome, KvError> {
    let reply = kv
        .script(
            ScriptOp::TaskAssign,
            &[
                keys::task(task_id),
                keys::pending_queue(),
                keys::instance_queue(instance_id),
                keys::instance_queue_priorities(instance_id),
                keys::capacity(instance_id),
                keys::assignment_history(),
            ],
            &[
                task_id.to_string(),
                instance_id.to_string(),
                now_ms.to_string(),
                max_capacity.to_string(),
                ASSIGNMENT_HISTORY_CAP.to_string(),
            ],
        )
        .await?;
    let items = reply.as_array().ok_or_else(|| reply_error(ScriptOp::TaskAssign, &reply))?;
    match items.first().and_then(ScriptReply::as_str) {
        Some("ok") => {
            let cap = items.get(1).and_then(ScriptReply::as_int).unwrap_or(0);
            Ok(AssignOutcome::Assigned { capacity_in_use: cap.max(0) as u64 })
        }
        Some("missing") => Ok(AssignOutcome::Missing),
        Some("conflict") => Ok(AssignOutcome::Conflict {
            status: items.get(1).and_then(ScriptReply::as_str).unwrap_or("").to_string(),
        }),
        Some("capacity") => Ok(AssignOutcome::AtCapacity),
        _ => Err(reply_error(ScriptOp::TaskAssign, &reply)),
    }
}

/// Complete an assigned task.
pub async fn task_complete(
    kv: &dyn KvStore,
    task_id: &str,
    instance_id: &str,
    now_ms: u64,
) -> Result<CompleteOutcome, KvError> {
    let reply = kv
        .script(
            ScriptOp::TaskComplete,
            &[
                keys::task(task_id),
                keys::instance_queue(instance_id),
                keys::instance_queue_priorities(instance_id),
                keys::capacity(instance_id),
            ],
            &[task_id.to_string(), instance_id.to_string(), now_ms.to_string()],
        )
        .await?;
    let items = reply.as_array().ok_or_else(|| reply_error(ScriptOp::TaskComplete, &reply))?;
    match items.first().and_then(ScriptReply::as_str) {
        Some("ok") => {
            let duration = items.get(1).and_then(ScriptReply::as_int).unwrap_or(0);
            Ok(CompleteOutcome::Completed { duration_ms: duration.max(0) as u64 })
        }
        Some("missing") => Ok(CompleteOutcome::Missing),
        Some("not_assigned") => Ok(CompleteOutcome::NotAssigned {
            assigned_to: items.get(1).and_then(ScriptReply::as_str).unwrap_or("").to_string(),
        }),
        Some("conflict") => Ok(CompleteOutcome::AlreadyCompleted),
        _ => Err(reply_error(ScriptOp::TaskComplete, &reply)),
    }
}

/// Drain a failed instance's queue back to global pending. Returns the
/// moved task ids; task hashes are reset by the caller afterwards.
pub async fn queue_reassign(
    kv: &dyn KvStore,
    instance_id: &str,
    now_ms: u64,
    marker_ttl_ms: u64,
) -> Result<Vec<String>, KvError> {
    let reply = kv
        .script(
            ScriptOp::QueueReassign,
            &[
                keys::instance_queue(instance_id),
                keys::instance_queue_priorities(instance_id),
                keys::pending_queue(),
                keys::redistributed_marker(instance_id),
                keys::capacity(instance_id),
            ],
            &[now_ms.to_string(), marker_ttl_ms.to_string()],
        )
        .await?;
    let items = reply.as_array().ok_or_else(|| reply_error(ScriptOp::QueueReassign, &reply))?;
    Ok(items
        .iter()
        .filter_map(|item| item.as_str().map(str::to_string))
        .collect())
}

/// Acquire or re-acquire scheduler leadership.
pub async fn leader_acquire(
    kv: &dyn KvStore,
    holder: &str,
    ttl_ms: u64,
) -> Result<LeaderState, KvError> {
    let reply = kv
        .script(
            ScriptOp::LeaderAcquire,
            &[keys::scheduler_leader()],
            &[holder.to_string(), ttl_ms.to_string()],
        )
        .await?;
    Ok(if reply.as_int() == Some(1) { LeaderState::Held } else { LeaderState::Lost })
}

/// Renew leadership only while still the holder.
pub async fn leader_renew(
    kv: &dyn KvStore,
    holder: &str,
    ttl_ms: u64,
) -> Result<LeaderState, KvError> {
    let reply = kv
        .script(
            ScriptOp::LeaderRenew,
            &[keys::scheduler_leader()],
            &[holder.to_string(), ttl_ms.to_string()],
        )
        .await?;
    Ok(if reply.as_int() == Some(1) { LeaderState::Held } else { LeaderState::Lost })
}

/// Fold one event's counters into the global aggregate hash.
pub async fn metrics_fold(kv: &dyn KvStore, event: &str) -> Result<u64, KvError> {
    let folded_key = format!("{}:folded", keys::metrics_event(event));
    let reply = kv
        .script(
            ScriptOp::MetricsFold,
            &[keys::metrics_event(event), folded_key, keys::metrics_global()],
            &[],
        )
        .await?;
    Ok(reply.as_int().unwrap_or(0).max(0) as u64)
}

/// Insert an idempotency marker. False when the id was already marked.
pub async fn mark_processed(
    kv: &dyn KvStore,
    event_id: &str,
    now_ms: u64,
) -> Result<bool, KvError> {
    let reply = kv
        .script(
            ScriptOp::MarkProcessed,
            &[keys::events_processed()],
            &[event_id.to_string(), now_ms.to_string(), PROCESSED_CAP.to_string()],
        )
        .await?;
    Ok(reply.as_int() == Some(1))
}

/// Store a decomposition record and its subtasks atomically.
pub async fn decomposition_store(
    kv: &dyn KvStore,
    task_id: &str,
    now_ms: u64,
    decomposition_json: &str,
    subtasks: &[(String, String)],
) -> Result<u64, KvError> {
    let mut args = vec![
        task_id.to_string(),
        now_ms.to_string(),
        decomposition_json.to_string(),
        subtasks.len().to_string(),
    ];
    for (id, body) in subtasks {
        args.push(id.clone());
        args.push(body.clone());
    }
    let reply = kv
        .script(ScriptOp::DecompositionStore, &[keys::decomposition(task_id)], &args)
        .await?;
    Ok(reply.as_int().unwrap_or(0).max(0) as u64)
}

/// Synthesize progress over a stored decomposition.
pub async fn progress_synthesis(
    kv: &dyn KvStore,
    task_id: &str,
    now_ms: u64,
) -> Result<ProgressSummary, KvError> {
    let reply = kv
        .script(ScriptOp::ProgressSynthesis, &[keys::decomposition(task_id)], &[now_ms.to_string()])
        .await?;
    let items = reply.as_array().ok_or_else(|| reply_error(ScriptOp::ProgressSynthesis, &reply))?;
    let at = |i: usize| items.get(i).and_then(ScriptReply::as_int).unwrap_or(0).max(0) as u64;
    Ok(ProgressSummary { completed: at(0), in_progress: at(1), total: at(2), percent: at(3) })
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
