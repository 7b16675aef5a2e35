// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed task queue: global pending set, per-instance queues,
//! capacity tracking, load-balanced assignment.
//!
//! All multi-key transitions (assign, complete, reassign) go through the
//! scripted op library; this module does candidate selection, task-hash
//! (de)serialization, and attachment bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cb_core::{
    keys, AttachmentType, ClockHandle, Instance, KernelError, Task, TaskAttachment, TaskId,
    TaskStatus,
};
use cb_kv::{ops, AssignOutcome, CompleteOutcome, KvError, KvStore, ProgressSummary};

/// Default per-instance assignment cap.
pub const DEFAULT_CAPACITY: u64 = 5;
/// TTL on the redistribution marker left by a reassignment.
pub const REDISTRIBUTION_MARKER_TTL_MS: u64 = 10 * 60 * 1000;

fn dep(err: KvError) -> KernelError {
    KernelError::dependency(err.to_string())
}

fn iso(ms: u64) -> String {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// A granted assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub task_id: TaskId,
    pub instance_id: String,
    /// ISO-8601 grant time
    pub assigned_at: String,
    pub capacity_in_use: u64,
}

/// A completed assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub task_id: TaskId,
    pub instance_id: String,
    pub completed_at: String,
    pub duration_ms: u64,
}

/// Where a role-routed subtask ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubtaskPlacement {
    Assigned { instance_id: String, assigned_at: String },
    /// No qualifying instance; parked on the role queue
    Queued { position: u64 },
}

/// Task queue over the shared KV store.
#[derive(Clone)]
pub struct TaskQueue {
    kv: Arc<dyn KvStore>,
    clock: ClockHandle,
}

impl TaskQueue {
    pub fn new(kv: Arc<dyn KvStore>, clock: ClockHandle) -> Self {
        Self { kv, clock }
    }

    /// Create a pending task: hash + global queue entry.
    pub async fn create(
        &self,
        text: &str,
        priority: u8,
        metadata: HashMap<String, Value>,
    ) -> Result<Task, KernelError> {
        let mut task = Task::new(text, priority, self.clock.epoch_ms());
        task.metadata = metadata;
        self.kv
            .hset(&keys::task(task.id.as_str()), &task_to_fields(&task)?)
            .await
            .map_err(dep)?;
        self.kv
            .zadd(&keys::pending_queue(), task.id.as_str(), task.priority as f64)
            .await
            .map_err(dep)?;
        debug!(task_id = %task.id, priority = task.priority, "task created");
        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, KernelError> {
        let fields = self.kv.hgetall(&keys::task(task_id)).await.map_err(dep)?;
        if fields.is_empty() {
            return Ok(None);
        }
        task_from_fields(&fields).map(Some)
    }

    /// Update mutable task fields. Terminal tasks reject text/priority
    /// changes; metadata merges.
    pub async fn update(
        &self,
        task_id: &str,
        text: Option<&str>,
        priority: Option<u8>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Task, KernelError> {
        let mut task = self
            .get(task_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("task {task_id}")))?;
        if task.status.is_terminal() && (text.is_some() || priority.is_some()) {
            return Err(KernelError::conflict(format!(
                "task {task_id} is {}; only metadata may change",
                task.status
            )));
        }
        if let Some(text) = text {
            task.text = text.to_string();
        }
        if let Some(priority) = priority {
            task.priority = priority.min(100);
            if task.status == TaskStatus::Pending {
                self.kv
                    .zadd(&keys::pending_queue(), task_id, task.priority as f64)
                    .await
                    .map_err(dep)?;
            }
        }
        if let Some(extra) = metadata {
            task.metadata.extend(extra);
        }
        task.updated_at = self.clock.epoch_ms();
        self.kv
            .hset(&keys::task(task_id), &task_to_fields(&task)?)
            .await
            .map_err(dep)?;
        Ok(task)
    }

    /// Pending tasks, highest priority first.
    pub async fn pending(&self, limit: u64) -> Result<Vec<(String, u8)>, KernelError> {
        let mut items = self
            .kv
            .zrange_withscores(&keys::pending_queue(), 0, -1)
            .await
            .map_err(dep)?;
        items.reverse();
        items.truncate(limit as usize);
        Ok(items
            .into_iter()
            .map(|(id, score)| (id, score as u8))
            .collect())
    }

    /// Assign a pending task to a specific instance.
    pub async fn assign(
        &self,
        task_id: &str,
        instance_id: &str,
        max_capacity: u64,
    ) -> Result<AssignmentRecord, KernelError> {
        let now = self.clock.epoch_ms();
        let outcome = ops::task_assign(self.kv.as_ref(), task_id, instance_id, now, max_capacity)
            .await
            .map_err(dep)?;
        match outcome {
            AssignOutcome::Assigned { capacity_in_use } => Ok(AssignmentRecord {
                task_id: TaskId::from_string(task_id),
                instance_id: instance_id.to_string(),
                assigned_at: iso(now),
                capacity_in_use,
            }),
            AssignOutcome::Missing => {
                Err(KernelError::not_found(format!("task {task_id}")))
            }
            AssignOutcome::Conflict { status } => Err(KernelError::conflict(format!(
                "task {task_id} is {status}, not pending"
            ))),
            AssignOutcome::AtCapacity => Err(KernelError::conflict(format!(
                "instance {instance_id} is at capacity"
            ))),
        }
    }

    /// Complete an assigned task.
    pub async fn complete(
        &self,
        task_id: &str,
        instance_id: &str,
    ) -> Result<CompletionRecord, KernelError> {
        let now = self.clock.epoch_ms();
        let outcome = ops::task_complete(self.kv.as_ref(), task_id, instance_id, now)
            .await
            .map_err(dep)?;
        match outcome {
            CompleteOutcome::Completed { duration_ms } => Ok(CompletionRecord {
                task_id: TaskId::from_string(task_id),
                instance_id: instance_id.to_string(),
                completed_at: iso(now),
                duration_ms,
            }),
            CompleteOutcome::Missing => {
                Err(KernelError::not_found(format!("task {task_id}")))
            }
            CompleteOutcome::NotAssigned { assigned_to } if assigned_to.is_empty() => Err(
                KernelError::conflict(format!("task {task_id} is not assigned")),
            ),
            CompleteOutcome::NotAssigned { assigned_to } => Err(KernelError::conflict(format!(
                "task {task_id} is assigned to {assigned_to}"
            ))),
            CompleteOutcome::AlreadyCompleted => Err(KernelError::conflict(format!(
                "task {task_id} is already completed"
            ))),
        }
    }

    /// Move a task to a non-completed terminal state.
    pub async fn finish_with_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        reason: Option<&str>,
    ) -> Result<Task, KernelError> {
        debug_assert!(status == TaskStatus::Failed || status == TaskStatus::Cancelled);
        let mut task = self
            .get(task_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("task {task_id}")))?;
        if task.status == TaskStatus::Completed {
            return Err(KernelError::conflict(format!(
                "task {task_id} is already completed"
            )));
        }
        let now = self.clock.epoch_ms();
        task.status = status;
        task.updated_at = now;
        if let Some(reason) = reason {
            task.metadata
                .insert("reason".to_string(), Value::String(reason.to_string()));
        }
        self.kv
            .hset(&keys::task(task_id), &task_to_fields(&task)?)
            .await
            .map_err(dep)?;
        self.kv
            .zrem(&keys::pending_queue(), task_id)
            .await
            .map_err(dep)?;
        if let Some(instance_id) = &task.assigned_to {
            self.kv
                .zrem(&keys::instance_queue(instance_id), task_id)
                .await
                .map_err(dep)?;
            self.kv
                .hdel(&keys::instance_queue_priorities(instance_id), task_id)
                .await
                .map_err(dep)?;
        }
        Ok(task)
    }

    /// Role-routed subtask placement: score qualifying instances by spare
    /// capacity and try assignment in score order; park on the role
    /// queue when nobody qualifies.
    pub async fn assign_subtask(
        &self,
        subtask_id: &str,
        role: &str,
        required_capabilities: &[String],
        instances: &[Instance],
        max_capacity: u64,
    ) -> Result<SubtaskPlacement, KernelError> {
        let mut candidates = Vec::new();
        for instance in instances {
            if !instance.status.accepts_work()
                || !instance.roles.contains(role)
                || !instance.has_capabilities(required_capabilities)
            {
                continue;
            }
            let capacity: u64 = self
                .kv
                .get(&keys::capacity(&instance.id))
                .await
                .map_err(dep)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if capacity >= max_capacity {
                continue;
            }
            // Spare slots weighted by how empty the instance is.
            let spare = (max_capacity - capacity) as f64;
            let load_factor = spare / max_capacity as f64;
            candidates.push((instance.id.clone(), spare * load_factor));
        }
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let now = self.clock.epoch_ms();
        for (instance_id, _score) in candidates {
            match ops::task_assign(self.kv.as_ref(), subtask_id, &instance_id, now, max_capacity)
                .await
                .map_err(dep)?
            {
                AssignOutcome::Assigned { .. } => {
                    return Ok(SubtaskPlacement::Assigned {
                        instance_id,
                        assigned_at: iso(now),
                    });
                }
                // Lost the race on this instance; try the next.
                AssignOutcome::AtCapacity => continue,
                AssignOutcome::Missing => {
                    return Err(KernelError::not_found(format!("task {subtask_id}")))
                }
                AssignOutcome::Conflict { status } => {
                    return Err(KernelError::conflict(format!(
                        "task {subtask_id} is {status}, not pending"
                    )))
                }
            }
        }

        self.kv
            .zadd(&keys::role_queue(role), subtask_id, now as f64)
            .await
            .map_err(dep)?;
        let position = self.kv.zcard(&keys::role_queue(role)).await.map_err(dep)?;
        debug!(subtask_id, role, position, "subtask queued for role");
        Ok(SubtaskPlacement::Queued { position })
    }

    /// Drain a failed instance's queue back to global pending and reset
    /// the moved tasks to pending. Returns the moved task ids.
    pub async fn reassign_instance(&self, instance_id: &str) -> Result<Vec<String>, KernelError> {
        let now = self.clock.epoch_ms();
        let moved = ops::queue_reassign(
            self.kv.as_ref(),
            instance_id,
            now,
            REDISTRIBUTION_MARKER_TTL_MS,
        )
        .await
        .map_err(dep)?;
        for task_id in &moved {
            self.kv
                .hset(
                    &keys::task(task_id),
                    &[
                        ("status".to_string(), TaskStatus::Pending.as_str().to_string()),
                        ("assignedTo".to_string(), String::new()),
                        ("updatedAt".to_string(), now.to_string()),
                    ],
                )
                .await
                .map_err(dep)?;
        }
        Ok(moved)
    }

    // -- attachments --

    /// Write (or overwrite) a keyed attachment on a task.
    #[allow(clippy::too_many_arguments)]
    pub async fn attach(
        &self,
        task_id: &str,
        key: &str,
        kind: AttachmentType,
        value: Option<Value>,
        content: Option<String>,
        url: Option<String>,
        mime: Option<String>,
    ) -> Result<TaskAttachment, KernelError> {
        if self.get(task_id).await?.is_none() {
            return Err(KernelError::not_found(format!("task {task_id}")));
        }
        let now = self.clock.epoch_ms();
        let attachment_key = keys::task_attachment(task_id, key);
        let existing = self.kv.hgetall(&attachment_key).await.map_err(dep)?;
        let created_at = existing
            .iter()
            .find(|(k, _)| k == "createdAt")
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(now);
        let size = value
            .as_ref()
            .map(|v| v.to_string().len() as u64)
            .or_else(|| content.as_ref().map(|c| c.len() as u64))
            .or_else(|| url.as_ref().map(|u| u.len() as u64))
            .unwrap_or(0);
        let attachment = TaskAttachment {
            id: format!("att-{}", nanoid::nanoid!(12)),
            task_id: TaskId::from_string(task_id),
            key: key.to_string(),
            kind,
            value,
            content,
            url,
            size,
            mime,
            created_at,
            updated_at: now,
        };
        let body = serde_json::to_string(&attachment)
            .map_err(|err| KernelError::internal(format!("attachment encode: {err}")))?;
        self.kv
            .hset(
                &attachment_key,
                &[
                    ("key".to_string(), key.to_string()),
                    ("body".to_string(), body),
                    ("createdAt".to_string(), created_at.to_string()),
                    ("updatedAt".to_string(), now.to_string()),
                ],
            )
            .await
            .map_err(dep)?;
        self.kv
            .zadd(&keys::task_attachments_index(task_id), key, now as f64)
            .await
            .map_err(dep)?;
        Ok(attachment)
    }

    pub async fn attachment(
        &self,
        task_id: &str,
        key: &str,
    ) -> Result<Option<TaskAttachment>, KernelError> {
        let body = self
            .kv
            .hget(&keys::task_attachment(task_id, key), "body")
            .await
            .map_err(dep)?;
        match body {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| KernelError::internal(format!("attachment decode: {err}"))),
        }
    }

    /// Attachment keys in insertion order.
    pub async fn attachment_keys(&self, task_id: &str) -> Result<Vec<String>, KernelError> {
        let items = self
            .kv
            .zrange_withscores(&keys::task_attachments_index(task_id), 0, -1)
            .await
            .map_err(dep)?;
        Ok(items.into_iter().map(|(key, _)| key).collect())
    }

    // -- decomposition contracts (consumed by external swarm handlers) --

    pub async fn store_decomposition(
        &self,
        task_id: &str,
        decomposition: &Value,
        subtasks: &[(String, Value)],
    ) -> Result<u64, KernelError> {
        let encoded: Vec<(String, String)> = subtasks
            .iter()
            .map(|(id, body)| (id.clone(), body.to_string()))
            .collect();
        ops::decomposition_store(
            self.kv.as_ref(),
            task_id,
            self.clock.epoch_ms(),
            &decomposition.to_string(),
            &encoded,
        )
        .await
        .map_err(dep)
    }

    pub async fn synthesize_progress(&self, task_id: &str) -> Result<ProgressSummary, KernelError> {
        ops::progress_synthesis(self.kv.as_ref(), task_id, self.clock.epoch_ms())
            .await
            .map_err(dep)
    }
}

pub(crate) fn task_to_fields(task: &Task) -> Result<Vec<(String, String)>, KernelError> {
    let metadata = serde_json::to_string(&task.metadata)
        .map_err(|err| KernelError::internal(format!("task encode: {err}")))?;
    let mut fields = vec![
        ("id".to_string(), task.id.to_string()),
        ("text".to_string(), task.text.clone()),
        ("priority".to_string(), task.priority.to_string()),
        ("status".to_string(), task.status.as_str().to_string()),
        ("metadata".to_string(), metadata),
        ("createdAt".to_string(), task.created_at.to_string()),
        ("updatedAt".to_string(), task.updated_at.to_string()),
    ];
    fields.push((
        "assignedTo".to_string(),
        task.assigned_to.clone().unwrap_or_default(),
    ));
    if let Some(completed_at) = task.completed_at {
        fields.push(("completedAt".to_string(), completed_at.to_string()));
    }
    Ok(fields)
}

pub(crate) fn task_from_fields(fields: &[(String, String)]) -> Result<Task, KernelError> {
    let get = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    };
    let status = TaskStatus::parse(get("status"))
        .ok_or_else(|| KernelError::internal(format!("task has unknown status {:?}", get("status"))))?;
    let assigned_to = match get("assignedTo") {
        "" => None,
        other => Some(other.to_string()),
    };
    Ok(Task {
        id: TaskId::from_string(get("id")),
        text: get("text").to_string(),
        priority: get("priority").parse().unwrap_or(50),
        status,
        assigned_to,
        metadata: serde_json::from_str(get("metadata")).unwrap_or_default(),
        created_at: get("createdAt").parse().unwrap_or(0),
        updated_at: get("updatedAt").parse().unwrap_or(0),
        completed_at: get("completedAt").parse().ok(),
    })
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
