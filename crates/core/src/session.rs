// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state: condensed views, persisted stream records, snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SnapshotId;

/// Bounded length of the `lastTools` list in a condensed view.
pub const MAX_LAST_TOOLS: usize = 10;
/// Bounded length of the `lastTasks` list in a condensed view.
pub const MAX_LAST_TASKS: usize = 10;

/// Condensed view of a session, maintained incrementally from persisted
/// events. The full history lives in the session stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    /// Instance that most recently produced an event on this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Per-event-type counters (BTreeMap for stable serialization)
    #[serde(default)]
    pub event_counts: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prompt: Option<String>,
    /// Most recent tool names, newest last, bounded by [`MAX_LAST_TOOLS`]
    #[serde(default)]
    pub last_tools: Vec<String>,
    /// Current todo list, overwritten by each `hook.todo_write`
    #[serde(default)]
    pub active_todos: Vec<serde_json::Value>,
    /// Most recent task ids touched on this session, newest last
    #[serde(default)]
    pub last_tasks: Vec<String>,
    pub updated_at: u64,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), ..Default::default() }
    }

    /// Total persisted events, equal to the stream length before trimming.
    pub fn total_events(&self) -> u64 {
        self.event_counts.values().sum()
    }
}

/// One persisted entry of a session stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventRecord {
    /// Assigned by the stream at append time
    pub event_id: String,
    pub event_type: String,
    /// JSON-stringified request params
    pub params: String,
    /// JSON-stringified handler result
    pub result: String,
    /// JSON array of label strings
    #[serde(default)]
    pub labels: Vec<String>,
    /// ms since epoch
    pub timestamp: u64,
}

/// Why a snapshot was taken; drives its retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    PreCompact,
    Manual,
    Checkpoint,
    ErrorRecovery,
}

impl SnapshotReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotReason::PreCompact => "pre_compact",
            SnapshotReason::Manual => "manual",
            SnapshotReason::Checkpoint => "checkpoint",
            SnapshotReason::ErrorRecovery => "error_recovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre_compact" => Some(SnapshotReason::PreCompact),
            "manual" => Some(SnapshotReason::Manual),
            "checkpoint" => Some(SnapshotReason::Checkpoint),
            "error_recovery" => Some(SnapshotReason::ErrorRecovery),
            _ => None,
        }
    }
}

/// A captured condensed view of a session at a moment in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    pub session_id: String,
    pub timestamp: u64,
    pub reason: SnapshotReason,
    pub event_count: u64,
    /// The condensed context at capture time
    pub context: SessionContext,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
