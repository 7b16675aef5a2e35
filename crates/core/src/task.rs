// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task and attachment records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::TaskId;

/// Task lifecycle status. Completed tasks never return to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work routed through the distributed queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    /// 0–100, higher runs first
    pub priority: u8,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl Task {
    pub fn new(text: impl Into<String>, priority: u8, now_ms: u64) -> Self {
        Self {
            id: TaskId::new(),
            text: text.into(),
            priority: priority.min(100),
            status: TaskStatus::Pending,
            assigned_to: None,
            metadata: HashMap::new(),
            created_at: now_ms,
            updated_at: now_ms,
            completed_at: None,
        }
    }
}

/// Attachment content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Json,
    Markdown,
    Text,
    Url,
    Binary,
}

impl AttachmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentType::Json => "json",
            AttachmentType::Markdown => "markdown",
            AttachmentType::Text => "text",
            AttachmentType::Url => "url",
            AttachmentType::Binary => "binary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(AttachmentType::Json),
            "markdown" => Some(AttachmentType::Markdown),
            "text" => Some(AttachmentType::Text),
            "url" => Some(AttachmentType::Url),
            "binary" => Some(AttachmentType::Binary),
            _ => None,
        }
    }
}

/// Keyed attachment on a task. Writing an existing key overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttachment {
    pub id: String,
    pub task_id: TaskId,
    /// Unique per task
    pub key: String,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    /// Inline JSON value (json type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Inline text content (markdown/text types)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// External location (url/binary types)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
