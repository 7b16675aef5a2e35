// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_task_is_pending_with_timestamps() {
    let task = Task::new("write tests", 60, 1_000);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 60);
    assert_eq!(task.created_at, 1_000);
    assert_eq!(task.updated_at, 1_000);
    assert!(task.completed_at.is_none());
    assert!(task.assigned_to.is_none());
    assert!(task.id.as_str().starts_with("t-"));
}

#[test]
fn priority_is_clamped_to_100() {
    let task = Task::new("x", 255, 0);
    assert_eq!(task.priority, 100);
}

#[yare::parameterized(
    pending     = { TaskStatus::Pending, false },
    in_progress = { TaskStatus::InProgress, false },
    completed   = { TaskStatus::Completed, true },
    failed      = { TaskStatus::Failed, true },
    cancelled   = { TaskStatus::Cancelled, true },
)]
fn terminal_statuses(status: TaskStatus, terminal: bool) {
    assert_eq!(status.is_terminal(), terminal);
}

#[test]
fn status_string_round_trip() {
    for status in [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ] {
        assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(TaskStatus::parse("bogus"), None);
}

#[test]
fn task_serde_uses_camel_case() {
    let mut task = Task::new("x", 10, 5);
    task.assigned_to = Some("w1".to_string());
    let v = serde_json::to_value(&task).unwrap();
    assert_eq!(v["assignedTo"], "w1");
    assert_eq!(v["createdAt"], 5);
    assert_eq!(v["status"], "pending");
}

#[test]
fn task_record_round_trips() {
    let mut task = Task::new("round trip", 42, 77);
    task.metadata.insert("origin".into(), serde_json::json!("test"));
    let json = serde_json::to_string(&task).unwrap();
    let back: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(back, task);
}

#[test]
fn attachment_round_trips_with_type_tag() {
    let att = TaskAttachment {
        id: "att-1".into(),
        task_id: TaskId::from_string("t-1"),
        key: "analysis".into(),
        kind: AttachmentType::Markdown,
        value: None,
        content: Some("# Findings".into()),
        url: None,
        size: 10,
        mime: Some("text/markdown".into()),
        created_at: 1,
        updated_at: 2,
    };
    let v = serde_json::to_value(&att).unwrap();
    assert_eq!(v["type"], "markdown");
    let back: TaskAttachment = serde_json::from_value(v).unwrap();
    assert_eq!(back, att);
}
