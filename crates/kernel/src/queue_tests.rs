// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use cb_core::{keys, AttachmentType, Clock, ErrorKind, Instance, InstanceStatus, TaskStatus};

use super::*;
use crate::test_support::test_kernel;

#[tokio::test]
async fn create_then_get_round_trips() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let mut metadata = HashMap::new();
    metadata.insert("origin".to_string(), json!("cli"));
    let task = queue.create("write tests", 60, metadata).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 60);

    let loaded = queue.get(task.id.as_str()).await.unwrap().unwrap();
    assert_eq!(loaded, task);
    // Pending queue holds it at its priority.
    assert_eq!(
        kernel.kv().zscore(&keys::pending_queue(), task.id.as_str()).await.unwrap(),
        Some(60.0)
    );
}

#[tokio::test]
async fn pending_lists_highest_priority_first() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let low = queue.create("low", 10, HashMap::new()).await.unwrap();
    let high = queue.create("high", 90, HashMap::new()).await.unwrap();
    let mid = queue.create("mid", 50, HashMap::new()).await.unwrap();

    let pending = queue.pending(10).await.unwrap();
    let ids: Vec<&str> = pending.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec![high.id.as_str(), mid.id.as_str(), low.id.as_str()]);

    let top = queue.pending(1).await.unwrap();
    assert_eq!(top[0].1, 90);
}

#[tokio::test]
async fn assign_and_complete_lifecycle() {
    let (kernel, clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 60, HashMap::new()).await.unwrap();

    let assignment = queue.assign(task.id.as_str(), "w1", 5).await.unwrap();
    assert_eq!(assignment.instance_id, "w1");
    assert!(assignment.assigned_at.starts_with("2023-11-14T"));
    assert_eq!(assignment.capacity_in_use, 1);

    clock.advance(Duration::from_millis(1_200));
    let completion = queue.complete(task.id.as_str(), "w1").await.unwrap();
    assert_eq!(completion.duration_ms, 1_200);

    let done = queue.get(task.id.as_str()).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.assigned_to.as_deref(), Some("w1"));
}

#[tokio::test]
async fn assigning_a_missing_task_is_not_found() {
    let (kernel, _clock) = test_kernel();
    let err = kernel.queue().assign("t-ghost", "w1", 5).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn double_assignment_conflicts() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 50, HashMap::new()).await.unwrap();
    queue.assign(task.id.as_str(), "w1", 5).await.unwrap();
    let err = queue.assign(task.id.as_str(), "w2", 5).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn update_merges_metadata_and_reprioritizes() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 50, HashMap::new()).await.unwrap();
    let updated = queue
        .update(
            task.id.as_str(),
            Some("more work"),
            Some(75),
            Some(HashMap::from([("note".to_string(), json!("hi"))])),
        )
        .await
        .unwrap();
    assert_eq!(updated.text, "more work");
    assert_eq!(updated.priority, 75);
    assert_eq!(
        kernel.kv().zscore(&keys::pending_queue(), task.id.as_str()).await.unwrap(),
        Some(75.0)
    );
}

#[tokio::test]
async fn terminal_tasks_only_accept_metadata_updates() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 50, HashMap::new()).await.unwrap();
    queue.assign(task.id.as_str(), "w1", 5).await.unwrap();
    queue.complete(task.id.as_str(), "w1").await.unwrap();

    let err = queue
        .update(task.id.as_str(), Some("rewrite"), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    let ok = queue
        .update(
            task.id.as_str(),
            None,
            None,
            Some(HashMap::from([("note".to_string(), json!("post"))])),
        )
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn failing_a_task_records_the_reason() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 50, HashMap::new()).await.unwrap();
    queue.assign(task.id.as_str(), "w1", 5).await.unwrap();

    let failed = queue
        .finish_with_status(task.id.as_str(), TaskStatus::Failed, Some("agent crashed"))
        .await
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.metadata.get("reason"), Some(&json!("agent crashed")));
    // Removed from the per-instance queue.
    assert_eq!(kernel.kv().zcard(&keys::instance_queue("w1")).await.unwrap(), 0);
}

#[tokio::test]
async fn completed_tasks_cannot_be_cancelled() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 50, HashMap::new()).await.unwrap();
    queue.assign(task.id.as_str(), "w1", 5).await.unwrap();
    queue.complete(task.id.as_str(), "w1").await.unwrap();
    let err = queue
        .finish_with_status(task.id.as_str(), TaskStatus::Cancelled, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

// ── role-routed placement ────────────────────────────────────────────────

fn worker(id: &str, capabilities: &[&str], now: u64) -> Instance {
    let mut instance = Instance::new(id, ["worker"], now);
    instance
        .metadata
        .insert("capabilities".to_string(), json!(capabilities));
    instance
}

#[tokio::test]
async fn subtask_goes_to_the_emptiest_qualified_instance() {
    let (kernel, clock) = test_kernel();
    let queue = kernel.queue();
    let now = clock.epoch_ms();

    // w1 already carries two assignments.
    for _ in 0..2 {
        let task = queue.create("busy work", 50, HashMap::new()).await.unwrap();
        queue.assign(task.id.as_str(), "w1", 5).await.unwrap();
    }
    let subtask = queue.create("subtask", 70, HashMap::new()).await.unwrap();
    let instances = vec![worker("w1", &["rust"], now), worker("w2", &["rust"], now)];

    let placement = queue
        .assign_subtask(subtask.id.as_str(), "worker", &["rust".to_string()], &instances, 5)
        .await
        .unwrap();
    match placement {
        SubtaskPlacement::Assigned { instance_id, .. } => assert_eq!(instance_id, "w2"),
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[tokio::test]
async fn subtask_requires_capability_superset() {
    let (kernel, clock) = test_kernel();
    let queue = kernel.queue();
    let now = clock.epoch_ms();
    let subtask = queue.create("subtask", 70, HashMap::new()).await.unwrap();
    let instances = vec![worker("w1", &["python"], now)];

    let placement = queue
        .assign_subtask(subtask.id.as_str(), "worker", &["rust".to_string()], &instances, 5)
        .await
        .unwrap();
    assert_eq!(placement, SubtaskPlacement::Queued { position: 1 });
    // Parked on the role queue.
    assert_eq!(
        kernel.kv().zcard(&keys::role_queue("worker")).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn offline_instances_never_receive_subtasks() {
    let (kernel, clock) = test_kernel();
    let queue = kernel.queue();
    let now = clock.epoch_ms();
    let subtask = queue.create("subtask", 70, HashMap::new()).await.unwrap();
    let mut offline = worker("w1", &["rust"], now);
    offline.status = InstanceStatus::Offline;

    let placement = queue
        .assign_subtask(subtask.id.as_str(), "worker", &[], &[offline], 5)
        .await
        .unwrap();
    assert!(matches!(placement, SubtaskPlacement::Queued { .. }));
}

// ── reassignment ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reassignment_resets_tasks_to_pending() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let a = queue.create("a", 80, HashMap::new()).await.unwrap();
    let b = queue.create("b", 20, HashMap::new()).await.unwrap();
    queue.assign(a.id.as_str(), "w1", 5).await.unwrap();
    queue.assign(b.id.as_str(), "w1", 5).await.unwrap();

    let moved = queue.reassign_instance("w1").await.unwrap();
    assert_eq!(moved.len(), 2);

    for (id, priority) in [(a.id.as_str(), 80.0), (b.id.as_str(), 20.0)] {
        let task = queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
        assert_eq!(
            kernel.kv().zscore(&keys::pending_queue(), id).await.unwrap(),
            Some(priority)
        );
    }
}

// ── attachments ──────────────────────────────────────────────────────────

#[tokio::test]
async fn attachments_write_and_overwrite_by_key() {
    let (kernel, clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 50, HashMap::new()).await.unwrap();

    let first = queue
        .attach(
            task.id.as_str(),
            "analysis",
            AttachmentType::Markdown,
            None,
            Some("# v1".to_string()),
            None,
            Some("text/markdown".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(first.size, 4);

    clock.advance(Duration::from_millis(10));
    let second = queue
        .attach(
            task.id.as_str(),
            "analysis",
            AttachmentType::Markdown,
            None,
            Some("# v2 longer".to_string()),
            None,
            None,
        )
        .await
        .unwrap();
    // Overwrite keeps creation time, bumps update time.
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);

    let loaded = queue
        .attachment(task.id.as_str(), "analysis")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.content.as_deref(), Some("# v2 longer"));
    assert_eq!(queue.attachment_keys(task.id.as_str()).await.unwrap(), vec!["analysis"]);
}

#[tokio::test]
async fn attachments_require_an_existing_task() {
    let (kernel, _clock) = test_kernel();
    let err = kernel
        .queue()
        .attach("t-ghost", "k", AttachmentType::Text, None, Some("x".into()), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn json_attachments_round_trip() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("work", 50, HashMap::new()).await.unwrap();
    let body = json!({"findings": [1, 2, 3]});
    queue
        .attach(task.id.as_str(), "data", AttachmentType::Json, Some(body.clone()), None, None, None)
        .await
        .unwrap();
    let loaded = queue.attachment(task.id.as_str(), "data").await.unwrap().unwrap();
    assert_eq!(loaded.value, Some(body));
    assert_eq!(loaded.kind, AttachmentType::Json);
}

// ── decomposition contracts ──────────────────────────────────────────────

#[tokio::test]
async fn decomposition_progress_round_trip() {
    let (kernel, _clock) = test_kernel();
    let queue = kernel.queue();
    let task = queue.create("parent", 50, HashMap::new()).await.unwrap();
    let stored = queue
        .store_decomposition(
            task.id.as_str(),
            &json!({"strategy": "parallel"}),
            &[
                ("st-1".to_string(), json!({"status": "completed"})),
                ("st-2".to_string(), json!({"status": "pending"})),
            ],
        )
        .await
        .unwrap();
    assert_eq!(stored, 2);

    let progress = queue.synthesize_progress(task.id.as_str()).await.unwrap();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.percent, 50);
}
