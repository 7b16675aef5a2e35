// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::{json, Value};

use cb_core::{keys, Clock, SnapshotReason, MAX_LAST_TOOLS};

use crate::test_support::test_kernel;

async fn record(kernel: &crate::Kernel, session: &str, event_type: &str, params: Value) {
    kernel
        .sessions()
        .record_event(
            session,
            event_type,
            &params,
            &json!({"processed": true}),
            &["call".to_string()],
            Some("proc-test"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn prompts_update_the_condensed_view_in_order() {
    let (kernel, _clock) = test_kernel();
    for prompt in ["A", "B", "C"] {
        record(&kernel, "s", "hook.user_prompt", json!({"prompt": prompt})).await;
    }

    let ctx = kernel.sessions().context("s").await.unwrap();
    assert_eq!(ctx.last_prompt.as_deref(), Some("C"));
    assert_eq!(ctx.event_counts.get("hook.user_prompt"), Some(&3));
    assert_eq!(ctx.total_events(), 3);

    let records = kernel.sessions().replay("s", None, 10).await.unwrap();
    assert_eq!(records.len(), 3);
    let prompts: Vec<String> = records
        .iter()
        .map(|r| {
            serde_json::from_str::<Value>(&r.params).unwrap()["prompt"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(prompts, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn stream_count_always_matches_event_counts() {
    let (kernel, _clock) = test_kernel();
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "p"})).await;
    record(&kernel, "s", "hook.pre_tool", json!({"tool": "Read"})).await;
    record(&kernel, "s", "task.create", json!({"text": "x"})).await;

    let ctx = kernel.sessions().context("s").await.unwrap();
    assert_eq!(
        kernel.sessions().stream_len("s").await.unwrap(),
        ctx.total_events()
    );
}

#[tokio::test]
async fn tool_hooks_build_a_bounded_tool_list() {
    let (kernel, _clock) = test_kernel();
    for i in 0..(MAX_LAST_TOOLS + 4) {
        record(&kernel, "s", "hook.pre_tool", json!({"tool": format!("Tool{i}")})).await;
    }
    let ctx = kernel.sessions().context("s").await.unwrap();
    assert_eq!(ctx.last_tools.len(), MAX_LAST_TOOLS);
    // Newest last; oldest entries trimmed.
    assert_eq!(ctx.last_tools.last().map(String::as_str), Some("Tool13"));
    assert_eq!(ctx.last_tools.first().map(String::as_str), Some("Tool4"));
}

#[tokio::test]
async fn todo_write_overwrites_active_todos() {
    let (kernel, _clock) = test_kernel();
    record(
        &kernel,
        "s",
        "hook.todo_write",
        json!({"todos": [{"text": "one", "done": false}]}),
    )
    .await;
    record(
        &kernel,
        "s",
        "hook.todo_write",
        json!({"todos": [{"text": "two", "done": false}, {"text": "three", "done": true}]}),
    )
    .await;
    let ctx = kernel.sessions().context("s").await.unwrap();
    assert_eq!(ctx.active_todos.len(), 2);
    assert_eq!(ctx.active_todos[0]["text"], "two");
}

#[tokio::test]
async fn task_events_track_recent_task_ids() {
    let (kernel, _clock) = test_kernel();
    record(&kernel, "s", "task.assign", json!({"taskId": "t-1", "instanceId": "w1"})).await;
    record(&kernel, "s", "task.assign", json!({"taskId": "t-2", "instanceId": "w1"})).await;
    let ctx = kernel.sessions().context("s").await.unwrap();
    assert_eq!(ctx.last_tasks, vec!["t-1", "t-2"]);
}

#[tokio::test]
async fn unknown_session_yields_an_empty_context() {
    let (kernel, _clock) = test_kernel();
    let ctx = kernel.sessions().context("nope").await.unwrap();
    assert_eq!(ctx.total_events(), 0);
    assert!(ctx.last_prompt.is_none());
}

#[tokio::test]
async fn replay_after_timestamp_is_bounded() {
    let (kernel, clock) = test_kernel();
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "old"})).await;
    let cutoff = clock.epoch_ms();
    clock.advance(Duration::from_millis(10));
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "new1"})).await;
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "new2"})).await;

    let records = kernel.sessions().replay("s", Some(cutoff), 10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].params.contains("new1"));

    let limited = kernel.sessions().replay("s", Some(cutoff), 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

// ── snapshots ────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_captures_context_and_count() {
    let (kernel, _clock) = test_kernel();
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "A"})).await;
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "B"})).await;

    let snapshot = kernel
        .sessions()
        .create_snapshot("s", SnapshotReason::Manual)
        .await
        .unwrap();
    assert_eq!(snapshot.event_count, 2);
    assert_eq!(snapshot.context.last_prompt.as_deref(), Some("B"));

    let loaded = kernel
        .sessions()
        .get_snapshot("s", snapshot.id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, snapshot);
}

#[tokio::test]
async fn snapshot_ttl_follows_the_reason() {
    let (kernel, _clock) = test_kernel();
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "A"})).await;

    let manual = kernel
        .sessions()
        .create_snapshot("s", SnapshotReason::Manual)
        .await
        .unwrap();
    let pre_compact = kernel
        .sessions()
        .create_snapshot("s", SnapshotReason::PreCompact)
        .await
        .unwrap();

    let manual_ttl = kernel
        .kv()
        .pttl(&keys::snapshot("s", manual.id.as_str()))
        .await
        .unwrap();
    let pre_compact_ttl = kernel
        .kv()
        .pttl(&keys::snapshot("s", pre_compact.id.as_str()))
        .await
        .unwrap();
    assert_eq!(manual_ttl, 2 * 3600 * 1000);
    assert_eq!(pre_compact_ttl, 7 * 24 * 3600 * 1000);
}

#[tokio::test]
async fn expired_snapshots_disappear() {
    let (kernel, clock) = test_kernel();
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "A"})).await;
    let snapshot = kernel
        .sessions()
        .create_snapshot("s", SnapshotReason::Checkpoint)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(2 * 3600 + 1));
    assert!(kernel
        .sessions()
        .get_snapshot("s", snapshot.id.as_str())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn restore_rewinds_the_condensed_view() {
    let (kernel, _clock) = test_kernel();
    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "before"})).await;
    let snapshot = kernel
        .sessions()
        .create_snapshot("s", SnapshotReason::Checkpoint)
        .await
        .unwrap();

    record(&kernel, "s", "hook.user_prompt", json!({"prompt": "after"})).await;
    assert_eq!(
        kernel.sessions().context("s").await.unwrap().last_prompt.as_deref(),
        Some("after")
    );

    let restored = kernel
        .sessions()
        .restore_snapshot("s", snapshot.id.as_str())
        .await
        .unwrap();
    assert_eq!(restored.last_prompt.as_deref(), Some("before"));
    let ctx = kernel.sessions().context("s").await.unwrap();
    assert_eq!(ctx.last_prompt.as_deref(), Some("before"));
    assert_eq!(ctx.event_counts.get("hook.user_prompt"), Some(&1));
}

#[tokio::test]
async fn missing_snapshot_restore_is_not_found() {
    let (kernel, _clock) = test_kernel();
    let err = kernel
        .sessions()
        .restore_snapshot("s", "snap-missing")
        .await
        .unwrap_err();
    assert_eq!(err.kind, cb_core::ErrorKind::NotFound);
}
