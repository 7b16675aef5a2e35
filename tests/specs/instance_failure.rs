// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A stale instance is taken OFFLINE by the sweep; its queued tasks
//! reappear in the global pending queue with their prior priorities.

use std::time::Duration;

use serde_json::json;

use cb_core::keys;
use cb_kernel::JobIntervals;

use super::common;

#[tokio::test]
async fn offline_instance_queue_is_redistributed() {
    let (kernel, clock) = common::kernel();

    kernel
        .execute_handler("system.register", json!({"id": "w1", "roles": ["worker"]}), None)
        .await
        .unwrap();

    let mut task_ids = Vec::new();
    for (text, priority) in [("first", 80), ("second", 30)] {
        let created = kernel
            .execute_handler("task.create", json!({"text": text, "priority": priority}), None)
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        kernel
            .execute_handler("task.assign", json!({"taskId": id, "instanceId": "w1"}), None)
            .await
            .unwrap();
        task_ids.push((id, priority));
    }
    assert_eq!(kernel.kv().zcard(&keys::instance_queue("w1")).await.unwrap(), 2);

    // lastSeen is now 70 s stale against the 60 s threshold.
    clock.advance(Duration::from_secs(70));
    let scheduler = kernel.scheduler(JobIntervals {
        sweep: Duration::from_millis(500),
        ..JobIntervals::default()
    });
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.swept, vec!["w1".to_string()]);

    // OFFLINE, queue drained, tasks pending at their prior priorities.
    let instance = kernel.instances().get("w1").await.unwrap().unwrap();
    assert_eq!(instance.status, cb_core::InstanceStatus::Offline);
    assert_eq!(kernel.kv().zcard(&keys::instance_queue("w1")).await.unwrap(), 0);
    for (id, priority) in &task_ids {
        assert_eq!(
            kernel.kv().zscore(&keys::pending_queue(), id).await.unwrap(),
            Some(*priority as f64)
        );
        let task = kernel
            .execute_handler("task.get", json!({"taskId": id}), None)
            .await
            .unwrap();
        assert_eq!(task["status"], "pending");
    }
    // Redistribution marker left behind.
    assert!(kernel
        .kv()
        .exists(&keys::redistributed_marker("w1"))
        .await
        .unwrap());
}

#[tokio::test]
async fn heartbeats_keep_an_instance_out_of_the_sweep() {
    let (kernel, clock) = common::kernel();
    kernel
        .execute_handler("system.register", json!({"id": "w1", "roles": ["worker"]}), None)
        .await
        .unwrap();

    // Heartbeat at 40 s, sweep at 70 s: only 30 s stale by then.
    clock.advance(Duration::from_secs(40));
    kernel
        .execute_handler("system.heartbeat", json!({"id": "w1"}), None)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(30));

    let swept = kernel.instances().sweep().await.unwrap();
    assert!(swept.is_empty());
    assert_eq!(
        kernel.instances().get("w1").await.unwrap().unwrap().status,
        cb_core::InstanceStatus::Active
    );
}
