// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Create a task, assign it to a registered instance, observe the queue
//! state and the session-scoped assignment event.

use serde_json::json;

use cb_core::keys;

use super::common;

#[tokio::test]
async fn create_and_assign_reaches_the_instance_queue() {
    let (kernel, _clock) = common::kernel();

    kernel
        .execute_handler(
            "system.register",
            json!({"id": "w1", "roles": ["worker"]}),
            Some("w1"),
        )
        .await
        .unwrap();

    let created = kernel
        .execute_with(
            "task.create",
            json!({"text": "write tests", "priority": 60}),
            Some("c1"),
            Some("s1".to_string()),
            None,
        )
        .await
        .unwrap();
    let task_id = created["id"].as_str().unwrap().to_string();
    assert!(task_id.starts_with("t-"));
    assert_eq!(created["status"], "pending");
    assert_eq!(created["priority"], 60);

    let assigned = kernel
        .execute_with(
            "task.assign",
            json!({"taskId": task_id, "instanceId": "w1"}),
            Some("c1"),
            Some("s1".to_string()),
            None,
        )
        .await
        .unwrap();
    assert_eq!(assigned["taskId"], task_id.as_str());
    assert_eq!(assigned["instanceId"], "w1");
    // ISO-8601 grant time.
    assert!(assigned["assignedAt"].as_str().unwrap().ends_with('Z'));

    // queue:instance:w1 holds the task; global pending no longer does.
    assert!(kernel
        .kv()
        .zscore(&keys::instance_queue("w1"), &task_id)
        .await
        .unwrap()
        .is_some());
    assert!(kernel
        .kv()
        .zscore(&keys::pending_queue(), &task_id)
        .await
        .unwrap()
        .is_none());

    // The session stream carries the derived task.assigned event.
    let records = kernel.sessions().replay("s1", None, 50).await.unwrap();
    let assigned_event = records
        .iter()
        .find(|r| r.event_type == "task.assigned")
        .expect("task.assigned event in session stream");
    let payload: serde_json::Value = serde_json::from_str(&assigned_event.params).unwrap();
    assert_eq!(payload["taskId"], task_id.as_str());
    assert_eq!(payload["instanceId"], "w1");
}

#[tokio::test]
async fn completion_follows_assignment() {
    let (kernel, clock) = common::kernel();
    kernel
        .execute_handler("system.register", json!({"id": "w1", "roles": ["worker"]}), None)
        .await
        .unwrap();
    let created = kernel
        .execute_handler("task.create", json!({"text": "t", "priority": 40}), None)
        .await
        .unwrap();
    let task_id = created["id"].as_str().unwrap().to_string();

    kernel
        .execute_handler("task.assign", json!({"taskId": task_id, "instanceId": "w1"}), None)
        .await
        .unwrap();
    clock.advance(std::time::Duration::from_secs(2));
    let completed = kernel
        .execute_handler("task.complete", json!({"taskId": task_id, "instanceId": "w1"}), None)
        .await
        .unwrap();
    assert_eq!(completed["durationMs"], 2_000);

    // completed ⇒ completedAt set ∧ assignedTo = last assignee.
    let task = kernel
        .execute_handler("task.get", json!({"taskId": task_id}), None)
        .await
        .unwrap();
    assert_eq!(task["status"], "completed");
    assert!(task["completedAt"].is_u64());
    assert_eq!(task["assignedTo"], "w1");
    // Capacity released.
    assert_eq!(
        kernel.kv().get(&keys::capacity("w1")).await.unwrap().as_deref(),
        Some("0")
    );
}
