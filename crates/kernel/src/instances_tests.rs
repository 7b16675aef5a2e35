// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use cb_core::{keys, Clock, ErrorKind, InstanceStatus, Subscription};

use crate::test_support::test_kernel;

#[tokio::test]
async fn register_indexes_roles() {
    let (kernel, _clock) = test_kernel();
    let instance = kernel
        .instances()
        .register("w1", &["worker".to_string(), "reviewer".to_string()], json!({}))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Active);

    assert!(kernel.kv().sismember(&keys::instances_index(), "w1").await.unwrap());
    assert!(kernel.kv().sismember(&keys::role("worker"), "w1").await.unwrap());
    assert!(kernel.kv().sismember(&keys::role("reviewer"), "w1").await.unwrap());

    let loaded = kernel.instances().get("w1").await.unwrap().unwrap();
    assert_eq!(loaded.roles, instance.roles);
}

#[tokio::test]
async fn empty_instance_id_is_invalid() {
    let (kernel, _clock) = test_kernel();
    let err = kernel.instances().register("", &[], json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn heartbeat_refreshes_last_seen() {
    let (kernel, clock) = test_kernel();
    kernel
        .instances()
        .register("w1", &["worker".to_string()], json!({}))
        .await
        .unwrap();
    let registered_at = clock.epoch_ms();
    clock.advance(Duration::from_secs(10));
    let beat = kernel.instances().heartbeat("w1", None).await.unwrap();
    assert_eq!(beat.last_seen, registered_at + 10_000);
}

#[tokio::test]
async fn heartbeat_for_unknown_instance_is_not_found() {
    let (kernel, _clock) = test_kernel();
    let err = kernel.instances().heartbeat("ghost", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn heartbeat_can_change_status_and_revives_offline() {
    let (kernel, _clock) = test_kernel();
    kernel
        .instances()
        .register("w1", &["worker".to_string()], json!({}))
        .await
        .unwrap();
    let busy = kernel
        .instances()
        .heartbeat("w1", Some(InstanceStatus::Busy))
        .await
        .unwrap();
    assert_eq!(busy.status, InstanceStatus::Busy);

    // Force OFFLINE, then a plain heartbeat revives it.
    kernel
        .instances()
        .heartbeat("w1", Some(InstanceStatus::Offline))
        .await
        .unwrap();
    let revived = kernel.instances().heartbeat("w1", None).await.unwrap();
    assert_eq!(revived.status, InstanceStatus::Active);
}

#[tokio::test]
async fn sweep_marks_stale_instances_offline_and_redistributes() {
    let (kernel, clock) = test_kernel();
    kernel
        .instances()
        .register("w1", &["worker".to_string()], json!({}))
        .await
        .unwrap();
    let a = kernel.queue().create("a", 80, HashMap::new()).await.unwrap();
    let b = kernel.queue().create("b", 30, HashMap::new()).await.unwrap();
    kernel.queue().assign(a.id.as_str(), "w1", 5).await.unwrap();
    kernel.queue().assign(b.id.as_str(), "w1", 5).await.unwrap();

    let mut events = kernel
        .bus()
        .subscribe(Subscription::new(["task.reassigned"]))
        .await
        .unwrap();

    // Stale: last seen 70 s ago with a 60 s threshold.
    clock.advance(Duration::from_secs(70));
    let failed = kernel.instances().sweep().await.unwrap();
    assert_eq!(failed, vec!["w1".to_string()]);

    let offline = kernel.instances().get("w1").await.unwrap().unwrap();
    assert_eq!(offline.status, InstanceStatus::Offline);
    assert_eq!(kernel.kv().zcard(&keys::instance_queue("w1")).await.unwrap(), 0);
    assert_eq!(
        kernel.kv().zscore(&keys::pending_queue(), a.id.as_str()).await.unwrap(),
        Some(80.0)
    );
    assert_eq!(
        kernel.kv().zscore(&keys::pending_queue(), b.id.as_str()).await.unwrap(),
        Some(30.0)
    );
    assert!(kernel
        .kv()
        .exists(&keys::redistributed_marker("w1"))
        .await
        .unwrap());

    let envelope = events.recv().await.unwrap();
    assert_eq!(envelope.payload["from"], "w1");
    assert_eq!(envelope.payload["taskIds"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn sweep_leaves_fresh_instances_alone() {
    let (kernel, clock) = test_kernel();
    kernel
        .instances()
        .register("w1", &["worker".to_string()], json!({}))
        .await
        .unwrap();
    clock.advance(Duration::from_secs(30));
    let failed = kernel.instances().sweep().await.unwrap();
    assert!(failed.is_empty());
    assert_eq!(
        kernel.instances().get("w1").await.unwrap().unwrap().status,
        InstanceStatus::Active
    );
}

#[tokio::test]
async fn sweep_does_not_report_already_offline_instances() {
    let (kernel, clock) = test_kernel();
    kernel
        .instances()
        .register("w1", &["worker".to_string()], json!({}))
        .await
        .unwrap();
    clock.advance(Duration::from_secs(70));
    assert_eq!(kernel.instances().sweep().await.unwrap().len(), 1);
    // Second sweep finds it already OFFLINE.
    assert!(kernel.instances().sweep().await.unwrap().is_empty());
}

#[tokio::test]
async fn by_role_returns_live_members() {
    let (kernel, _clock) = test_kernel();
    kernel
        .instances()
        .register("w1", &["worker".to_string()], json!({}))
        .await
        .unwrap();
    kernel
        .instances()
        .register("r1", &["reviewer".to_string()], json!({}))
        .await
        .unwrap();
    let workers = kernel.instances().by_role("worker").await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].id, "w1");
}

#[tokio::test]
async fn metadata_capabilities_survive_registration() {
    let (kernel, _clock) = test_kernel();
    kernel
        .instances()
        .register(
            "w1",
            &["worker".to_string()],
            json!({"capabilities": ["rust", "testing"]}),
        )
        .await
        .unwrap();
    let loaded = kernel.instances().get("w1").await.unwrap().unwrap();
    assert!(loaded.has_capabilities(&["rust".to_string()]));
    assert!(!loaded.has_capabilities(&["deploy".to_string()]));
}
