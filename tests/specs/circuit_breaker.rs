// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Three consecutive failures open the circuit; after the cool-off one
//! probe is admitted and a success closes it with the counter reset.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use cb_core::{keys, ErrorKind, KernelError};
use cb_kernel::{CallCtx, EventHandler, HandlerDescriptor};

use super::common;

struct FailThenRecover {
    calls: Arc<AtomicU32>,
    failures: u32,
}

#[async_trait]
impl EventHandler for FailThenRecover {
    type Input = Value;
    type Output = Value;

    async fn handle(&self, _input: Value, _ctx: Arc<CallCtx>) -> Result<Value, KernelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(KernelError::internal("backend down"))
        } else {
            Ok(json!({"recovered": true}))
        }
    }
}

#[tokio::test]
async fn opens_then_half_opens_then_closes() {
    let (kernel, clock) = common::kernel_unfrozen();
    let calls = Arc::new(AtomicU32::new(0));
    kernel
        .registry()
        .register(
            HandlerDescriptor::builder(
                "spec.flaky",
                FailThenRecover { calls: Arc::clone(&calls), failures: 3 },
            )
            .circuit(3, Duration::from_secs(1))
            .build(),
        )
        .unwrap();
    kernel.registry().freeze();

    for _ in 0..3 {
        let err = kernel.execute_handler("spec.flaky", json!({}), None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    // Fourth call: rejected by the breaker, handler untouched.
    let err = kernel.execute_handler("spec.flaky", json!({}), None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircuitOpen);
    assert_eq!(err.code(), -32001);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // After the cool-off, the next call is the probe; it succeeds,
    // closing the circuit with failures back at zero.
    clock.advance(Duration::from_millis(1_001));
    let out = kernel.execute_handler("spec.flaky", json!({}), None).await.unwrap();
    assert_eq!(out["recovered"], true);
    assert_eq!(
        kernel.kv().hget(&keys::circuit("spec.flaky"), "state").await.unwrap().as_deref(),
        Some("closed")
    );
    assert_eq!(
        kernel.kv().hget(&keys::circuit("spec.flaky"), "failures").await.unwrap().as_deref(),
        Some("0")
    );

    // And stays closed for subsequent calls.
    kernel.execute_handler("spec.flaky", json!({}), None).await.unwrap();
}

#[tokio::test]
async fn declared_fallback_replaces_the_rejection() {
    let (kernel, _clock) = common::kernel_unfrozen();
    kernel
        .registry()
        .register(
            HandlerDescriptor::builder(
                "spec.flaky",
                FailThenRecover { calls: Arc::new(AtomicU32::new(0)), failures: u32::MAX },
            )
            .circuit(3, Duration::from_secs(60))
            .fallback(json!({"stale": true}))
            .build(),
        )
        .unwrap();
    kernel.registry().freeze();

    for _ in 0..3 {
        let _ = kernel.execute_handler("spec.flaky", json!({}), None).await;
    }
    // Deterministic fallback while open.
    for _ in 0..2 {
        let out = kernel.execute_handler("spec.flaky", json!({}), None).await.unwrap();
        assert_eq!(out, json!({"stale": true}));
    }
}
