// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Quota of three per minute: three calls pass, the fourth is refused
//! with the rate-limit code and a retry hint.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use cb_core::{ErrorKind, KernelError};
use cb_kernel::{CallCtx, EventHandler, HandlerDescriptor};

use super::common;

struct Echo;

#[async_trait]
impl EventHandler for Echo {
    type Input = Value;
    type Output = Value;

    async fn handle(&self, input: Value, _ctx: Arc<CallCtx>) -> Result<Value, KernelError> {
        Ok(input)
    }
}

#[tokio::test]
async fn fourth_call_in_the_window_is_refused() {
    let (kernel, _clock) = common::kernel_unfrozen();
    kernel
        .registry()
        .register(HandlerDescriptor::builder("spec.echo", Echo).quota(3).build())
        .unwrap();
    kernel.registry().freeze();

    for n in 0..3 {
        kernel
            .execute_handler("spec.echo", json!({"n": n}), Some("caller-1"))
            .await
            .unwrap();
    }
    let err = kernel
        .execute_handler("spec.echo", json!({"n": 3}), Some("caller-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert_eq!(err.code(), -32000);
    let retry_after = err.data.unwrap()["retryAfter"].as_u64().unwrap();
    assert!(retry_after <= 60, "retryAfter {retry_after} exceeds the window");
}

#[tokio::test]
async fn window_recovers_after_sixty_seconds() {
    let (kernel, clock) = common::kernel_unfrozen();
    kernel
        .registry()
        .register(HandlerDescriptor::builder("spec.echo", Echo).quota(3).build())
        .unwrap();
    kernel.registry().freeze();

    for n in 0..3 {
        kernel
            .execute_handler("spec.echo", json!({"n": n}), Some("caller-1"))
            .await
            .unwrap();
    }
    assert!(kernel
        .execute_handler("spec.echo", json!({}), Some("caller-1"))
        .await
        .is_err());

    clock.advance(std::time::Duration::from_secs(61));
    assert!(kernel
        .execute_handler("spec.echo", json!({}), Some("caller-1"))
        .await
        .is_ok());
}
