// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cached handlers: identical validated input within the TTL returns a
//! byte-identical result without re-running the body; the entry is
//! visible at TTL−ε and gone at TTL+ε.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use cb_core::{fingerprint, keys, KernelError};
use cb_kernel::{CallCtx, EventHandler, HandlerDescriptor};

use super::common;

struct Counting {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl EventHandler for Counting {
    type Input = Value;
    type Output = Value;

    async fn handle(&self, input: Value, _ctx: Arc<CallCtx>) -> Result<Value, KernelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({"echo": input, "bodyRuns": n}))
    }
}

#[tokio::test]
async fn identical_input_hits_the_cache() {
    let (kernel, _clock) = common::kernel_unfrozen();
    let calls = Arc::new(AtomicU32::new(0));
    kernel
        .registry()
        .register(
            HandlerDescriptor::builder("spec.cached", Counting { calls: Arc::clone(&calls) })
                .cache_ttl(Duration::from_secs(30))
                .build(),
        )
        .unwrap();
    kernel.registry().freeze();

    let first = kernel
        .execute_handler("spec.cached", json!({"q": "x", "limit": 5}), None)
        .await
        .unwrap();
    // Same value, different key order and whitespace on the wire.
    let second = kernel
        .execute_handler(
            "spec.cached",
            serde_json::from_str(r#"{ "limit": 5, "q": "x" }"#).unwrap(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn entry_expires_exactly_at_the_ttl() {
    let (kernel, clock) = common::kernel_unfrozen();
    let calls = Arc::new(AtomicU32::new(0));
    kernel
        .registry()
        .register(
            HandlerDescriptor::builder("spec.cached", Counting { calls: Arc::clone(&calls) })
                .cache_ttl(Duration::from_secs(30))
                .build(),
        )
        .unwrap();
    kernel.registry().freeze();

    let input = json!({"q": "x"});
    kernel.execute_handler("spec.cached", input.clone(), None).await.unwrap();
    let cache_key = keys::cache("spec.cached", &fingerprint(&input));

    // Visible at TTL−ε…
    clock.advance(Duration::from_millis(29_999));
    assert!(kernel.kv().get(&cache_key).await.unwrap().is_some());
    kernel.execute_handler("spec.cached", input.clone(), None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // …gone at TTL+ε.
    clock.advance(Duration::from_millis(2));
    assert!(kernel.kv().get(&cache_key).await.unwrap().is_none());
    kernel.execute_handler("spec.cached", input, None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
