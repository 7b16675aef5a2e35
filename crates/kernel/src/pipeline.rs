// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ordered middleware chain applied to every invocation.
//!
//! Stage order: input validation → rate limit → circuit admit → cache
//! read → timeout-armed invoke (output validation inside the erased
//! closure) → cache write → circuit record → metrics → audit →
//! persistence → publication. The chain is reentrant: nested calls made
//! through `ctx.call` run the same stages under the parent deadline.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use cb_core::config::RATE_LIMIT_WINDOW;
use cb_core::{fingerprint, keys, KernelError};
use cb_kv::{ops, CircuitAdmission, KvError, RateLimitDecision};

use crate::audit::{self, AuditRecord};
use crate::handler::{CallCtx, HandlerDescriptor};
use crate::metrics;
use crate::Kernel;

fn dep(err: KvError) -> KernelError {
    KernelError::dependency(err.to_string())
}

pub(crate) async fn run(
    kernel: &Kernel,
    descriptor: &Arc<HandlerDescriptor>,
    input: Value,
    ctx: Arc<CallCtx>,
) -> Result<Value, KernelError> {
    let event = descriptor.event.as_str();
    let kv = kernel.kv();
    let started = Instant::now();
    let now_ms = kernel.clock().epoch_ms();

    // 1. Input validation
    if let Err(err) = (descriptor.check_input)(&input) {
        debug!(event, caller = %ctx.caller, "input validation failed: {}", err.message);
        return Err(err);
    }

    // 2. Rate limit
    if descriptor.quota > 0 {
        let member = format!("{now_ms}-{}", nanoid::nanoid!(8));
        let decision = ops::rate_limit(
            kv,
            event,
            &ctx.caller,
            now_ms,
            RATE_LIMIT_WINDOW.as_millis() as u64,
            descriptor.quota,
            &member,
        )
        .await
        .map_err(dep)?;
        if let RateLimitDecision::Deny { retry_after_ms } = decision {
            debug!(event, caller = %ctx.caller, retry_after_ms, "rate limit exceeded");
            return Err(KernelError::rate_limited(retry_after_ms));
        }
    }

    // 3. Circuit breaker admission
    let admission = ops::circuit_admit(kv, event, now_ms).await.map_err(dep)?;
    if let CircuitAdmission::Open { open_until_ms } = admission {
        debug!(event, open_until_ms, "circuit open");
        if let Some(fallback) = &descriptor.fallback {
            return Ok(fallback.clone());
        }
        return Err(KernelError::circuit_open(format!("circuit open for {event}"))
            .with_data(serde_json::json!({ "openUntil": open_until_ms })));
    }

    // 4. Cache read
    let cache_key = (!descriptor.cache_ttl.is_zero())
        .then(|| keys::cache(event, &fingerprint(&input)));
    if let Some(key) = &cache_key {
        if let Some(hit) = kv.get(key).await.map_err(dep)? {
            match serde_json::from_str::<Value>(&hit) {
                Ok(value) => {
                    debug!(event, "cache hit");
                    // A probe admission is released by the hit; the
                    // handler body was healthy when the entry was written.
                    if admission == CircuitAdmission::Probe {
                        record_circuit(kernel, descriptor, true).await;
                    }
                    finish_observability(kernel, descriptor, &ctx, true, started).await;
                    return Ok(value);
                }
                Err(err) => warn!(event, "dropping undecodable cache entry: {err}"),
            }
        }
    }

    // 5–7. Timeout-armed invocation; output validation inside the closure.
    let remaining = ctx.deadline.saturating_duration_since(Instant::now());
    let outcome: Result<Value, KernelError> = if remaining.is_zero() {
        ctx.cancel.cancel();
        Err(KernelError::timeout(format!("{event}: deadline exhausted")))
    } else {
        match tokio::time::timeout(
            remaining,
            (descriptor.invoke)(input.clone(), Arc::clone(&ctx)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                // Cancellation propagates to nested calls through the
                // shared token; non-cooperative work is discarded.
                ctx.cancel.cancel();
                Err(KernelError::timeout(format!(
                    "{event}: timed out after {}ms",
                    remaining.as_millis()
                )))
            }
        }
    };

    // 8. Cache write on success
    if let (Some(key), Ok(value)) = (&cache_key, &outcome) {
        let encoded = value.to_string();
        if let Err(err) = kv
            .set_with_ttl(key, &encoded, descriptor.cache_ttl.as_millis() as u64)
            .await
        {
            warn!(event, "cache write failed: {err}");
        }
    }

    // Circuit outcome recording: successes always; failures only when the
    // kind reflects handler health, or to release a held probe slot.
    match &outcome {
        Ok(_) => record_circuit(kernel, descriptor, true).await,
        Err(err) => {
            if err.kind.trips_circuit() || admission == CircuitAdmission::Probe {
                record_circuit(kernel, descriptor, false).await;
            }
        }
    }

    // 9–10. Metrics + audit
    finish_observability(kernel, descriptor, &ctx, outcome.is_ok(), started).await;

    let value = match outcome {
        Ok(value) => value,
        Err(err) => {
            debug!(event, caller = %ctx.caller, kind = %err.kind, "call failed: {}", err.message);
            return Err(err);
        }
    };

    // 11. Persistence: session stream (authoritative), then best-effort
    // relational forward.
    if descriptor.persist {
        if let Some(session_id) = ctx.session_id.clone() {
            let record = kernel
                .sessions()
                .record_event(
                    &session_id,
                    event,
                    &input,
                    &value,
                    &["call".to_string()],
                    Some(kernel.producer()),
                )
                .await?;
            if let Err(err) = kernel.store().record_event(&session_id, &record).await {
                warn!(event, %session_id, "relational persist failed: {err}");
            }
        }
    }

    // 12. Publication of handler-declared derived events
    for envelope in ctx.drain_published() {
        if let Err(err) = kernel.bus().publish(envelope).await {
            warn!(event, "derived event publish failed: {}", err.message);
        }
    }

    debug!(event, caller = %ctx.caller, latency_ms = started.elapsed().as_millis() as u64, "call ok");
    Ok(value)
}

async fn record_circuit(kernel: &Kernel, descriptor: &HandlerDescriptor, ok: bool) {
    if let Err(err) = ops::circuit_record(
        kernel.kv(),
        &descriptor.event,
        kernel.clock().epoch_ms(),
        ok,
        descriptor.circuit.threshold,
        descriptor.circuit.cooloff.as_millis() as u64,
    )
    .await
    {
        warn!(event = %descriptor.event, "circuit record failed: {err}");
    }
}

async fn finish_observability(
    kernel: &Kernel,
    descriptor: &HandlerDescriptor,
    ctx: &CallCtx,
    ok: bool,
    started: Instant,
) {
    let latency_ms = started.elapsed().as_millis() as u64;
    if let Err(err) = metrics::record_call(kernel.kv(), &descriptor.event, ok, latency_ms).await {
        warn!(event = %descriptor.event, "metrics record failed: {err}");
    }
    let entry = AuditRecord {
        event: descriptor.event.clone(),
        caller: ctx.caller.clone(),
        ok,
        latency_ms,
        ts: kernel.clock().epoch_ms(),
    };
    if let Err(err) = audit::record(kernel.kv(), &entry).await {
        warn!(event = %descriptor.event, "audit append failed: {err}");
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
