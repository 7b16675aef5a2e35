// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed event handlers and their data descriptors.
//!
//! A handler is a typed async function; the registry stores it erased
//! behind a descriptor whose input/output validation is serde at the
//! edges. Resilience policy (quota, cache TTL, timeout, circuit,
//! fallback) is plain data on the descriptor, applied by the pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use cb_core::{ClockHandle, EventEnvelope, KernelError};
use cb_kv::KvStore;

use crate::Kernel;

/// Maximum nested `ctx.call` depth before a call chain is refused.
pub const MAX_CALL_DEPTH: u8 = 8;

/// Caller identity used when no caller id was provided.
pub const ANON_CALLER: &str = "_anon";

pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, KernelError>> + Send>>;
pub(crate) type InvokeFn = Arc<dyn Fn(Value, Arc<CallCtx>) -> HandlerFuture + Send + Sync>;
pub(crate) type CheckFn = Arc<dyn Fn(&Value) -> Result<(), KernelError> + Send + Sync>;

/// A typed JSON-RPC method implementation.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    async fn handle(&self, input: Self::Input, ctx: Arc<CallCtx>) -> Result<Self::Output, KernelError>;
}

/// Per-event circuit breaker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub threshold: u32,
    pub cooloff: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self { threshold: 5, cooloff: Duration::from_secs(10) }
    }
}

/// Immutable handler metadata plus the erased invoke closure.
pub struct HandlerDescriptor {
    pub event: String,
    pub summary: String,
    pub persist: bool,
    /// Requests per caller per 60 s window; 0 disables throttling
    pub quota: u32,
    /// Zero disables caching
    pub cache_ttl: Duration,
    /// `None` falls back to the configured default timeout
    pub timeout: Option<Duration>,
    pub circuit: CircuitPolicy,
    /// Returned instead of an error while the circuit is open
    pub fallback: Option<Value>,
    /// Hidden descriptors are served but omitted from discovery
    pub visible: bool,
    pub(crate) check_input: CheckFn,
    pub(crate) invoke: InvokeFn,
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("event", &self.event)
            .field("persist", &self.persist)
            .field("quota", &self.quota)
            .field("cache_ttl", &self.cache_ttl)
            .field("timeout", &self.timeout)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

impl HandlerDescriptor {
    /// Start a descriptor for a typed handler.
    pub fn builder<H: EventHandler>(event: impl Into<String>, handler: H) -> DescriptorBuilder {
        let handler = Arc::new(handler);
        let invoke_handler = Arc::clone(&handler);
        let invoke: InvokeFn = Arc::new(move |input, ctx| {
            let handler = Arc::clone(&invoke_handler);
            Box::pin(async move {
                let input: H::Input = serde_json::from_value(input)
                    .map_err(|err| KernelError::invalid_input(format!("invalid params: {err}")))?;
                let output = handler.handle(input, ctx).await?;
                serde_json::to_value(output)
                    .map_err(|err| KernelError::internal(format!("output validation failed: {err}")))
            })
        });
        let check_input: CheckFn = Arc::new(|value: &Value| {
            serde_json::from_value::<H::Input>(value.clone())
                .map(|_| ())
                .map_err(|err| KernelError::invalid_input(format!("invalid params: {err}")))
        });
        DescriptorBuilder {
            event: event.into(),
            summary: String::new(),
            persist: false,
            quota: 100,
            cache_ttl: Duration::ZERO,
            timeout: None,
            circuit: CircuitPolicy::default(),
            fallback: None,
            visible: true,
            check_input,
            invoke,
        }
    }
}

/// Builder for [`HandlerDescriptor`].
pub struct DescriptorBuilder {
    event: String,
    summary: String,
    persist: bool,
    quota: u32,
    cache_ttl: Duration,
    timeout: Option<Duration>,
    circuit: CircuitPolicy,
    fallback: Option<Value>,
    visible: bool,
    check_input: CheckFn,
    invoke: InvokeFn,
}

impl DescriptorBuilder {
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Persist successful calls to the session stream (and the relational
    /// store when configured).
    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn quota(mut self, quota: u32) -> Self {
        self.quota = quota;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn circuit(mut self, threshold: u32, cooloff: Duration) -> Self {
        self.circuit = CircuitPolicy { threshold, cooloff };
        self
    }

    pub fn fallback(mut self, value: Value) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn build(self) -> HandlerDescriptor {
        HandlerDescriptor {
            event: self.event,
            summary: self.summary,
            persist: self.persist,
            quota: self.quota,
            cache_ttl: self.cache_ttl,
            timeout: self.timeout,
            circuit: self.circuit,
            fallback: self.fallback,
            visible: self.visible,
            check_input: self.check_input,
            invoke: self.invoke,
        }
    }
}

/// Per-call context handed to handlers.
///
/// Carries caller/session identity, the shared deadline and cancellation
/// token, and buffered event publications. Nested calls made through
/// [`CallCtx::call`] re-enter the pipeline with depth + 1 and inherit the
/// parent deadline.
pub struct CallCtx {
    pub(crate) kernel: Kernel,
    pub caller: String,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub(crate) deadline: Instant,
    pub(crate) depth: u8,
    pub(crate) cancel: CancellationToken,
    published: parking_lot::Mutex<Vec<EventEnvelope>>,
}

impl CallCtx {
    pub(crate) fn new(
        kernel: Kernel,
        caller: Option<&str>,
        session_id: Option<String>,
        correlation_id: Option<String>,
        deadline: Instant,
        depth: u8,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kernel,
            caller: caller.unwrap_or(ANON_CALLER).to_string(),
            session_id,
            correlation_id,
            deadline,
            depth,
            cancel,
            published: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Kernel handle, for component access (queue, sessions, instances).
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Shared KV store handle.
    pub fn kv(&self) -> &dyn KvStore {
        self.kernel.kv()
    }

    pub fn clock(&self) -> &ClockHandle {
        self.kernel.clock()
    }

    pub fn now_ms(&self) -> u64 {
        self.kernel.clock().epoch_ms()
    }

    /// True once the call's deadline fired or the client went away.
    /// Cooperative handlers check this at suspension points.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Buffer a derived event for publication after the call succeeds.
    /// The session id defaults to the call's session.
    pub fn publish(&self, mut envelope: EventEnvelope) {
        if envelope.metadata.session_id.is_none() {
            envelope.metadata.session_id = self.session_id.clone();
        }
        if envelope.metadata.correlation_id.is_none() {
            envelope.metadata.correlation_id = self.correlation_id.clone();
        }
        self.published.lock().push(envelope);
    }

    pub(crate) fn drain_published(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut *self.published.lock())
    }

    /// Synchronously invoke another handler through the registry. The
    /// nested call runs the full pipeline and inherits this call's
    /// deadline and cancellation.
    pub async fn call(&self, event: &str, input: Value) -> Result<Value, KernelError> {
        self.kernel.execute_nested(event, input, self).await
    }
}
