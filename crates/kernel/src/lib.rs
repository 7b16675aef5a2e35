// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cb-kernel: the handler execution kernel.
//!
//! One [`Kernel`] value is the composition root: it owns the registry,
//! event bus, session processor, task queue, instance manager, and the
//! KV/relational handles, constructed once at startup with explicit
//! dependencies. Calls enter through [`Kernel::execute_handler`] and run
//! the middleware pipeline; handlers re-enter through `ctx.call`.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod audit;
mod bus;
mod handler;
mod instances;
pub mod metrics;
mod persist;
mod pipeline;
mod queue;
mod registry;
mod scheduler;
mod session;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use cb_core::{ClockHandle, Config, CorrelationId, KernelError};
use cb_kv::KvStore;

pub use bus::EventBus;
pub use handler::{
    CallCtx, CircuitPolicy, DescriptorBuilder, EventHandler, HandlerDescriptor, ANON_CALLER,
    MAX_CALL_DEPTH,
};
pub use instances::InstanceManager;
pub use persist::{NoopStore, PersistError, RelationalStore};
pub use queue::{
    AssignmentRecord, CompletionRecord, SubtaskPlacement, TaskQueue, DEFAULT_CAPACITY,
};
pub use registry::{DescriptorDoc, Registry};
pub use scheduler::{JobIntervals, Scheduler, TickReport};
pub use session::{StateProcessor, REPLAY_MAX, STREAM_MAXLEN};

struct KernelInner {
    cfg: Config,
    kv: Arc<dyn KvStore>,
    clock: ClockHandle,
    registry: Registry,
    bus: EventBus,
    sessions: StateProcessor,
    queue: TaskQueue,
    instances: InstanceManager,
    store: Arc<dyn RelationalStore>,
    semaphore: Arc<Semaphore>,
    producer: String,
}

/// The composition root. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Wire the kernel together. Construction order follows the
    /// dependency chain: sessions → bus → queue → instances.
    pub fn new(
        cfg: Config,
        kv: Arc<dyn KvStore>,
        clock: ClockHandle,
        store: Arc<dyn RelationalStore>,
        producer: impl Into<String>,
    ) -> Self {
        let producer = producer.into();
        let sessions =
            StateProcessor::new(Arc::clone(&kv), Arc::clone(&clock), cfg.snapshot_ttls.clone());
        let bus = EventBus::new(
            Arc::clone(&kv),
            Arc::clone(&clock),
            sessions.clone(),
            producer.clone(),
        );
        let queue = TaskQueue::new(Arc::clone(&kv), Arc::clone(&clock));
        let instances = InstanceManager::new(
            Arc::clone(&kv),
            Arc::clone(&clock),
            queue.clone(),
            bus.clone(),
            cfg.stale_instance_after,
        );
        let semaphore = Arc::new(Semaphore::new(cfg.max_in_flight));
        Self {
            inner: Arc::new(KernelInner {
                cfg,
                kv,
                clock,
                registry: Registry::new(),
                bus,
                sessions,
                queue,
                instances,
                store,
                semaphore,
                producer,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.inner.kv.as_ref()
    }

    pub fn kv_handle(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.inner.kv)
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.inner.clock
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn sessions(&self) -> &StateProcessor {
        &self.inner.sessions
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    pub fn instances(&self) -> &InstanceManager {
        &self.inner.instances
    }

    pub(crate) fn store(&self) -> &dyn RelationalStore {
        self.inner.store.as_ref()
    }

    /// Id of this process as an event producer.
    pub fn producer(&self) -> &str {
        &self.inner.producer
    }

    /// Build the background scheduler for this kernel.
    pub fn scheduler(&self, intervals: JobIntervals) -> Scheduler {
        Scheduler::new(
            self.kv_handle(),
            Arc::clone(&self.inner.clock),
            self.inner.instances.clone(),
            self.inner.producer.clone(),
            intervals,
        )
    }

    /// Entry point: execute one call through the middleware pipeline.
    pub async fn execute_handler(
        &self,
        event: &str,
        input: Value,
        caller: Option<&str>,
    ) -> Result<Value, KernelError> {
        self.execute_with(event, input, caller, None, None).await
    }

    /// Entry point with session/correlation routing (transport metadata).
    pub async fn execute_with(
        &self,
        event: &str,
        input: Value,
        caller: Option<&str>,
        session_id: Option<String>,
        correlation_id: Option<String>,
    ) -> Result<Value, KernelError> {
        let descriptor = self
            .inner
            .registry
            .get(event)
            .ok_or_else(|| KernelError::not_found(format!("method not found: {event}")))?;

        // Backpressure: fail fast when the per-process cap is saturated.
        let _permit = self
            .inner
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| KernelError::overloaded())?;

        let timeout = descriptor.timeout.unwrap_or(self.inner.cfg.default_timeout);
        // Callers retrying with the same correlation id keep their trace;
        // everyone else gets one assigned here.
        let correlation_id =
            correlation_id.or_else(|| Some(CorrelationId::new().to_string()));
        let ctx = Arc::new(CallCtx::new(
            self.clone(),
            caller,
            session_id,
            correlation_id,
            Instant::now() + timeout,
            0,
            CancellationToken::new(),
        ));
        pipeline::run(self, &descriptor, input, ctx).await
    }

    /// Nested invocation from inside a handler: same pipeline, depth + 1,
    /// parent deadline and cancellation inherited.
    pub(crate) async fn execute_nested(
        &self,
        event: &str,
        input: Value,
        parent: &CallCtx,
    ) -> Result<Value, KernelError> {
        if parent.depth >= MAX_CALL_DEPTH {
            return Err(KernelError::internal(format!(
                "call depth {} exceeded invoking {event}",
                MAX_CALL_DEPTH
            )));
        }
        let descriptor = self
            .inner
            .registry
            .get(event)
            .ok_or_else(|| KernelError::not_found(format!("method not found: {event}")))?;
        let nested_timeout = descriptor.timeout.unwrap_or(self.inner.cfg.default_timeout);
        let deadline = parent.deadline.min(Instant::now() + nested_timeout);
        let ctx = Arc::new(CallCtx::new(
            self.clone(),
            Some(&parent.caller),
            parent.session_id.clone(),
            parent.correlation_id.clone(),
            deadline,
            parent.depth + 1,
            parent.cancel.clone(),
        ));
        pipeline::run(self, &descriptor, input, ctx).await
    }
}
