// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `system.*`: fleet registration, heartbeats, health, discovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cb_core::{EventEnvelope, InstanceStatus, KernelError};
use cb_kernel::{CallCtx, DescriptorDoc, EventHandler, HandlerDescriptor, Kernel};

pub(super) fn register(kernel: &Kernel) -> Result<(), KernelError> {
    let registry = kernel.registry();
    registry.register(
        HandlerDescriptor::builder("system.register", Register)
            .summary("Register an instance in the fleet")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("system.heartbeat", Heartbeat)
            .summary("Refresh an instance's liveness")
            .quota(600)
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("system.health", Health)
            .summary("Process and store health")
            .cache_ttl(Duration::from_secs(1))
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("system.discover", Discover)
            .summary("List served methods")
            .cache_ttl(Duration::from_secs(30))
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("system.metrics", Metrics)
            .summary("Read invocation counters")
            .build(),
    )?;
    Ok(())
}

// ── system.register ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterInput {
    id: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterOutput {
    id: String,
    status: InstanceStatus,
    roles: Vec<String>,
    registered_at: u64,
}

struct Register;

#[async_trait]
impl EventHandler for Register {
    type Input = RegisterInput;
    type Output = RegisterOutput;

    async fn handle(
        &self,
        input: RegisterInput,
        ctx: Arc<CallCtx>,
    ) -> Result<RegisterOutput, KernelError> {
        let instance = ctx
            .kernel()
            .instances()
            .register(&input.id, &input.roles, input.metadata)
            .await?;
        ctx.publish(EventEnvelope::new(
            "system.instance.registered",
            serde_json::json!({"id": &instance.id, "roles": &instance.roles}),
        ));
        Ok(RegisterOutput {
            id: instance.id,
            status: instance.status,
            roles: instance.roles.into_iter().collect(),
            registered_at: instance.last_seen,
        })
    }
}

// ── system.heartbeat ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HeartbeatInput {
    id: String,
    #[serde(default)]
    status: Option<InstanceStatus>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatOutput {
    id: String,
    status: InstanceStatus,
    last_seen: u64,
}

struct Heartbeat;

#[async_trait]
impl EventHandler for Heartbeat {
    type Input = HeartbeatInput;
    type Output = HeartbeatOutput;

    async fn handle(
        &self,
        input: HeartbeatInput,
        ctx: Arc<CallCtx>,
    ) -> Result<HeartbeatOutput, KernelError> {
        let instance = ctx
            .kernel()
            .instances()
            .heartbeat(&input.id, input.status)
            .await?;
        Ok(HeartbeatOutput {
            id: instance.id,
            status: instance.status,
            last_seen: instance.last_seen,
        })
    }
}

// ── system.health ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HealthInput {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthOutput {
    status: String,
    kv_keys: u64,
    instances: usize,
}

struct Health;

#[async_trait]
impl EventHandler for Health {
    type Input = HealthInput;
    type Output = HealthOutput;

    async fn handle(&self, _input: HealthInput, ctx: Arc<CallCtx>) -> Result<HealthOutput, KernelError> {
        let kv_keys = ctx
            .kv()
            .dbsize()
            .await
            .map_err(|err| KernelError::dependency(err.to_string()))?;
        let instances = ctx.kernel().instances().list().await?.len();
        Ok(HealthOutput { status: "ok".to_string(), kv_keys, instances })
    }
}

// ── system.discover ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DiscoverInput {
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Serialize)]
struct DiscoverOutput {
    methods: Vec<DescriptorDoc>,
}

struct Discover;

#[async_trait]
impl EventHandler for Discover {
    type Input = DiscoverInput;
    type Output = DiscoverOutput;

    async fn handle(
        &self,
        input: DiscoverInput,
        ctx: Arc<CallCtx>,
    ) -> Result<DiscoverOutput, KernelError> {
        let prefix = input.domain.map(|d| format!("{d}."));
        let methods = ctx.kernel().registry().discover(prefix.as_deref());
        Ok(DiscoverOutput { methods })
    }
}

// ── system.metrics ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MetricsInput {
    #[serde(default)]
    event: Option<String>,
}

struct Metrics;

#[async_trait]
impl EventHandler for Metrics {
    type Input = MetricsInput;
    type Output = Value;

    async fn handle(&self, input: MetricsInput, ctx: Arc<CallCtx>) -> Result<Value, KernelError> {
        let counters = cb_kernel::metrics::read_counters(ctx.kv(), input.event.as_deref())
            .await
            .map_err(|err| KernelError::dependency(err.to_string()))?;
        serde_json::to_value(counters)
            .map_err(|err| KernelError::internal(format!("metrics encode: {err}")))
    }
}
