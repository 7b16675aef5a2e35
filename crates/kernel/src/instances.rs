// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance manager: registration, role indexes, heartbeats, failure
//! detection and queue redistribution.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use cb_core::{keys, ClockHandle, EventEnvelope, Instance, InstanceStatus, KernelError};
use cb_kv::{KvError, KvStore};

use crate::bus::EventBus;
use crate::queue::TaskQueue;

fn dep(err: KvError) -> KernelError {
    KernelError::dependency(err.to_string())
}

/// Fleet membership over the shared KV store.
#[derive(Clone)]
pub struct InstanceManager {
    kv: Arc<dyn KvStore>,
    clock: ClockHandle,
    queue: TaskQueue,
    bus: EventBus,
    stale_after: Duration,
}

impl InstanceManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: ClockHandle,
        queue: TaskQueue,
        bus: EventBus,
        stale_after: Duration,
    ) -> Self {
        Self { kv, clock, queue, bus, stale_after }
    }

    /// Instance-key TTL: generous multiple of the staleness threshold so
    /// the sweep observes a stale record before the store drops it.
    fn key_ttl_ms(&self) -> u64 {
        (self.stale_after.as_millis() as u64).saturating_mul(4).max(1_000)
    }

    /// Register (or re-register) an instance and index its roles.
    pub async fn register(
        &self,
        id: &str,
        roles: &[String],
        metadata: Value,
    ) -> Result<Instance, KernelError> {
        if id.is_empty() {
            return Err(KernelError::invalid_input("instance id must be non-empty"));
        }
        let now = self.clock.epoch_ms();
        let mut instance = Instance::new(id, roles.iter().cloned(), now);
        if let Value::Object(map) = metadata {
            instance.metadata = map.into_iter().collect();
        }
        self.write_instance(&instance).await?;
        self.kv
            .sadd(&keys::instances_index(), id)
            .await
            .map_err(dep)?;
        for role in &instance.roles {
            self.kv.sadd(&keys::role(role), id).await.map_err(dep)?;
        }
        info!(instance_id = id, roles = ?instance.roles, "instance registered");
        Ok(instance)
    }

    /// Refresh `lastSeen` (and optionally status); extends the key TTL.
    pub async fn heartbeat(
        &self,
        id: &str,
        status: Option<InstanceStatus>,
    ) -> Result<Instance, KernelError> {
        let mut instance = self
            .get(id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("instance {id}")))?;
        instance.last_seen = self.clock.epoch_ms();
        if let Some(status) = status {
            instance.status = status;
        } else if instance.status == InstanceStatus::Offline {
            // A heartbeat from an OFFLINE instance brings it back.
            instance.status = InstanceStatus::Active;
        }
        self.write_instance(&instance).await?;
        Ok(instance)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Instance>, KernelError> {
        let fields = self.kv.hgetall(&keys::instance(id)).await.map_err(dep)?;
        if fields.is_empty() {
            return Ok(None);
        }
        instance_from_fields(&fields).map(Some)
    }

    /// Every registered instance, index order.
    pub async fn list(&self) -> Result<Vec<Instance>, KernelError> {
        let ids = self.kv.smembers(&keys::instances_index()).await.map_err(dep)?;
        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(instance) = self.get(&id).await? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    /// Active members of a role.
    pub async fn by_role(&self, role: &str) -> Result<Vec<Instance>, KernelError> {
        let ids = self.kv.smembers(&keys::role(role)).await.map_err(dep)?;
        let mut instances = Vec::new();
        for id in ids {
            if let Some(instance) = self.get(&id).await? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    /// One failure-detection pass: mark stale instances OFFLINE, drain
    /// their queues back to global pending, publish the redistribution
    /// events. Returns the ids taken offline in this pass.
    pub async fn sweep(&self) -> Result<Vec<String>, KernelError> {
        let now = self.clock.epoch_ms();
        let stale_ms = self.stale_after.as_millis() as u64;
        let ids = self.kv.smembers(&keys::instances_index()).await.map_err(dep)?;
        let mut failed = Vec::new();
        for id in ids {
            match self.get(&id).await? {
                None => {
                    // Record expired entirely; clean the index and
                    // redistribute whatever its queue still holds.
                    warn!(instance_id = %id, "instance record expired; cleaning up");
                    self.kv.srem(&keys::instances_index(), &id).await.map_err(dep)?;
                    self.redistribute(&id).await?;
                }
                Some(instance) => {
                    if instance.status == InstanceStatus::Offline {
                        continue;
                    }
                    if now.saturating_sub(instance.last_seen) > stale_ms {
                        info!(instance_id = %id, last_seen = instance.last_seen, "instance stale; marking OFFLINE");
                        let mut offline = instance;
                        offline.status = InstanceStatus::Offline;
                        self.write_instance(&offline).await?;
                        self.redistribute(&id).await?;
                        failed.push(id);
                    }
                }
            }
        }
        Ok(failed)
    }

    async fn redistribute(&self, instance_id: &str) -> Result<(), KernelError> {
        let moved = self.queue.reassign_instance(instance_id).await?;
        if moved.is_empty() {
            return Ok(());
        }
        let envelope = EventEnvelope::new(
            "task.reassigned",
            serde_json::json!({
                "from": instance_id,
                "taskIds": moved,
            }),
        );
        if let Err(err) = self.bus.publish(envelope).await {
            warn!(instance_id, "redistribution publish failed: {}", err.message);
        }
        Ok(())
    }

    async fn write_instance(&self, instance: &Instance) -> Result<(), KernelError> {
        let key = keys::instance(&instance.id);
        let roles = serde_json::to_string(&instance.roles)
            .map_err(|err| KernelError::internal(format!("instance encode: {err}")))?;
        let metadata = serde_json::to_string(&instance.metadata)
            .map_err(|err| KernelError::internal(format!("instance encode: {err}")))?;
        self.kv
            .hset(
                &key,
                &[
                    ("id".to_string(), instance.id.clone()),
                    ("roles".to_string(), roles),
                    ("status".to_string(), instance.status.as_str().to_string()),
                    ("lastSeen".to_string(), instance.last_seen.to_string()),
                    ("metadata".to_string(), metadata),
                ],
            )
            .await
            .map_err(dep)?;
        self.kv
            .pexpire(&key, self.key_ttl_ms())
            .await
            .map_err(dep)?;
        Ok(())
    }
}

fn instance_from_fields(fields: &[(String, String)]) -> Result<Instance, KernelError> {
    let get = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    };
    let status = InstanceStatus::parse(get("status"))
        .ok_or_else(|| KernelError::internal(format!("instance has unknown status {:?}", get("status"))))?;
    Ok(Instance {
        id: get("id").to_string(),
        roles: serde_json::from_str(get("roles")).unwrap_or_default(),
        status,
        last_seen: get("lastSeen").parse().unwrap_or(0),
        metadata: serde_json::from_str(get("metadata")).unwrap_or_default(),
    })
}

#[cfg(test)]
#[path = "instances_tests.rs"]
mod tests;
