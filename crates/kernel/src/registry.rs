// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler registry: the single source of truth for served events.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use cb_core::{validate_event_name, KernelError};

use crate::handler::HandlerDescriptor;

/// Discovery view of a descriptor (the invoke closure is not exposed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorDoc {
    pub event: String,
    pub summary: String,
    pub persist: bool,
    pub quota: u32,
    pub cache_ttl_ms: u64,
}

#[derive(Default)]
struct RegistryInner {
    handlers: HashMap<String, Arc<HandlerDescriptor>>,
    frozen: bool,
}

/// Registry of handler descriptors, read-only after discovery completes.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Rejects invalid event names, duplicate
    /// registrations, and any registration after [`Registry::freeze`].
    pub fn register(&self, descriptor: HandlerDescriptor) -> Result<(), KernelError> {
        validate_event_name(&descriptor.event)
            .map_err(|err| KernelError::invalid_input(err.to_string()))?;
        let mut inner = self.inner.write();
        if inner.frozen {
            return Err(KernelError::conflict(format!(
                "registry is frozen; cannot register {}",
                descriptor.event
            )));
        }
        if inner.handlers.contains_key(&descriptor.event) {
            return Err(KernelError::conflict(format!(
                "event {} is already registered",
                descriptor.event
            )));
        }
        inner
            .handlers
            .insert(descriptor.event.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Explicitly replace a registration (tests and hot-swaps).
    pub fn replace(&self, descriptor: HandlerDescriptor) -> Result<(), KernelError> {
        validate_event_name(&descriptor.event)
            .map_err(|err| KernelError::invalid_input(err.to_string()))?;
        let mut inner = self.inner.write();
        if inner.frozen {
            return Err(KernelError::conflict(format!(
                "registry is frozen; cannot replace {}",
                descriptor.event
            )));
        }
        inner
            .handlers
            .insert(descriptor.event.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Mark discovery complete; the registry is read-only afterwards.
    pub fn freeze(&self) {
        self.inner.write().frozen = true;
    }

    pub fn get(&self, event: &str) -> Option<Arc<HandlerDescriptor>> {
        self.inner.read().handlers.get(event).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().handlers.is_empty()
    }

    /// Visible descriptors, optionally filtered by event-name prefix,
    /// sorted by event name.
    pub fn discover(&self, prefix: Option<&str>) -> Vec<DescriptorDoc> {
        let inner = self.inner.read();
        let mut docs: Vec<DescriptorDoc> = inner
            .handlers
            .values()
            .filter(|d| d.visible)
            .filter(|d| prefix.is_none_or(|p| d.event.starts_with(p)))
            .map(|d| DescriptorDoc {
                event: d.event.clone(),
                summary: d.summary.clone(),
                persist: d.persist,
                quota: d.quota,
                cache_ttl_ms: d.cache_ttl.as_millis() as u64,
            })
            .collect();
        docs.sort_by(|a, b| a.event.cmp(&b.event));
        docs
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
