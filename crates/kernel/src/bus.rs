// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus: topic fan-out plus the per-session ordered log.
//!
//! Delivery is at-least-once; subscribers tolerate duplicates or consult
//! the idempotency markers. Session-bound events are appended to the
//! session stream through the state processor, which also keeps the
//! condensed counters in step with the stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use cb_core::{keys, validate_event_name, ClockHandle, EventEnvelope, EventId, KernelError, Subscription};
use cb_kv::{ops, KvError, KvStore};

use crate::session::StateProcessor;

fn dep(err: KvError) -> KernelError {
    KernelError::dependency(err.to_string())
}

/// Pub/sub fan-out and session-log append.
#[derive(Clone)]
pub struct EventBus {
    kv: Arc<dyn KvStore>,
    clock: ClockHandle,
    sessions: StateProcessor,
    producer: String,
}

impl EventBus {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: ClockHandle,
        sessions: StateProcessor,
        producer: impl Into<String>,
    ) -> Self {
        Self { kv, clock, sessions, producer: producer.into() }
    }

    /// Publish one envelope: assign its id, fan out on the event-type
    /// channel, and append to the owning session's log when present.
    pub async fn publish(&self, mut envelope: EventEnvelope) -> Result<EventId, KernelError> {
        validate_event_name(&envelope.event_type)
            .map_err(|err| KernelError::invalid_input(err.to_string()))?;
        let id = envelope.metadata.id.unwrap_or_default();
        envelope.metadata.id = Some(id);
        if envelope.metadata.producer.is_none() {
            envelope.metadata.producer = Some(self.producer.clone());
        }

        let payload = serde_json::to_string(&envelope)
            .map_err(|err| KernelError::internal(format!("envelope encode: {err}")))?;
        let receivers = self
            .kv
            .publish(&keys::event_channel(&envelope.event_type), &payload)
            .await
            .map_err(dep)?;
        debug!(event_type = %envelope.event_type, %id, receivers, "event published");

        if let Some(session_id) = envelope.metadata.session_id.clone() {
            self.sessions
                .record_event(
                    &session_id,
                    &envelope.event_type,
                    &envelope.payload,
                    &serde_json::Value::Null,
                    &["event".to_string()],
                    envelope.metadata.producer.as_deref(),
                )
                .await?;
        }
        Ok(id)
    }

    /// Subscribe to a set of event-type patterns (`*` wildcard
    /// supported). The receiver yields decoded envelopes.
    pub async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Result<mpsc::Receiver<EventEnvelope>, KernelError> {
        let channels: Vec<String> = if subscription.patterns.iter().any(|p| p == "*") {
            vec![keys::event_channel_pattern()]
        } else {
            subscription
                .patterns
                .iter()
                .map(|p| keys::event_channel(p))
                .collect()
        };
        let mut raw = self.kv.subscribe(&channels).await.map_err(dep)?;
        let (tx, rx) = mpsc::channel(256);
        let filter = subscription;
        tokio::spawn(async move {
            while let Some(message) = raw.recv().await {
                let envelope: EventEnvelope = match serde_json::from_str(&message.payload) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(channel = %message.channel, "dropping undecodable event: {err}");
                        continue;
                    }
                };
                if !filter.matches(&envelope.event_type) {
                    continue;
                }
                if tx.send(envelope).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    /// Record an event id as handled; false when it was already marked.
    pub async fn mark_processed(&self, event_id: &str) -> Result<bool, KernelError> {
        ops::mark_processed(self.kv.as_ref(), event_id, self.clock.epoch_ms())
            .await
            .map_err(dep)
    }

    /// Was this event id handled within the marker retention window?
    pub async fn was_processed(&self, event_id: &str) -> Result<bool, KernelError> {
        self.kv
            .zscore(&keys::events_processed(), event_id)
            .await
            .map(|score| score.is_some())
            .map_err(dep)
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
