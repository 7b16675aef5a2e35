// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription control channel messages (WebSocket surface).

use serde::{Deserialize, Serialize};

use cb_core::EventEnvelope;

/// Client → server control messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Add event-type patterns to this connection's subscription
    Subscribe { events: Vec<String> },
    /// Remove patterns; an empty list clears the subscription
    Unsubscribe {
        #[serde(default)]
        events: Vec<String>,
    },
}

/// Server → client acknowledgement of a control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    #[serde(rename = "type")]
    pub kind: String,
    /// Patterns active after the control message was applied
    pub subscribed: Vec<String>,
}

impl SubscribeAck {
    pub fn new(subscribed: Vec<String>) -> Self {
        Self { kind: "subscribed".to_string(), subscribed }
    }
}

/// Server → client streamed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub envelope: EventEnvelope,
}

impl EventFrame {
    pub fn new(envelope: EventEnvelope) -> Self {
        Self { kind: "event".to_string(), envelope }
    }
}

#[cfg(test)]
#[path = "subscribe_tests.rs"]
mod tests;
