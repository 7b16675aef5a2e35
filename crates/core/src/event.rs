// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event envelopes and event-name rules.
//!
//! Handlers and the pipeline produce [`EventEnvelope`] values; the bus
//! fans them out to subscribers and appends session-bound ones to the
//! session stream. Event names are lowercase dotted identifiers
//! (`task.create`, `hook.pre_tool`), the same shape the registry accepts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::EventId;

/// Invalid event name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid event name {name:?}: {reason}")]
pub struct EventNameError {
    pub name: String,
    pub reason: &'static str,
}

/// Validate a lowercase dotted identifier: `segment(.segment)*` where a
/// segment is `[a-z][a-z0-9_]*`.
pub fn validate_event_name(name: &str) -> Result<(), EventNameError> {
    let err = |reason| EventNameError { name: name.to_string(), reason };
    if name.is_empty() {
        return Err(err("empty"));
    }
    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(err("empty segment"));
        }
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => {}
            _ => return Err(err("segment must start with a lowercase letter")),
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(err("segment must be [a-z][a-z0-9_]*"));
        }
    }
    Ok(())
}

/// Envelope metadata: who produced the event and on behalf of which session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Instance id of the producing process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// Monotonically assigned at publish time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
}

/// A published event: type, validated JSON payload, metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: EventMeta,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { event_type: event_type.into(), payload, metadata: EventMeta::default() }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.metadata.session_id = Some(session_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A subscriber's set of event-type patterns.
///
/// Patterns are exact names, a domain prefix wildcard (`task.*`), or the
/// global wildcard `*`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subscription {
    pub patterns: Vec<String>,
}

impl Subscription {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { patterns: patterns.into_iter().map(Into::into).collect() }
    }

    pub fn all() -> Self {
        Self { patterns: vec!["*".to_string()] }
    }

    /// Does any pattern match this event type?
    pub fn matches(&self, event_type: &str) -> bool {
        self.patterns.iter().any(|p| pattern_matches(p, event_type))
    }
}

fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => event_type
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => pattern == event_type,
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
