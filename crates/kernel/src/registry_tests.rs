// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cb_core::{ErrorKind, KernelError};

use super::*;
use crate::handler::{CallCtx, EventHandler, HandlerDescriptor};

#[derive(Deserialize)]
struct EchoInput {
    text: String,
}

#[derive(Serialize)]
struct EchoOutput {
    text: String,
}

struct Echo;

#[async_trait]
impl EventHandler for Echo {
    type Input = EchoInput;
    type Output = EchoOutput;

    async fn handle(&self, input: EchoInput, _ctx: Arc<CallCtx>) -> Result<EchoOutput, KernelError> {
        Ok(EchoOutput { text: input.text })
    }
}

fn echo_descriptor(event: &str) -> HandlerDescriptor {
    HandlerDescriptor::builder(event, Echo).summary("echo back").build()
}

#[test]
fn register_and_get() {
    let registry = Registry::new();
    registry.register(echo_descriptor("test.echo")).unwrap();
    assert!(registry.get("test.echo").is_some());
    assert!(registry.get("test.unknown").is_none());
    assert_eq!(registry.len(), 1);
}

#[test]
fn duplicate_registration_is_rejected() {
    let registry = Registry::new();
    registry.register(echo_descriptor("test.echo")).unwrap();
    let err = registry.register(echo_descriptor("test.echo")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[test]
fn replace_swaps_the_descriptor() {
    let registry = Registry::new();
    registry.register(echo_descriptor("test.echo")).unwrap();
    registry
        .replace(HandlerDescriptor::builder("test.echo", Echo).summary("v2").build())
        .unwrap();
    let doc = &registry.discover(None)[0];
    assert_eq!(doc.summary, "v2");
}

#[yare::parameterized(
    uppercase     = { "Test.echo" },
    empty         = { "" },
    trailing_dot  = { "test." },
    hyphen        = { "test-echo" },
)]
fn invalid_event_names_are_rejected(event: &str) {
    let registry = Registry::new();
    let err = registry.register(echo_descriptor(event)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[test]
fn frozen_registry_rejects_mutation() {
    let registry = Registry::new();
    registry.register(echo_descriptor("test.echo")).unwrap();
    registry.freeze();
    assert_eq!(
        registry.register(echo_descriptor("test.other")).unwrap_err().kind,
        ErrorKind::Conflict
    );
    assert_eq!(
        registry.replace(echo_descriptor("test.echo")).unwrap_err().kind,
        ErrorKind::Conflict
    );
    // Reads still work.
    assert!(registry.get("test.echo").is_some());
}

#[test]
fn discover_filters_by_prefix_and_visibility() {
    let registry = Registry::new();
    registry.register(echo_descriptor("task.create")).unwrap();
    registry.register(echo_descriptor("task.list")).unwrap();
    registry.register(echo_descriptor("system.health")).unwrap();
    registry
        .register(HandlerDescriptor::builder("task.internal", Echo).hidden().build())
        .unwrap();

    let all = registry.discover(None);
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|d| d.event != "task.internal"));

    let tasks = registry.discover(Some("task."));
    let events: Vec<&str> = tasks.iter().map(|d| d.event.as_str()).collect();
    assert_eq!(events, vec!["task.create", "task.list"]);
}

#[test]
fn discover_is_sorted() {
    let registry = Registry::new();
    registry.register(echo_descriptor("b.two")).unwrap();
    registry.register(echo_descriptor("a.one")).unwrap();
    let events: Vec<String> = registry.discover(None).into_iter().map(|d| d.event).collect();
    assert_eq!(events, vec!["a.one", "b.two"]);
}
