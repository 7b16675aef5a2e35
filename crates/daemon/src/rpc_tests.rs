// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::{json, Value};

use crate::test_support::test_kernel;

use super::handle_payload;

async fn call(kernel: &cb_kernel::Kernel, payload: &str) -> Option<Value> {
    handle_payload(kernel, payload.as_bytes()).await
}

#[tokio::test]
async fn single_call_round_trips() {
    let (kernel, _clock) = test_kernel();
    let response = call(
        &kernel,
        r#"{"jsonrpc":"2.0","method":"task.create","params":{"text":"write tests","priority":60},"id":1}"#,
    )
    .await
    .unwrap();
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["status"], "pending");
    assert_eq!(response["result"]["priority"], 60);
    assert!(response["result"]["id"].as_str().unwrap().starts_with("t-"));
}

#[tokio::test]
async fn parse_error_is_32700_with_null_id() {
    let (kernel, _clock) = test_kernel();
    let response = call(&kernel, "{not json").await.unwrap();
    assert_eq!(response["error"]["code"], -32700);
    assert!(response["id"].is_null());
}

#[tokio::test]
async fn invalid_envelope_is_32600() {
    let (kernel, _clock) = test_kernel();
    let response = call(&kernel, r#"{"jsonrpc":"1.0","method":"task.create","id":4}"#)
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32600);
    assert_eq!(response["id"], 4);
}

#[tokio::test]
async fn unknown_method_is_32601() {
    let (kernel, _clock) = test_kernel();
    let response = call(&kernel, r#"{"jsonrpc":"2.0","method":"no.such","id":"r"}"#)
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["id"], "r");
}

#[tokio::test]
async fn invalid_params_is_32602() {
    let (kernel, _clock) = test_kernel();
    let response = call(
        &kernel,
        r#"{"jsonrpc":"2.0","method":"task.create","params":{"priority":60},"id":2}"#,
    )
    .await
    .unwrap();
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn notifications_produce_no_response() {
    let (kernel, _clock) = test_kernel();
    let response = call(
        &kernel,
        r#"{"jsonrpc":"2.0","method":"task.create","params":{"text":"fire and forget"}}"#,
    )
    .await;
    assert!(response.is_none());
    // The call still ran.
    let list = call(&kernel, r#"{"jsonrpc":"2.0","method":"task.list","params":{},"id":9}"#)
        .await
        .unwrap();
    assert_eq!(list["result"]["tasks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn failing_notifications_stay_silent() {
    let (kernel, _clock) = test_kernel();
    let response = call(&kernel, r#"{"jsonrpc":"2.0","method":"no.such","params":{}}"#).await;
    assert!(response.is_none());
}

#[tokio::test]
async fn batch_preserves_per_element_results() {
    let (kernel, _clock) = test_kernel();
    let payload = r#"[
        {"jsonrpc":"2.0","method":"task.create","params":{"text":"a"},"id":1},
        {"jsonrpc":"2.0","method":"no.such","params":{},"id":2},
        {"jsonrpc":"2.0","method":"task.create","params":{"text":"c"}}
    ]"#;
    let response = call(&kernel, payload).await.unwrap();
    let responses = response.as_array().unwrap();
    // Notifications are omitted from the batch response.
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], 1);
    assert!(responses[0]["error"].is_null());
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[1]["error"]["code"], -32601);
}

#[tokio::test]
async fn all_notification_batch_is_silent() {
    let (kernel, _clock) = test_kernel();
    let payload = r#"[
        {"jsonrpc":"2.0","method":"task.create","params":{"text":"a"}},
        {"jsonrpc":"2.0","method":"task.create","params":{"text":"b"}}
    ]"#;
    assert!(call(&kernel, payload).await.is_none());
}

#[tokio::test]
async fn empty_batch_is_invalid_request() {
    let (kernel, _clock) = test_kernel();
    let response = call(&kernel, "[]").await.unwrap();
    assert_eq!(response["error"]["code"], -32600);
}

#[tokio::test]
async fn metadata_routes_session_and_caller() {
    let (kernel, _clock) = test_kernel();
    call(
        &kernel,
        r#"{"jsonrpc":"2.0","method":"hook.user_prompt","params":{"prompt":"hello"},"id":1,
            "metadata":{"sessionId":"s1"}}"#,
    )
    .await
    .unwrap();
    let ctx = kernel.sessions().context("s1").await.unwrap();
    assert_eq!(ctx.last_prompt.as_deref(), Some("hello"));
    assert_eq!(ctx.event_counts.get("hook.user_prompt"), Some(&1));
}

#[tokio::test]
async fn rate_limit_surfaces_as_32000() {
    let (kernel, _clock) = test_kernel();
    // hook.user_prompt quota is 600/min; drive a cheaper path by using
    // the same caller against system.heartbeat's missing instance. The
    // clean check: wire error code mapping via a forced limit.
    for _ in 0..600 {
        call(
            &kernel,
            r#"{"jsonrpc":"2.0","method":"hook.user_prompt","params":{"prompt":"x"},
                "metadata":{"sessionId":"burst"}}"#,
        )
        .await;
    }
    let response = call(
        &kernel,
        r#"{"jsonrpc":"2.0","method":"hook.user_prompt","params":{"prompt":"x"},"id":7,
            "metadata":{"sessionId":"burst"}}"#,
    )
    .await
    .unwrap();
    assert_eq!(response["error"]["code"], -32000);
    assert!(response["error"]["data"]["retryAfter"].as_u64().unwrap() <= 60);
}
