// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Three prompts on one session: the condensed view holds the latest,
//! the counters match, and the stream replays in order.

use cb_core::Clock;
use serde_json::json;

use super::common;

#[tokio::test]
async fn condensed_view_and_stream_agree() {
    let (kernel, _clock) = common::kernel();

    for prompt in ["A", "B", "C"] {
        kernel
            .execute_with(
                "hook.user_prompt",
                json!({"prompt": prompt}),
                Some("agent-1"),
                Some("s".to_string()),
                None,
            )
            .await
            .unwrap();
    }

    let state = kernel
        .execute_handler(
            "session.state.get",
            json!({"sessionId": "s", "condensed": true}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(state["lastPrompt"], "C");
    assert_eq!(state["eventCounts"]["hook.user_prompt"], 3);

    // Stream: three entries, prompt order preserved.
    let records = kernel.sessions().replay("s", None, 10).await.unwrap();
    assert_eq!(records.len(), 3);
    let prompts: Vec<String> = records
        .iter()
        .map(|r| {
            serde_json::from_str::<serde_json::Value>(&r.params).unwrap()["prompt"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(prompts, vec!["A", "B", "C"]);
    // Stream length equals the counter sum.
    assert_eq!(kernel.sessions().stream_len("s").await.unwrap(), 3);
}

#[tokio::test]
async fn rehydrate_resumes_past_a_timestamp() {
    let (kernel, clock) = common::kernel();

    kernel
        .execute_with(
            "hook.user_prompt",
            json!({"prompt": "before"}),
            None,
            Some("s".to_string()),
            None,
        )
        .await
        .unwrap();
    let cutoff = clock.epoch_ms();
    clock.advance(std::time::Duration::from_millis(5));
    kernel
        .execute_with(
            "hook.user_prompt",
            json!({"prompt": "after"}),
            None,
            Some("s".to_string()),
            None,
        )
        .await
        .unwrap();

    let out = kernel
        .execute_handler(
            "session.rehydrate",
            json!({"sessionId": "s", "afterMs": cutoff}),
            None,
        )
        .await
        .unwrap();
    let events = out["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0]["params"].as_str().unwrap().contains("after"));
}
