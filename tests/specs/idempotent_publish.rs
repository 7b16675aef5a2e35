// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! At-least-once delivery with consumer-side deduplication via the
//! processed-marker set.

use serde_json::json;

use cb_core::{EventEnvelope, EventId, Subscription};

use super::common;

fn with_id(event_type: &str, id: &str) -> EventEnvelope {
    let mut envelope = EventEnvelope::new(event_type, json!({"n": 1}));
    envelope.metadata.id = Some(EventId::from_string(id));
    envelope
}

#[tokio::test]
async fn consumers_observe_a_republished_event_once() {
    let (kernel, _clock) = common::kernel();
    let mut events = kernel.bus().subscribe(Subscription::all()).await.unwrap();

    kernel.bus().publish(with_id("task.created", "evt-123")).await.unwrap();
    kernel.bus().mark_processed("evt-123").await.unwrap();
    // Redelivery of the same event id.
    kernel.bus().publish(with_id("task.created", "evt-123")).await.unwrap();

    let mut handled = 0;
    for _ in 0..2 {
        let envelope = events.recv().await.unwrap();
        let id = envelope.metadata.id.unwrap();
        if !kernel.bus().was_processed(id.as_str()).await.unwrap() {
            kernel.bus().mark_processed(id.as_str()).await.unwrap();
            handled += 1;
        }
    }
    assert_eq!(handled, 0, "evt-123 was marked before either delivery was handled");

    // A fresh id is handled exactly once even when delivered twice.
    kernel.bus().publish(with_id("task.created", "evt-456")).await.unwrap();
    kernel.bus().publish(with_id("task.created", "evt-456")).await.unwrap();
    let mut handled = 0;
    for _ in 0..2 {
        let envelope = events.recv().await.unwrap();
        let id = envelope.metadata.id.unwrap();
        if kernel.bus().mark_processed(id.as_str()).await.unwrap() {
            handled += 1;
        }
    }
    assert_eq!(handled, 1);
}

#[tokio::test]
async fn marker_reports_prior_handling() {
    let (kernel, _clock) = common::kernel();
    assert!(!kernel.bus().was_processed("evt-123").await.unwrap());
    assert!(kernel.bus().mark_processed("evt-123").await.unwrap());
    assert!(kernel.bus().was_processed("evt-123").await.unwrap());
    assert!(!kernel.bus().mark_processed("evt-123").await.unwrap());
}
