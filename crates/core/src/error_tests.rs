// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    invalid_input = { ErrorKind::InvalidInput, -32602 },
    not_found     = { ErrorKind::NotFound, -32601 },
    rate_limited  = { ErrorKind::RateLimited, -32000 },
    circuit_open  = { ErrorKind::CircuitOpen, -32001 },
    unauthorized  = { ErrorKind::Unauthorized, -32002 },
    blocked       = { ErrorKind::Blocked, -32003 },
    timeout       = { ErrorKind::Timeout, -32603 },
    overloaded    = { ErrorKind::Overloaded, -32603 },
    internal      = { ErrorKind::Internal, -32603 },
)]
fn kind_maps_to_wire_code(kind: ErrorKind, code: i32) {
    assert_eq!(kind.code(), code);
}

#[test]
fn rate_limited_carries_retry_after_seconds() {
    let err = KernelError::rate_limited(42_500);
    assert_eq!(err.kind, ErrorKind::RateLimited);
    let data = err.data.unwrap();
    assert_eq!(data["retryAfter"], 43);
}

#[test]
fn caller_rejections_do_not_trip_circuit() {
    assert!(!ErrorKind::InvalidInput.trips_circuit());
    assert!(!ErrorKind::RateLimited.trips_circuit());
    assert!(!ErrorKind::CircuitOpen.trips_circuit());
    assert!(!ErrorKind::NotFound.trips_circuit());
}

#[test]
fn handler_failures_trip_circuit() {
    assert!(ErrorKind::Timeout.trips_circuit());
    assert!(ErrorKind::Internal.trips_circuit());
    assert!(ErrorKind::DependencyFailed.trips_circuit());
}

#[test]
fn display_includes_kind_and_message() {
    let err = KernelError::internal("boom");
    assert_eq!(err.to_string(), "internal: boom");
}

#[test]
fn serde_round_trip() {
    let err = KernelError::conflict("already assigned")
        .with_data(serde_json::json!({"taskId": "t-1"}));
    let json = serde_json::to_string(&err).unwrap();
    let back: KernelError = serde_json::from_str(&json).unwrap();
    assert_eq!(back.kind, ErrorKind::Conflict);
    assert_eq!(back.data.unwrap()["taskId"], "t-1");
}
