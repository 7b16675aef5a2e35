// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cb_core::{ErrorKind, KernelError};
use serde_json::json;

#[test]
fn ok_response_shape() {
    let resp = RpcResponse::ok(RpcId::Num(1), json!({"id": "t-1"}));
    let v = serde_json::to_value(&resp).unwrap();
    assert_eq!(v["jsonrpc"], "2.0");
    assert_eq!(v["result"]["id"], "t-1");
    assert!(v.get("error").is_none());
    assert_eq!(v["id"], 1);
}

#[test]
fn error_response_shape() {
    let resp = RpcResponse::err(
        RpcId::Str("r1".into()),
        RpcError::new(codes::METHOD_NOT_FOUND, "no such method"),
    );
    assert!(!resp.is_ok());
    let v = serde_json::to_value(&resp).unwrap();
    assert_eq!(v["error"]["code"], -32601);
    assert!(v.get("result").is_none());
}

#[test]
fn null_id_serializes_as_null() {
    let resp = RpcResponse::err(RpcId::Null, RpcError::parse_error());
    let v = serde_json::to_value(&resp).unwrap();
    assert!(v["id"].is_null());
    assert_eq!(v["error"]["code"], -32700);
}

#[yare::parameterized(
    invalid_input = { ErrorKind::InvalidInput, codes::INVALID_PARAMS },
    not_found     = { ErrorKind::NotFound, codes::METHOD_NOT_FOUND },
    rate_limited  = { ErrorKind::RateLimited, codes::RATE_LIMIT_EXCEEDED },
    circuit_open  = { ErrorKind::CircuitOpen, codes::CIRCUIT_BREAKER_OPEN },
    unauthorized  = { ErrorKind::Unauthorized, codes::UNAUTHORIZED },
    blocked       = { ErrorKind::Blocked, codes::HOOK_BLOCKED },
    timeout       = { ErrorKind::Timeout, codes::INTERNAL_ERROR },
    internal      = { ErrorKind::Internal, codes::INTERNAL_ERROR },
)]
fn kernel_error_maps_to_wire_code(kind: ErrorKind, code: i32) {
    let err: RpcError = KernelError::new(kind, "x").into();
    assert_eq!(err.code, code);
}

#[test]
fn kernel_error_data_is_preserved() {
    let err: RpcError = KernelError::rate_limited(30_000).into();
    assert_eq!(err.data.unwrap()["retryAfter"], 30);
}

#[test]
fn response_round_trips() {
    let resp = RpcResponse::err(
        RpcId::Num(4),
        RpcError::new(codes::RATE_LIMIT_EXCEEDED, "rate limit exceeded")
            .with_data(json!({"retryAfter": 12})),
    );
    let bytes = serde_json::to_vec(&resp).unwrap();
    let back: RpcResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(back, resp);
}
