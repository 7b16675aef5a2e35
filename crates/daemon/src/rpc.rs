// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC dispatch: parse inbound payloads, route into the kernel,
//! format responses per the wire contract.

use serde_json::Value;
use tracing::{debug, warn};

use cb_kernel::Kernel;
use cb_wire::{Incoming, RpcError, RpcId, RpcRequest, RpcResponse};

/// Handle one inbound payload (single call or batch).
///
/// Returns the response value to write back, or `None` when nothing must
/// be sent (a notification, or a batch of only notifications).
pub async fn handle_payload(kernel: &Kernel, bytes: &[u8]) -> Option<Value> {
    let incoming = match Incoming::parse(bytes) {
        Some(incoming) => incoming,
        None => {
            let response = RpcResponse::err(RpcId::Null, RpcError::parse_error());
            return serde_json::to_value(response).ok();
        }
    };
    match incoming {
        Incoming::Single(request) => {
            let response = dispatch(kernel, request).await?;
            serde_json::to_value(response).ok()
        }
        Incoming::Batch(requests) => {
            if requests.is_empty() {
                let response = RpcResponse::err(RpcId::Null, RpcError::invalid_request());
                return serde_json::to_value(response).ok();
            }
            let mut responses = Vec::new();
            for request in requests {
                if let Some(response) = dispatch(kernel, request).await {
                    responses.push(response);
                }
            }
            if responses.is_empty() {
                // A batch of notifications produces no response at all.
                return None;
            }
            serde_json::to_value(responses).ok()
        }
    }
}

/// Dispatch one request. Notifications produce no response; their
/// failures are logged and counted by the pipeline's metrics stage.
pub async fn dispatch(kernel: &Kernel, request: RpcRequest) -> Option<RpcResponse> {
    if !request.is_valid() {
        if request.is_notification() {
            warn!(method = %request.method, "dropping invalid notification");
            return None;
        }
        let id = request.id.unwrap_or(RpcId::Null);
        return Some(RpcResponse::err(id, RpcError::invalid_request()));
    }

    let params = request.params.unwrap_or(Value::Null);
    // The session id doubles as the caller identity for throttling; the
    // transport has no separate authentication layer.
    let caller = request.metadata.session_id.clone();
    let result = kernel
        .execute_with(
            &request.method,
            params,
            caller.as_deref(),
            request.metadata.session_id.clone(),
            request.metadata.correlation_id.clone(),
        )
        .await;

    match request.id {
        None => {
            if let Err(err) = result {
                debug!(method = %request.method, kind = %err.kind, "notification failed: {}", err.message);
            }
            None
        }
        Some(id) => Some(match result {
            Ok(value) => RpcResponse::ok(id, value),
            Err(err) => RpcResponse::err(id, err.into()),
        }),
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
