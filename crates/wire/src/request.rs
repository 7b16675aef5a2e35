// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request id: string or number. A missing (or null) id marks a
/// notification; `Null` is used in responses when the request id could
/// not be recovered (parse/invalid-request errors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Num(i64),
    Str(String),
    Null,
}

/// Optional request metadata extension carrying session routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl RequestMeta {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.correlation_id.is_none() && self.timestamp.is_none()
    }
}

/// A single JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    #[serde(default, skip_serializing_if = "RequestMeta::is_empty")]
    pub metadata: RequestMeta,
}

impl RpcRequest {
    pub fn call(method: impl Into<String>, params: Value, id: RpcId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(id),
            metadata: RequestMeta::default(),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: None,
            metadata: RequestMeta::default(),
        }
    }

    /// Notifications omit `id` and produce no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Envelope validity: version tag and a non-empty method.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == "2.0" && !self.method.is_empty()
    }
}

/// One inbound payload: a single request or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Batch(Vec<RpcRequest>),
    Single(RpcRequest),
}

impl Incoming {
    /// Parse raw bytes; `None` means the payload was not valid JSON at all
    /// (a parse error, distinct from an invalid request envelope).
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
