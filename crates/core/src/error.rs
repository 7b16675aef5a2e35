// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel error taxonomy and JSON-RPC code mapping.
//!
//! Every failure flowing through the pipeline is a [`KernelError`]: a
//! [`ErrorKind`] plus message and optional structured data. The transport
//! maps kinds onto the wire codes; internal callers match on the kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds recognized by the pipeline and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed schema validation
    InvalidInput,
    /// Unknown method or missing entity
    NotFound,
    /// Sliding-window quota exhausted
    RateLimited,
    /// Circuit breaker is open for this event
    CircuitOpen,
    /// Deadline elapsed before the handler finished
    Timeout,
    Unauthorized,
    /// Hook policy denial
    Blocked,
    /// Conflicting mutation (e.g. double assignment)
    Conflict,
    /// Per-process admission semaphore saturated
    Overloaded,
    /// KV or relational dependency failed
    DependencyFailed,
    /// Unexpected internal failure
    Internal,
}

impl ErrorKind {
    /// JSON-RPC error code for this kind.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidInput => -32602,
            ErrorKind::NotFound => -32601,
            ErrorKind::RateLimited => -32000,
            ErrorKind::CircuitOpen => -32001,
            ErrorKind::Unauthorized => -32002,
            ErrorKind::Blocked => -32003,
            ErrorKind::Timeout
            | ErrorKind::Conflict
            | ErrorKind::Overloaded
            | ErrorKind::DependencyFailed
            | ErrorKind::Internal => -32603,
        }
    }

    /// Whether a failure of this kind counts toward the event's circuit.
    ///
    /// Caller-side rejections (bad input, throttling, the open circuit
    /// itself) say nothing about handler health and are excluded.
    pub fn trips_circuit(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::DependencyFailed
                | ErrorKind::Internal
                | ErrorKind::Conflict
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Blocked => "blocked",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::DependencyFailed => "dependency_failed",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The one error type flowing through handler execution.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct KernelError {
    pub kind: ErrorKind,
    pub message: String,
    /// Structured payload surfaced as `error.data` on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl KernelError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::new(ErrorKind::RateLimited, "rate limit exceeded")
            .with_data(serde_json::json!({ "retryAfter": retry_after_ms.div_ceil(1000) }))
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Blocked, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn overloaded() -> Self {
        Self::new(ErrorKind::Overloaded, "overloaded")
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// JSON-RPC error code for the transport.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
