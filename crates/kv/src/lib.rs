// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cb-kv: KV store client and scripted atomic operations.
//!
//! The kernel's shared state lives in a Redis-compatible store. This crate
//! exposes the [`KvStore`] contract (commands, streams, pub/sub, and the
//! scripted op library), the production [`RedisKv`] client, and the
//! in-process [`MemoryKv`] used by tests.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod ops;
mod redis_store;
mod scripts;
mod store;

#[cfg(any(test, feature = "test-support"))]
mod memory;

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryKv;
pub use ops::{
    AssignOutcome, CircuitAdmission, CircuitStateName, CompleteOutcome, LeaderState,
    ProgressSummary, RateLimitDecision, ScriptOp,
};
pub use redis_store::RedisKv;
pub use store::{KvError, KvStore, PubSubMessage, ScriptReply, StreamEntry};
