// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 wire surface for the ClaudeBench kernel.
//!
//! Framed transport format: 4-byte length prefix (big-endian) + JSON payload.
//! WebSocket connections carry the same JSON payloads in text frames.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod framing;
mod request;
mod response;
mod subscribe;

pub use framing::{decode, encode, read_frame, write_frame, ProtocolError, MAX_FRAME_LEN};
pub use request::{Incoming, RequestMeta, RpcId, RpcRequest};
pub use response::{codes, RpcError, RpcResponse};
pub use subscribe::{ControlMessage, EventFrame, SubscribeAck};
