// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The KV store contract shared by the Redis client and the test double.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ops::ScriptOp;

/// KV infrastructure errors. Converted to `DependencyFailed` at the
/// kernel seam.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("KV connection error: {0}")]
    Connection(String),

    #[error("KV command error: {0}")]
    Command(String),

    #[error("unexpected reply shape: {0}")]
    Reply(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() {
            KvError::Connection(err.to_string())
        } else {
            KvError::Command(err.to_string())
        }
    }
}

/// One entry read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Store-assigned id (`{ms}-{seq}`), monotone within the stream
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One message delivered to a pub/sub subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// Reply from a scripted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptReply {
    Nil,
    Int(i64),
    Data(String),
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptReply::Int(n) => Some(*n),
            ScriptReply::Data(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptReply::Data(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ScriptReply]> {
        match self {
            ScriptReply::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// The Redis-compatible command surface the kernel relies on.
///
/// Scripted operations go through [`KvStore::script`], the only path
/// that may mutate multiple keys in one step.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn ping(&self) -> Result<(), KvError>;

    // -- strings --
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), KvError>;
    /// SET NX PX; true when the key was absent and is now set
    async fn set_nx(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool, KvError>;
    async fn del(&self, key: &str) -> Result<bool, KvError>;
    async fn exists(&self, key: &str) -> Result<bool, KvError>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError>;

    // -- key metadata --
    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, KvError>;
    /// Redis PTTL semantics: −2 missing key, −1 no expiry, else ms remaining
    async fn pttl(&self, key: &str) -> Result<i64, KvError>;
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, KvError>;
    async fn dbsize(&self) -> Result<u64, KvError>;
    async fn key_type(&self, key: &str) -> Result<Option<String>, KvError>;

    // -- hashes --
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, KvError>;
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError>;
    /// Pipelined counter increments: all deltas in one round trip
    async fn hincr_many(&self, key: &str, deltas: &[(String, i64)]) -> Result<(), KvError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError>;

    // -- lists --
    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError>;
    async fn llen(&self, key: &str) -> Result<u64, KvError>;

    // -- sorted sets --
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError>;
    async fn zcard(&self, key: &str) -> Result<u64, KvError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, KvError>;
    /// Ascending by score; start/stop are rank indexes (ZRANGE … WITHSCORES)
    async fn zrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, KvError>;

    // -- sets --
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, KvError>;

    // -- streams --
    /// XADD with `*` id assignment and optional approximate MAXLEN trim
    async fn xadd(
        &self,
        key: &str,
        maxlen: Option<u64>,
        fields: &[(String, String)],
    ) -> Result<String, KvError>;
    async fn xrange(
        &self,
        key: &str,
        start: &str,
        end: &str,
        count: Option<u64>,
    ) -> Result<Vec<StreamEntry>, KvError>;
    async fn xlen(&self, key: &str) -> Result<u64, KvError>;

    // -- pub/sub --
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, KvError>;
    /// Pattern subscription (`*` glob). The receiver closes when the
    /// subscriber connection drops.
    async fn subscribe(&self, patterns: &[String]) -> Result<mpsc::Receiver<PubSubMessage>, KvError>;

    // -- scripted atomic ops --
    async fn script(
        &self,
        op: ScriptOp,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, KvError>;
}
