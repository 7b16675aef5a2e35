// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed [`KvStore`].
//!
//! Two logical connections: `cmd` for ad-hoc commands and `stream` for
//! stream appends and publishes, both auto-reconnecting
//! `ConnectionManager`s over the same client. Each subscriber gets a
//! dedicated pub/sub connection pumped into a bounded channel.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ops::ScriptOp;
use crate::store::{KvError, KvStore, PubSubMessage, ScriptReply, StreamEntry};

const ALL_OPS: [ScriptOp; 12] = [
    ScriptOp::RateLimit,
    ScriptOp::CircuitAdmit,
    ScriptOp::CircuitRecord,
    ScriptOp::TaskAssign,
    ScriptOp::TaskComplete,
    ScriptOp::QueueReassign,
    ScriptOp::LeaderAcquire,
    ScriptOp::LeaderRenew,
    ScriptOp::MetricsFold,
    ScriptOp::MarkProcessed,
    ScriptOp::DecompositionStore,
    ScriptOp::ProgressSynthesis,
];

/// Production KV client.
pub struct RedisKv {
    client: redis::Client,
    cmd: ConnectionManager,
    stream: ConnectionManager,
    scripts: HashMap<ScriptOp, Script>,
}

impl RedisKv {
    /// Connect both logical connections; fails fast when the store is
    /// unreachable (daemon exit code 2 path).
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(KvError::from)?;
        let cmd = client.get_connection_manager().await?;
        let stream = client.get_connection_manager().await?;
        let scripts = ALL_OPS
            .iter()
            .map(|op| (*op, Script::new(op.source())))
            .collect();
        debug!(url, "connected to KV store");
        Ok(Self { client, cmd, stream, scripts })
    }

    fn cmd(&self) -> ConnectionManager {
        self.cmd.clone()
    }

    fn stream_conn(&self) -> ConnectionManager {
        self.stream.clone()
    }
}

fn to_reply(value: redis::Value) -> Result<ScriptReply, KvError> {
    match value {
        redis::Value::Nil => Ok(ScriptReply::Nil),
        redis::Value::Int(n) => Ok(ScriptReply::Int(n)),
        redis::Value::BulkString(bytes) => Ok(ScriptReply::Data(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        redis::Value::SimpleString(s) => Ok(ScriptReply::Data(s)),
        redis::Value::Okay => Ok(ScriptReply::Data("OK".to_string())),
        redis::Value::Boolean(b) => Ok(ScriptReply::Int(i64::from(b))),
        redis::Value::Double(d) => Ok(ScriptReply::Data(d.to_string())),
        redis::Value::Array(items) => Ok(ScriptReply::Array(
            items.into_iter().map(to_reply).collect::<Result<_, _>>()?,
        )),
        other => Err(KvError::Reply(format!("unsupported script reply: {other:?}"))),
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn ping(&self) -> Result<(), KvError> {
        let mut cm = self.cmd();
        redis::cmd("PING").query_async::<()>(&mut cm).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("GET").arg(key).query_async(&mut cm).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut cm = self.cmd();
        redis::cmd("SET").arg(key).arg(value).query_async::<()>(&mut cm).await?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), KvError> {
        let mut cm = self.cmd();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut cm)
            .await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let reply: redis::Value = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut cm)
            .await?;
        Ok(!matches!(reply, redis::Value::Nil))
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut cm).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let n: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut cm).await?;
        Ok(n > 0)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("INCRBY").arg(key).arg(delta).query_async(&mut cm).await?)
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let set: i64 = redis::cmd("PEXPIRE").arg(key).arg(ttl_ms).query_async(&mut cm).await?;
        Ok(set > 0)
    }

    async fn pttl(&self, key: &str) -> Result<i64, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("PTTL").arg(key).query_async(&mut cm).await?)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let mut cm = self.cmd();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut cm)
                .await?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    async fn dbsize(&self) -> Result<u64, KvError> {
        let mut cm = self.cmd();
        let n: i64 = redis::cmd("DBSIZE").query_async(&mut cm).await?;
        Ok(n.max(0) as u64)
    }

    async fn key_type(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut cm = self.cmd();
        let t: String = redis::cmd("TYPE").arg(key).query_async(&mut cm).await?;
        Ok(if t == "none" { None } else { Some(t) })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("HGET").arg(key).arg(field).query_async(&mut cm).await?)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cm = self.cmd();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<()>(&mut cm).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, KvError> {
        let mut cm = self.cmd();
        let mut fields: Vec<(String, String)> =
            redis::cmd("HGETALL").arg(key).query_async(&mut cm).await?;
        fields.sort();
        Ok(fields)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut cm)
            .await?)
    }

    async fn hincr_many(&self, key: &str, deltas: &[(String, i64)]) -> Result<(), KvError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let mut cm = self.cmd();
        let mut pipe = redis::pipe();
        for (field, delta) in deltas {
            pipe.cmd("HINCRBY").arg(key).arg(field).arg(delta).ignore();
        }
        pipe.query_async::<()>(&mut cm).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let removed: i64 = redis::cmd("HDEL").arg(key).arg(field).query_async(&mut cm).await?;
        Ok(removed > 0)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut cm = self.cmd();
        let len: i64 = redis::cmd("LPUSH").arg(key).arg(value).query_async(&mut cm).await?;
        Ok(len.max(0) as u64)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut cm)
            .await?)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError> {
        let mut cm = self.cmd();
        redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<()>(&mut cm)
            .await?;
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let mut cm = self.cmd();
        let len: i64 = redis::cmd("LLEN").arg(key).query_async(&mut cm).await?;
        Ok(len.max(0) as u64)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut cm = self.cmd();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut cm)
            .await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let removed: i64 = redis::cmd("ZREM").arg(key).arg(member).query_async(&mut cm).await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        let mut cm = self.cmd();
        let n: i64 = redis::cmd("ZCARD").arg(key).query_async(&mut cm).await?;
        Ok(n.max(0) as u64)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("ZSCORE").arg(key).arg(member).query_async(&mut cm).await?)
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, KvError> {
        let mut cm = self.cmd();
        Ok(redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut cm)
            .await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let added: i64 = redis::cmd("SADD").arg(key).arg(member).query_async(&mut cm).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let removed: i64 = redis::cmd("SREM").arg(key).arg(member).query_async(&mut cm).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut cm = self.cmd();
        let mut members: Vec<String> =
            redis::cmd("SMEMBERS").arg(key).query_async(&mut cm).await?;
        members.sort();
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut cm = self.cmd();
        let is: i64 = redis::cmd("SISMEMBER").arg(key).arg(member).query_async(&mut cm).await?;
        Ok(is > 0)
    }

    async fn xadd(
        &self,
        key: &str,
        maxlen: Option<u64>,
        fields: &[(String, String)],
    ) -> Result<String, KvError> {
        let mut cm = self.stream_conn();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key);
        if let Some(cap) = maxlen {
            cmd.arg("MAXLEN").arg("~").arg(cap);
        }
        cmd.arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        Ok(cmd.query_async(&mut cm).await?)
    }

    async fn xrange(
        &self,
        key: &str,
        start: &str,
        end: &str,
        count: Option<u64>,
    ) -> Result<Vec<StreamEntry>, KvError> {
        let mut cm = self.stream_conn();
        let mut cmd = redis::cmd("XRANGE");
        cmd.arg(key).arg(start).arg(end);
        if let Some(n) = count {
            cmd.arg("COUNT").arg(n);
        }
        let raw: Vec<(String, Vec<(String, String)>)> = cmd.query_async(&mut cm).await?;
        Ok(raw
            .into_iter()
            .map(|(id, fields)| StreamEntry { id, fields })
            .collect())
    }

    async fn xlen(&self, key: &str) -> Result<u64, KvError> {
        let mut cm = self.stream_conn();
        let len: i64 = redis::cmd("XLEN").arg(key).query_async(&mut cm).await?;
        Ok(len.max(0) as u64)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, KvError> {
        let mut cm = self.stream_conn();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut cm)
            .await?;
        Ok(receivers.max(0) as u64)
    }

    async fn subscribe(
        &self,
        patterns: &[String],
    ) -> Result<mpsc::Receiver<PubSubMessage>, KvError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for pattern in patterns {
            if pattern.contains('*') {
                pubsub.psubscribe(pattern).await?;
            } else {
                pubsub.subscribe(pattern).await?;
            }
        }
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%channel, "dropping non-UTF-8 pub/sub payload: {err}");
                        continue;
                    }
                };
                if tx.send(PubSubMessage { channel, payload }).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn script(
        &self,
        op: ScriptOp,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, KvError> {
        let script = self
            .scripts
            .get(&op)
            .ok_or_else(|| KvError::Command(format!("unknown script op {op:?}")))?;
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for value in args {
            invocation.arg(value.as_str());
        }
        let mut cm = self.cmd();
        let raw: redis::Value = invocation.invoke_async(&mut cm).await?;
        to_reply(raw)
    }
}
