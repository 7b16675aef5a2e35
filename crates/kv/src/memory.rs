// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process KV store for tests.
//!
//! Implements the complete [`KvStore`] contract, including the scripted
//! op library, against a single mutex-guarded map. Every scripted op
//! runs under the lock and is therefore atomic, matching the Redis
//! semantics the kernel relies on. Expiry is lazy against the shared
//! clock, so `FakeClock::advance` makes TTLs observable deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use cb_core::clock::ClockHandle;

use crate::ops::ScriptOp;
use crate::store::{KvError, KvStore, PubSubMessage, ScriptReply, StreamEntry};

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Zset(HashMap<String, f64>),
    Set(HashSet<String>),
    Stream { entries: Vec<StreamEntry>, last: (u64, u64) },
}

impl Entry {
    fn type_name(&self) -> &'static str {
        match self {
            Entry::Str(_) => "string",
            Entry::Hash(_) => "hash",
            Entry::List(_) => "list",
            Entry::Zset(_) => "zset",
            Entry::Set(_) => "set",
            Entry::Stream { .. } => "stream",
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    expiries: HashMap<String, u64>,
}

struct Subscriber {
    patterns: Vec<String>,
    tx: mpsc::Sender<PubSubMessage>,
}

/// In-memory [`KvStore`].
#[derive(Clone)]
pub struct MemoryKv {
    clock: ClockHandle,
    inner: Arc<Mutex<Inner>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

fn wrong_type(key: &str, want: &str, got: &str) -> KvError {
    KvError::Command(format!("WRONGTYPE key {key}: want {want}, holds {got}"))
}

/// Glob match supporting `*` (any run of characters); all other
/// characters match literally. Matches Redis' pattern subset we use.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..]))
            }
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

impl Inner {
    fn purge_expired(&mut self, key: &str, now: u64) {
        if let Some(deadline) = self.expiries.get(key) {
            if *deadline <= now {
                self.expiries.remove(key);
                self.entries.remove(key);
            }
        }
    }

    fn entry(&mut self, key: &str, now: u64) -> Option<&mut Entry> {
        self.purge_expired(key, now);
        self.entries.get_mut(key)
    }

    fn str_value(&mut self, key: &str, now: u64) -> Result<Option<String>, KvError> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Entry::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, "string", other.type_name())),
        }
    }

    fn hash(&mut self, key: &str, now: u64) -> Result<&mut HashMap<String, String>, KvError> {
        self.purge_expired(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry {
            Entry::Hash(map) => Ok(map),
            other => Err(wrong_type(key, "hash", other.type_name())),
        }
    }

    fn list(&mut self, key: &str, now: u64) -> Result<&mut VecDeque<String>, KvError> {
        self.purge_expired(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(list) => Ok(list),
            other => Err(wrong_type(key, "list", other.type_name())),
        }
    }

    fn zset(&mut self, key: &str, now: u64) -> Result<&mut HashMap<String, f64>, KvError> {
        self.purge_expired(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Zset(HashMap::new()));
        match entry {
            Entry::Zset(zset) => Ok(zset),
            other => Err(wrong_type(key, "zset", other.type_name())),
        }
    }

    fn set(&mut self, key: &str, now: u64) -> Result<&mut HashSet<String>, KvError> {
        self.purge_expired(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        match entry {
            Entry::Set(set) => Ok(set),
            other => Err(wrong_type(key, "set", other.type_name())),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::Hash(m)) => m.is_empty(),
            Some(Entry::List(l)) => l.is_empty(),
            Some(Entry::Zset(z)) => z.is_empty(),
            Some(Entry::Set(s)) => s.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
            self.expiries.remove(key);
        }
    }

    fn zset_sorted(&mut self, key: &str, now: u64) -> Result<Vec<(String, f64)>, KvError> {
        match self.entry(key, now) {
            None => Ok(Vec::new()),
            Some(Entry::Zset(zset)) => {
                let mut items: Vec<(String, f64)> =
                    zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
                items.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                Ok(items)
            }
            Some(other) => Err(wrong_type(key, "zset", other.type_name())),
        }
    }
}

/// Normalize a Redis-style range (negative indexes from the end) onto a
/// slice length.
fn range_bounds(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let s = if start < 0 { (len + start).max(0) } else { start.min(len) };
    let e = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if s > e || e < 0 {
        return None;
    }
    Some((s as usize, e as usize))
}

impl MemoryKv {
    pub fn new(clock: ClockHandle) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(Inner::default())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn now(&self) -> u64 {
        self.clock.epoch_ms()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.inner.lock().str_value(key, self.now())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut inner = self.inner.lock();
        inner.entries.insert(key.to_string(), Entry::Str(value.to_string()));
        inner.expiries.remove(key);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        inner.entries.insert(key.to_string(), Entry::Str(value.to_string()));
        inner.expiries.insert(key.to_string(), now + ttl_ms);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        inner.purge_expired(key, now);
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        inner.entries.insert(key.to_string(), Entry::Str(value.to_string()));
        inner.expiries.insert(key.to_string(), now + ttl_ms);
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let mut inner = self.inner.lock();
        inner.expiries.remove(key);
        Ok(inner.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        Ok(inner.entry(key, now).is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let current = match inner.str_value(key, now)? {
            Some(s) => s
                .parse::<i64>()
                .map_err(|_| KvError::Command(format!("value at {key} is not an integer")))?,
            None => 0,
        };
        let next = current + delta;
        inner.entries.insert(key.to_string(), Entry::Str(next.to_string()));
        Ok(next)
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        if inner.entry(key, now).is_none() {
            return Ok(false);
        }
        inner.expiries.insert(key.to_string(), now + ttl_ms);
        Ok(true)
    }

    async fn pttl(&self, key: &str) -> Result<i64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        if inner.entry(key, now).is_none() {
            return Ok(-2);
        }
        match inner.expiries.get(key) {
            Some(deadline) => Ok((*deadline - now) as i64),
            None => Ok(-1),
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner.entries.keys().cloned().collect();
        let mut out = Vec::new();
        for key in keys {
            if inner.entry(&key, now).is_some() && glob_match(pattern, &key) {
                out.push(key);
            }
        }
        out.sort();
        Ok(out)
    }

    async fn dbsize(&self) -> Result<u64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner.entries.keys().cloned().collect();
        for key in &keys {
            inner.purge_expired(key, now);
        }
        Ok(inner.entries.len() as u64)
    }

    async fn key_type(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        Ok(inner.entry(key, now).map(|e| e.type_name().to_string()))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(None),
            Some(Entry::Hash(map)) => Ok(map.get(field).cloned()),
            Some(other) => Err(wrong_type(key, "hash", other.type_name())),
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let map = inner.hash(key, now)?;
        for (field, value) in fields {
            map.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(Vec::new()),
            Some(Entry::Hash(map)) => {
                let mut fields: Vec<(String, String)> =
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                fields.sort();
                Ok(fields)
            }
            Some(other) => Err(wrong_type(key, "hash", other.type_name())),
        }
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let map = inner.hash(key, now)?;
        let current = map
            .get(field)
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|_| KvError::Command(format!("hash field {field} is not an integer")))
            })
            .transpose()?
            .unwrap_or(0);
        let next = current + delta;
        map.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hincr_many(&self, key: &str, deltas: &[(String, i64)]) -> Result<(), KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let map = inner.hash(key, now)?;
        for (field, delta) in deltas {
            let current = map.get(field).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
            map.insert(field.clone(), (current + delta).to_string());
        }
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let removed = match inner.entry(key, now) {
            None => false,
            Some(Entry::Hash(map)) => map.remove(field).is_some(),
            Some(other) => return Err(wrong_type(key, "hash", other.type_name())),
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let list = inner.list(key, now)?;
        list.push_front(value.to_string());
        Ok(list.len() as u64)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => {
                let Some((s, e)) = range_bounds(start, stop, list.len()) else {
                    return Ok(Vec::new());
                };
                Ok(list.iter().skip(s).take(e - s + 1).cloned().collect())
            }
            Some(other) => Err(wrong_type(key, "list", other.type_name())),
        }
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(()),
            Some(Entry::List(list)) => {
                match range_bounds(start, stop, list.len()) {
                    None => list.clear(),
                    Some((s, e)) => {
                        let kept: VecDeque<String> =
                            list.iter().skip(s).take(e - s + 1).cloned().collect();
                        *list = kept;
                    }
                }
                inner.drop_if_empty(key);
                Ok(())
            }
            Some(other) => Err(wrong_type(key, "list", other.type_name())),
        }
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(list.len() as u64),
            Some(other) => Err(wrong_type(key, "list", other.type_name())),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        inner.zset(key, now)?.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let removed = match inner.entry(key, now) {
            None => false,
            Some(Entry::Zset(zset)) => zset.remove(member).is_some(),
            Some(other) => return Err(wrong_type(key, "zset", other.type_name())),
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(0),
            Some(Entry::Zset(zset)) => Ok(zset.len() as u64),
            Some(other) => Err(wrong_type(key, "zset", other.type_name())),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(None),
            Some(Entry::Zset(zset)) => Ok(zset.get(member).copied()),
            Some(other) => Err(wrong_type(key, "zset", other.type_name())),
        }
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let sorted = inner.zset_sorted(key, now)?;
        let Some((s, e)) = range_bounds(start, stop, sorted.len()) else {
            return Ok(Vec::new());
        };
        Ok(sorted.into_iter().skip(s).take(e - s + 1).collect())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        Ok(inner.set(key, now)?.insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let removed = match inner.entry(key, now) {
            None => false,
            Some(Entry::Set(set)) => set.remove(member),
            Some(other) => return Err(wrong_type(key, "set", other.type_name())),
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(Vec::new()),
            Some(Entry::Set(set)) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(other) => Err(wrong_type(key, "set", other.type_name())),
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(false),
            Some(Entry::Set(set)) => Ok(set.contains(member)),
            Some(other) => Err(wrong_type(key, "set", other.type_name())),
        }
    }

    async fn xadd(
        &self,
        key: &str,
        maxlen: Option<u64>,
        fields: &[(String, String)],
    ) -> Result<String, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        inner.purge_expired(key, now);
        let entry = inner
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Stream { entries: Vec::new(), last: (0, 0) });
        match entry {
            Entry::Stream { entries, last } => {
                // Time-monotonic id assignment: {ms}-{seq}
                let id = if now > last.0 { (now, 0) } else { (last.0, last.1 + 1) };
                *last = id;
                let id_str = format!("{}-{}", id.0, id.1);
                entries.push(StreamEntry { id: id_str.clone(), fields: fields.to_vec() });
                if let Some(cap) = maxlen {
                    let len = entries.len();
                    if len as u64 > cap {
                        entries.drain(0..len - cap as usize);
                    }
                }
                Ok(id_str)
            }
            other => Err(wrong_type(key, "stream", other.type_name())),
        }
    }

    async fn xrange(
        &self,
        key: &str,
        start: &str,
        end: &str,
        count: Option<u64>,
    ) -> Result<Vec<StreamEntry>, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(Vec::new()),
            Some(Entry::Stream { entries, .. }) => {
                let lower = parse_stream_bound(start, false);
                let upper = parse_stream_bound(end, true);
                let mut out: Vec<StreamEntry> = entries
                    .iter()
                    .filter(|e| {
                        let id = parse_stream_id(&e.id);
                        id >= lower && id <= upper
                    })
                    .cloned()
                    .collect();
                if let Some(cap) = count {
                    out.truncate(cap as usize);
                }
                Ok(out)
            }
            Some(other) => Err(wrong_type(key, "stream", other.type_name())),
        }
    }

    async fn xlen(&self, key: &str) -> Result<u64, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        match inner.entry(key, now) {
            None => Ok(0),
            Some(Entry::Stream { entries, .. }) => Ok(entries.len() as u64),
            Some(other) => Err(wrong_type(key, "stream", other.type_name())),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, KvError> {
        let mut delivered = 0;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in subscribers.iter() {
            if sub.patterns.iter().any(|p| glob_match(p, channel)) {
                // At-least-once: a full buffer drops for that subscriber
                // only; Redis pub/sub is itself lossy for slow consumers.
                if sub
                    .tx
                    .try_send(PubSubMessage {
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                    })
                    .is_ok()
                {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }

    async fn subscribe(
        &self,
        patterns: &[String],
    ) -> Result<mpsc::Receiver<PubSubMessage>, KvError> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers
            .lock()
            .push(Subscriber { patterns: patterns.to_vec(), tx });
        Ok(rx)
    }

    async fn script(
        &self,
        op: ScriptOp,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, KvError> {
        let now = self.now();
        let mut inner = self.inner.lock();
        run_script(&mut inner, op, keys, args, now)
    }
}

fn parse_stream_id(id: &str) -> (u64, u64) {
    let mut parts = id.splitn(2, '-');
    let ms = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let seq = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (ms, seq)
}

fn parse_stream_bound(bound: &str, upper: bool) -> (u64, u64) {
    match bound {
        "-" => (0, 0),
        "+" => (u64::MAX, u64::MAX),
        other => {
            if other.contains('-') {
                parse_stream_id(other)
            } else {
                let ms = other.parse().unwrap_or(0);
                if upper {
                    (ms, u64::MAX)
                } else {
                    (ms, 0)
                }
            }
        }
    }
}

fn arg<'a>(args: &'a [String], i: usize) -> &'a str {
    args.get(i).map(String::as_str).unwrap_or("")
}

fn arg_u64(args: &[String], i: usize) -> u64 {
    arg(args, i).parse().unwrap_or(0)
}

/// Rust mirrors of the Lua library. Each runs under the store lock, so
/// the all-or-nothing property holds by construction.
fn run_script(
    inner: &mut Inner,
    op: ScriptOp,
    keys: &[String],
    args: &[String],
    clock_now: u64,
) -> Result<ScriptReply, KvError> {
    let key = |i: usize| -> String { keys.get(i).cloned().unwrap_or_default() };
    match op {
        ScriptOp::RateLimit => {
            let now = arg_u64(args, 0);
            let window = arg_u64(args, 1);
            let quota = arg_u64(args, 2);
            let member = arg(args, 3);
            let zkey = key(0);
            let zset = inner.zset(&zkey, clock_now)?;
            zset.retain(|_, score| *score > (now.saturating_sub(window)) as f64);
            let count = zset.len() as u64;
            if count < quota {
                zset.insert(member.to_string(), now as f64);
                inner.expiries.insert(zkey, clock_now + window + 1000);
                Ok(ScriptReply::Array(vec![
                    ScriptReply::Int(1),
                    ScriptReply::Int((quota - count - 1) as i64),
                ]))
            } else {
                let oldest = zset
                    .values()
                    .fold(f64::INFINITY, |acc, s| acc.min(*s));
                let retry = if oldest.is_finite() {
                    ((oldest as u64 + window).saturating_sub(now)) as i64
                } else {
                    0
                };
                inner.drop_if_empty(&zkey);
                Ok(ScriptReply::Array(vec![ScriptReply::Int(0), ScriptReply::Int(retry)]))
            }
        }

        ScriptOp::CircuitAdmit => {
            let now = arg_u64(args, 0);
            let ckey = key(0);
            let hash = inner.hash(&ckey, clock_now)?;
            let state = hash.get("state").cloned().unwrap_or_else(|| "closed".to_string());
            let reply = match state.as_str() {
                "open" => {
                    let open_until: u64 =
                        hash.get("openUntil").and_then(|v| v.parse().ok()).unwrap_or(0);
                    if now >= open_until {
                        hash.insert("state".into(), "half_open".into());
                        hash.insert("probe".into(), "1".into());
                        ScriptReply::Array(vec![
                            ScriptReply::Data("probe".into()),
                            ScriptReply::Int(0),
                        ])
                    } else {
                        ScriptReply::Array(vec![
                            ScriptReply::Data("open".into()),
                            ScriptReply::Int(open_until as i64),
                        ])
                    }
                }
                "half_open" => {
                    if hash.contains_key("probe") {
                        let open_until: i64 =
                            hash.get("openUntil").and_then(|v| v.parse().ok()).unwrap_or(0);
                        ScriptReply::Array(vec![
                            ScriptReply::Data("open".into()),
                            ScriptReply::Int(open_until),
                        ])
                    } else {
                        hash.insert("probe".into(), "1".into());
                        ScriptReply::Array(vec![
                            ScriptReply::Data("probe".into()),
                            ScriptReply::Int(0),
                        ])
                    }
                }
                _ => ScriptReply::Array(vec![
                    ScriptReply::Data("closed".into()),
                    ScriptReply::Int(0),
                ]),
            };
            inner.drop_if_empty(&ckey);
            Ok(reply)
        }

        ScriptOp::CircuitRecord => {
            let now = arg_u64(args, 0);
            let ok = arg(args, 1) == "1";
            let threshold = arg_u64(args, 2);
            let cooloff = arg_u64(args, 3);
            let ckey = key(0);
            let hash = inner.hash(&ckey, clock_now)?;
            let state = hash.get("state").cloned().unwrap_or_else(|| "closed".to_string());
            let result = if ok {
                match state.as_str() {
                    "half_open" => {
                        hash.insert("state".into(), "closed".into());
                        hash.insert("failures".into(), "0".into());
                        hash.remove("probe");
                        hash.remove("openUntil");
                        "closed"
                    }
                    "open" => "open",
                    _ => {
                        hash.insert("failures".into(), "0".into());
                        "closed"
                    }
                }
            } else {
                match state.as_str() {
                    "half_open" => {
                        hash.insert("state".into(), "open".into());
                        hash.insert("openUntil".into(), (now + cooloff).to_string());
                        hash.insert("lastFailure".into(), now.to_string());
                        hash.remove("probe");
                        "open"
                    }
                    "open" => "open",
                    _ => {
                        let failures: u64 =
                            hash.get("failures").and_then(|v| v.parse().ok()).unwrap_or(0) + 1;
                        hash.insert("failures".into(), failures.to_string());
                        hash.insert("lastFailure".into(), now.to_string());
                        if failures >= threshold {
                            hash.insert("state".into(), "open".into());
                            hash.insert("openUntil".into(), (now + cooloff).to_string());
                            "open"
                        } else {
                            "closed"
                        }
                    }
                }
            };
            Ok(ScriptReply::Data(result.to_string()))
        }

        ScriptOp::TaskAssign => {
            let task_id = arg(args, 0).to_string();
            let instance_id = arg(args, 1).to_string();
            let now = arg_u64(args, 2);
            let max_capacity = arg_u64(args, 3);
            let history_cap = arg_u64(args, 4);
            let (task_key, pending_key, queue_key, prio_key, cap_key, history_key) =
                (key(0), key(1), key(2), key(3), key(4), key(5));

            if inner.entry(&task_key, clock_now).is_none() {
                return Ok(ScriptReply::Array(vec![ScriptReply::Data("missing".into())]));
            }
            let status = match inner.entry(&task_key, clock_now) {
                Some(Entry::Hash(map)) => map.get("status").cloned().unwrap_or_default(),
                _ => String::new(),
            };
            if status != "pending" {
                return Ok(ScriptReply::Array(vec![
                    ScriptReply::Data("conflict".into()),
                    ScriptReply::Data(status),
                ]));
            }
            let cap: u64 = inner
                .str_value(&cap_key, clock_now)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if cap >= max_capacity {
                return Ok(ScriptReply::Array(vec![
                    ScriptReply::Data("capacity".into()),
                    ScriptReply::Int(cap as i64),
                ]));
            }
            let priority: f64 = match inner.entry(&task_key, clock_now) {
                Some(Entry::Hash(map)) => {
                    map.get("priority").and_then(|v| v.parse().ok()).unwrap_or(50.0)
                }
                _ => 50.0,
            };
            if let Some(Entry::Zset(pending)) = inner.entry(&pending_key, clock_now) {
                pending.remove(&task_id);
            }
            inner.drop_if_empty(&pending_key);
            inner.zset(&queue_key, clock_now)?.insert(task_id.clone(), now as f64);
            inner
                .hash(&prio_key, clock_now)?
                .insert(task_id.clone(), format!("{priority}"));
            let new_cap = cap + 1;
            inner
                .entries
                .insert(cap_key, Entry::Str(new_cap.to_string()));
            if let Some(Entry::Hash(task)) = inner.entry(&task_key, clock_now) {
                task.insert("status".into(), "in_progress".into());
                task.insert("assignedTo".into(), instance_id.clone());
                task.insert("updatedAt".into(), now.to_string());
            }
            let record = serde_json::json!({
                "taskId": task_id,
                "instanceId": instance_id,
                "assignedAt": now,
            })
            .to_string();
            let history = inner.list(&history_key, clock_now)?;
            history.push_front(record);
            history.truncate(history_cap as usize);
            Ok(ScriptReply::Array(vec![
                ScriptReply::Data("ok".into()),
                ScriptReply::Int(new_cap as i64),
            ]))
        }

        ScriptOp::TaskComplete => {
            let task_id = arg(args, 0).to_string();
            let instance_id = arg(args, 1);
            let now = arg_u64(args, 2);
            let (task_key, queue_key, prio_key, cap_key) = (key(0), key(1), key(2), key(3));

            let Some(Entry::Hash(task)) = inner.entry(&task_key, clock_now) else {
                return Ok(ScriptReply::Array(vec![ScriptReply::Data("missing".into())]));
            };
            let assigned = task.get("assignedTo").cloned().unwrap_or_default();
            if assigned != instance_id {
                return Ok(ScriptReply::Array(vec![
                    ScriptReply::Data("not_assigned".into()),
                    ScriptReply::Data(assigned),
                ]));
            }
            if task.get("status").map(String::as_str) == Some("completed") {
                return Ok(ScriptReply::Array(vec![
                    ScriptReply::Data("conflict".into()),
                    ScriptReply::Data("completed".into()),
                ]));
            }
            let assigned_at = match inner.entry(&queue_key, clock_now) {
                Some(Entry::Zset(zset)) => zset.get(&task_id).copied(),
                _ => None,
            };
            let duration = assigned_at
                .map(|at| (now as f64 - at).max(0.0) as u64)
                .unwrap_or(0);
            if let Some(Entry::Zset(zset)) = inner.entry(&queue_key, clock_now) {
                zset.remove(&task_id);
            }
            inner.drop_if_empty(&queue_key);
            if let Some(Entry::Hash(prio)) = inner.entry(&prio_key, clock_now) {
                prio.remove(&task_id);
            }
            inner.drop_if_empty(&prio_key);
            let cap: u64 = inner
                .str_value(&cap_key, clock_now)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if cap > 0 {
                inner
                    .entries
                    .insert(cap_key, Entry::Str((cap - 1).to_string()));
            }
            if let Some(Entry::Hash(task)) = inner.entry(&task_key, clock_now) {
                task.insert("status".into(), "completed".into());
                task.insert("completedAt".into(), now.to_string());
                task.insert("updatedAt".into(), now.to_string());
            }
            Ok(ScriptReply::Array(vec![
                ScriptReply::Data("ok".into()),
                ScriptReply::Int(duration as i64),
            ]))
        }

        ScriptOp::QueueReassign => {
            let now = arg_u64(args, 0);
            let marker_ttl = arg_u64(args, 1);
            let (queue_key, prio_key, pending_key, marker_key, cap_key) =
                (key(0), key(1), key(2), key(3), key(4));

            let members: Vec<String> = match inner.entry(&queue_key, clock_now) {
                Some(Entry::Zset(zset)) => {
                    let mut items: Vec<(String, f64)> =
                        zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
                    items.sort_by(|a, b| {
                        a.1.partial_cmp(&b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.0.cmp(&b.0))
                    });
                    items.into_iter().map(|(m, _)| m).collect()
                }
                _ => Vec::new(),
            };
            let mut moved = Vec::new();
            for id in members {
                let priority: f64 = match inner.entry(&prio_key, clock_now) {
                    Some(Entry::Hash(prio)) => {
                        prio.get(&id).and_then(|v| v.parse().ok()).unwrap_or(50.0)
                    }
                    _ => 50.0,
                };
                inner.zset(&pending_key, clock_now)?.insert(id.clone(), priority);
                moved.push(ScriptReply::Data(id));
            }
            inner.entries.remove(&queue_key);
            inner.entries.remove(&prio_key);
            inner.entries.remove(&cap_key);
            inner
                .entries
                .insert(marker_key.clone(), Entry::Str(now.to_string()));
            inner.expiries.insert(marker_key, clock_now + marker_ttl);
            Ok(ScriptReply::Array(moved))
        }

        ScriptOp::LeaderAcquire => {
            let holder = arg(args, 0).to_string();
            let ttl = arg_u64(args, 1);
            let lkey = key(0);
            inner.purge_expired(&lkey, clock_now);
            match inner.entries.get(&lkey) {
                None => {
                    inner.entries.insert(lkey.clone(), Entry::Str(holder));
                    inner.expiries.insert(lkey, clock_now + ttl);
                    Ok(ScriptReply::Int(1))
                }
                Some(Entry::Str(current)) if *current == holder => {
                    inner.expiries.insert(lkey, clock_now + ttl);
                    Ok(ScriptReply::Int(1))
                }
                Some(_) => Ok(ScriptReply::Int(0)),
            }
        }

        ScriptOp::LeaderRenew => {
            let holder = arg(args, 0);
            let ttl = arg_u64(args, 1);
            let lkey = key(0);
            inner.purge_expired(&lkey, clock_now);
            match inner.entries.get(&lkey) {
                Some(Entry::Str(current)) if current == holder => {
                    inner.expiries.insert(lkey, clock_now + ttl);
                    Ok(ScriptReply::Int(1))
                }
                _ => Ok(ScriptReply::Int(0)),
            }
        }

        ScriptOp::MetricsFold => {
            let (event_key, folded_key, global_key) = (key(0), key(1), key(2));
            let current: Vec<(String, i64)> = match inner.entry(&event_key, clock_now) {
                Some(Entry::Hash(map)) => map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.parse().unwrap_or(0)))
                    .collect(),
                _ => Vec::new(),
            };
            let mut folded = 0i64;
            for (field, value) in current {
                let prev: i64 = match inner.entry(&folded_key, clock_now) {
                    Some(Entry::Hash(map)) => {
                        map.get(&field).and_then(|v| v.parse().ok()).unwrap_or(0)
                    }
                    _ => 0,
                };
                let delta = value - prev;
                if delta != 0 {
                    let global: i64 = match inner.entry(&global_key, clock_now) {
                        Some(Entry::Hash(map)) => {
                            map.get(&field).and_then(|v| v.parse().ok()).unwrap_or(0)
                        }
                        _ => 0,
                    };
                    inner
                        .hash(&global_key, clock_now)?
                        .insert(field.clone(), (global + delta).to_string());
                    inner
                        .hash(&folded_key, clock_now)?
                        .insert(field, value.to_string());
                    folded += 1;
                }
            }
            Ok(ScriptReply::Int(folded))
        }

        ScriptOp::MarkProcessed => {
            let event_id = arg(args, 0).to_string();
            let now = arg_u64(args, 1);
            let cap = arg_u64(args, 2) as usize;
            let pkey = key(0);
            let zset = inner.zset(&pkey, clock_now)?;
            let added = if zset.contains_key(&event_id) {
                0
            } else {
                zset.insert(event_id, now as f64);
                1
            };
            if zset.len() > cap {
                let mut items: Vec<(String, f64)> =
                    zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
                items.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                let excess = items.len() - cap;
                for (member, _) in items.into_iter().take(excess) {
                    zset.remove(&member);
                }
            }
            Ok(ScriptReply::Int(added))
        }

        ScriptOp::DecompositionStore => {
            let task_id = arg(args, 0).to_string();
            let now = arg_u64(args, 1);
            let decomposition = arg(args, 2).to_string();
            let n = arg_u64(args, 3) as usize;
            let dkey = key(0);
            let hash = inner.hash(&dkey, clock_now)?;
            hash.insert("taskId".into(), task_id);
            hash.insert("createdAt".into(), now.to_string());
            hash.insert("decomposition".into(), decomposition);
            hash.insert("subtaskCount".into(), n.to_string());
            for i in 0..n {
                let id = arg(args, 4 + i * 2);
                let body = arg(args, 5 + i * 2);
                hash.insert(format!("subtask:{id}"), body.to_string());
            }
            Ok(ScriptReply::Int(n as i64))
        }

        ScriptOp::ProgressSynthesis => {
            let now = arg_u64(args, 0);
            let dkey = key(0);
            let mut total = 0u64;
            let mut completed = 0u64;
            let mut in_progress = 0u64;
            if let Some(Entry::Hash(map)) = inner.entry(&dkey, clock_now) {
                for (field, body) in map.iter() {
                    if let Some(_id) = field.strip_prefix("subtask:") {
                        total += 1;
                        if let Ok(sub) = serde_json::from_str::<serde_json::Value>(body) {
                            match sub.get("status").and_then(|s| s.as_str()) {
                                Some("completed") => completed += 1,
                                Some("in_progress") => in_progress += 1,
                                _ => {}
                            }
                        }
                    }
                }
            }
            let percent = if total > 0 { completed * 100 / total } else { 0 };
            let progress = serde_json::json!({
                "completed": completed,
                "inProgress": in_progress,
                "total": total,
                "percent": percent,
                "updatedAt": now,
            })
            .to_string();
            inner.hash(&dkey, clock_now)?.insert("progress".into(), progress);
            Ok(ScriptReply::Array(vec![
                ScriptReply::Int(completed as i64),
                ScriptReply::Int(in_progress as i64),
                ScriptReply::Int(total as i64),
                ScriptReply::Int(percent as i64),
            ]))
        }
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
