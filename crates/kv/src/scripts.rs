// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lua sources for the scripted atomic op library.
//!
//! Every script takes `now` as an argument rather than calling `TIME`, so
//! runs are deterministic and the in-memory implementation can mirror
//! them under a fake clock. Timestamps written back use `%.0f` to avoid
//! Lua's scientific notation for epoch-millisecond values.

/// Sliding-window rate limit.
/// KEYS: window zset. ARGV: now_ms, window_ms, quota, member.
/// Reply: {1, remaining} on allow, {0, retry_after_ms} on deny.
pub const RATE_LIMIT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local quota = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count < quota then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window + 1000)
  return {1, quota - count - 1}
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local retry = 0
if oldest[2] then
  retry = math.floor(tonumber(oldest[2]) + window - now)
  if retry < 0 then retry = 0 end
end
return {0, retry}
"#;

/// Circuit admission check, including OPEN→HALF_OPEN promotion and the
/// single-probe guarantee (HSETNX on the probe field).
/// KEYS: circuit hash. ARGV: now_ms.
/// Reply: {state, open_until_ms} where state ∈ closed|probe|open.
pub const CIRCUIT_ADMIT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local state = redis.call('HGET', key, 'state')
if not state then state = 'closed' end
if state == 'open' then
  local openUntil = tonumber(redis.call('HGET', key, 'openUntil') or '0')
  if now >= openUntil then
    redis.call('HSET', key, 'state', 'half_open')
    redis.call('HSET', key, 'probe', '1')
    return {'probe', 0}
  end
  return {'open', openUntil}
end
if state == 'half_open' then
  if redis.call('HSETNX', key, 'probe', '1') == 1 then
    return {'probe', 0}
  end
  local openUntil = tonumber(redis.call('HGET', key, 'openUntil') or '0')
  return {'open', openUntil}
end
return {'closed', 0}
"#;

/// Record a call outcome against the circuit state machine.
/// KEYS: circuit hash. ARGV: now_ms, ok(0|1), threshold, cooloff_ms.
/// Reply: resulting state name (closed|open).
pub const CIRCUIT_RECORD: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local ok = ARGV[2] == '1'
local threshold = tonumber(ARGV[3])
local cooloff = tonumber(ARGV[4])
local state = redis.call('HGET', key, 'state')
if not state then state = 'closed' end
if ok then
  if state == 'half_open' then
    redis.call('HSET', key, 'state', 'closed', 'failures', '0')
    redis.call('HDEL', key, 'probe', 'openUntil')
    return 'closed'
  end
  if state == 'open' then
    return 'open'
  end
  redis.call('HSET', key, 'failures', '0')
  return 'closed'
end
if state == 'half_open' then
  redis.call('HSET', key, 'state', 'open',
    'openUntil', string.format('%.0f', now + cooloff),
    'lastFailure', string.format('%.0f', now))
  redis.call('HDEL', key, 'probe')
  return 'open'
end
if state == 'open' then
  return 'open'
end
local failures = redis.call('HINCRBY', key, 'failures', 1)
redis.call('HSET', key, 'lastFailure', string.format('%.0f', now))
if failures >= threshold then
  redis.call('HSET', key, 'state', 'open',
    'openUntil', string.format('%.0f', now + cooloff))
  return 'open'
end
return 'closed'
"#;

/// Assign a pending task to an instance.
/// KEYS: task hash, global pending zset, instance queue zset,
///       instance priority hash, capacity counter, assignment history list.
/// ARGV: task_id, instance_id, now_ms, max_capacity, history_cap.
/// Reply: {status, …} where status ∈ ok|missing|conflict|capacity.
pub const TASK_ASSIGN: &str = r#"
local taskKey = KEYS[1]
if redis.call('EXISTS', taskKey) == 0 then
  return {'missing'}
end
local status = redis.call('HGET', taskKey, 'status')
if status ~= 'pending' then
  return {'conflict', status or ''}
end
local cap = tonumber(redis.call('GET', KEYS[5]) or '0')
local maxCap = tonumber(ARGV[4])
if cap >= maxCap then
  return {'capacity', cap}
end
local priority = tonumber(redis.call('HGET', taskKey, 'priority') or '50')
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], tonumber(ARGV[3]), ARGV[1])
redis.call('HSET', KEYS[4], ARGV[1], priority)
local newCap = redis.call('INCR', KEYS[5])
redis.call('HSET', taskKey,
  'status', 'in_progress',
  'assignedTo', ARGV[2],
  'updatedAt', string.format('%.0f', tonumber(ARGV[3])))
local record = cjson.encode({taskId = ARGV[1], instanceId = ARGV[2], assignedAt = tonumber(ARGV[3])})
redis.call('LPUSH', KEYS[6], record)
redis.call('LTRIM', KEYS[6], 0, tonumber(ARGV[5]) - 1)
return {'ok', newCap}
"#;

/// Complete an assigned task.
/// KEYS: task hash, instance queue zset, instance priority hash, capacity counter.
/// ARGV: task_id, instance_id, now_ms.
/// Reply: {status, duration_ms} where status ∈ ok|missing|not_assigned|conflict.
pub const TASK_COMPLETE: &str = r#"
local taskKey = KEYS[1]
if redis.call('EXISTS', taskKey) == 0 then
  return {'missing'}
end
local assigned = redis.call('HGET', taskKey, 'assignedTo')
if assigned ~= ARGV[2] then
  return {'not_assigned', assigned or ''}
end
local status = redis.call('HGET', taskKey, 'status')
if status == 'completed' then
  return {'conflict', status}
end
local now = tonumber(ARGV[3])
local assignedAt = redis.call('ZSCORE', KEYS[2], ARGV[1])
local duration = 0
if assignedAt then
  duration = math.floor(now - tonumber(assignedAt))
  if duration < 0 then duration = 0 end
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
local cap = tonumber(redis.call('GET', KEYS[4]) or '0')
if cap > 0 then
  redis.call('DECR', KEYS[4])
end
redis.call('HSET', taskKey,
  'status', 'completed',
  'completedAt', string.format('%.0f', now),
  'updatedAt', string.format('%.0f', now))
return {'ok', duration}
"#;

/// Move every entry of a failed instance's queue back to global pending
/// with original priorities, drop its capacity, leave a redistribution
/// marker.
/// KEYS: instance queue zset, instance priority hash, global pending zset,
///       marker key, capacity counter.
/// ARGV: now_ms, marker_ttl_ms.
/// Reply: array of moved task ids.
pub const QUEUE_REASSIGN: &str = r#"
local members = redis.call('ZRANGE', KEYS[1], 0, -1)
local moved = {}
for i, id in ipairs(members) do
  local priority = tonumber(redis.call('HGET', KEYS[2], id) or '50')
  redis.call('ZADD', KEYS[3], priority, id)
  moved[#moved + 1] = id
end
redis.call('DEL', KEYS[1], KEYS[2], KEYS[5])
redis.call('SET', KEYS[4], string.format('%.0f', tonumber(ARGV[1])))
redis.call('PEXPIRE', KEYS[4], tonumber(ARGV[2]))
return moved
"#;

/// Acquire (or re-acquire) scheduler leadership.
/// KEYS: leader key. ARGV: holder_id, ttl_ms. Reply: 1 when held.
pub const LEADER_ACQUIRE: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', tonumber(ARGV[2])) then
  return 1
end
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
  return 1
end
return 0
"#;

/// Renew leadership only while still the holder.
/// KEYS: leader key. ARGV: holder_id, ttl_ms. Reply: 1 when renewed.
pub const LEADER_RENEW: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
  return 1
end
return 0
"#;

/// Fold one event's counters into the global aggregate, tracking the
/// last folded value per field so repeated folds never double count.
/// KEYS: event counter hash, folded mirror hash, global hash.
/// Reply: number of fields that changed.
pub const METRICS_FOLD: &str = r#"
local cur = redis.call('HGETALL', KEYS[1])
local folded = 0
for i = 1, #cur, 2 do
  local field = cur[i]
  local value = tonumber(cur[i + 1]) or 0
  local prev = tonumber(redis.call('HGET', KEYS[2], field) or '0')
  local delta = value - prev
  if delta ~= 0 then
    redis.call('HINCRBY', KEYS[3], field, delta)
    redis.call('HSET', KEYS[2], field, string.format('%.0f', value))
    folded = folded + 1
  end
end
return folded
"#;

/// Insert an idempotency marker, trimming the set to its retention cap.
/// KEYS: processed zset. ARGV: event_id, now_ms, cap.
/// Reply: 1 when newly marked, 0 when already present.
pub const MARK_PROCESSED: &str = r#"
local added = redis.call('ZADD', KEYS[1], 'NX', tonumber(ARGV[2]), ARGV[1])
redis.call('ZREMRANGEBYRANK', KEYS[1], 0, -(tonumber(ARGV[3]) + 1))
return added
"#;

/// Store a decomposition record and all its subtasks in one step.
/// KEYS: decomposition hash.
/// ARGV: task_id, now_ms, decomposition_json, n, then n × (subtask_id, subtask_json).
/// Reply: number of subtasks stored.
pub const DECOMPOSITION_STORE: &str = r#"
local key = KEYS[1]
redis.call('HSET', key,
  'taskId', ARGV[1],
  'createdAt', string.format('%.0f', tonumber(ARGV[2])),
  'decomposition', ARGV[3],
  'subtaskCount', ARGV[4])
local n = tonumber(ARGV[4])
for i = 0, n - 1 do
  redis.call('HSET', key, 'subtask:' .. ARGV[5 + i * 2], ARGV[6 + i * 2])
end
return n
"#;

/// Synthesize progress over a decomposition's subtasks.
/// KEYS: decomposition hash. ARGV: now_ms.
/// Reply: {completed, in_progress, total, percent}.
pub const PROGRESS_SYNTH: &str = r#"
local all = redis.call('HGETALL', KEYS[1])
local total = 0
local completed = 0
local inProgress = 0
for i = 1, #all, 2 do
  if string.sub(all[i], 1, 8) == 'subtask:' then
    total = total + 1
    local okDecoded, sub = pcall(cjson.decode, all[i + 1])
    if okDecoded and type(sub) == 'table' and sub.status then
      if sub.status == 'completed' then completed = completed + 1 end
      if sub.status == 'in_progress' then inProgress = inProgress + 1 end
    end
  end
end
local percent = 0
if total > 0 then percent = math.floor(completed * 100 / total) end
redis.call('HSET', KEYS[1], 'progress', cjson.encode({
  completed = completed,
  inProgress = inProgress,
  total = total,
  percent = percent,
  updatedAt = tonumber(ARGV[1]),
}))
return {completed, inProgress, total, percent}
"#;
