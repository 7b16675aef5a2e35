// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background job scheduler, coordinated by a single leader.
//!
//! Leadership is a KV lock with a TTL renewed every tick; non-leaders
//! idle. Jobs run on their own cadences tracked against the shared
//! clock, so a test can drive the scheduler tick-by-tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cb_core::{ClockHandle, KernelError};
use cb_kv::{ops, KvError, KvStore, LeaderState};

use crate::instances::InstanceManager;
use crate::metrics;

fn dep(err: KvError) -> KernelError {
    KernelError::dependency(err.to_string())
}

/// Cadences of the periodic jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIntervals {
    /// Failed-instance sweep
    pub sweep: Duration,
    /// Metric aggregation
    pub metrics: Duration,
    /// Cache eviction scan
    pub cache_scan: Duration,
    /// Expired snapshot cleanup
    pub snapshot_cleanup: Duration,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            sweep: Duration::from_secs(5),
            metrics: Duration::from_secs(30),
            cache_scan: Duration::from_secs(60),
            snapshot_cleanup: Duration::from_secs(300),
        }
    }
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub leader: bool,
    /// Instances taken OFFLINE by the sweep
    pub swept: Vec<String>,
    /// Events with newly folded metrics
    pub metrics_folded: u64,
    /// Orphaned cache entries deleted
    pub cache_evicted: u64,
    /// Orphaned snapshots deleted
    pub snapshots_cleaned: u64,
}

#[derive(Default)]
struct LastRuns {
    sweep: u64,
    metrics: u64,
    cache_scan: u64,
    snapshot_cleanup: u64,
}

/// Leader-coordinated periodic jobs.
pub struct Scheduler {
    kv: Arc<dyn KvStore>,
    clock: ClockHandle,
    instances: InstanceManager,
    holder: String,
    intervals: JobIntervals,
    last_runs: Mutex<LastRuns>,
}

impl Scheduler {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: ClockHandle,
        instances: InstanceManager,
        holder: impl Into<String>,
        intervals: JobIntervals,
    ) -> Self {
        Self {
            kv,
            clock,
            instances,
            holder: holder.into(),
            intervals,
            last_runs: Mutex::new(LastRuns::default()),
        }
    }

    fn leader_ttl_ms(&self) -> u64 {
        (self.intervals.sweep.as_millis() as u64)
            .saturating_mul(3)
            .max(1_000)
    }

    /// One pass: (re)acquire leadership and run whichever jobs are due.
    pub async fn tick(&self) -> Result<TickReport, KernelError> {
        let mut report = TickReport::default();
        let held = ops::leader_acquire(self.kv.as_ref(), &self.holder, self.leader_ttl_ms())
            .await
            .map_err(dep)?;
        if held != LeaderState::Held {
            debug!(holder = %self.holder, "not the scheduler leader this tick");
            return Ok(report);
        }
        report.leader = true;

        let now = self.clock.epoch_ms();
        let due = |last: u64, every: Duration| now.saturating_sub(last) >= every.as_millis() as u64;

        let run_sweep = { due(self.last_runs.lock().sweep, self.intervals.sweep) };
        if run_sweep {
            report.swept = self.instances.sweep().await?;
            self.last_runs.lock().sweep = now;
        }

        let run_metrics = { due(self.last_runs.lock().metrics, self.intervals.metrics) };
        if run_metrics {
            report.metrics_folded = metrics::aggregate(self.kv.as_ref()).await.map_err(dep)?;
            self.last_runs.lock().metrics = now;
        }

        let run_cache = { due(self.last_runs.lock().cache_scan, self.intervals.cache_scan) };
        if run_cache {
            report.cache_evicted = self.evict_orphans("cb:cache:*").await?;
            self.last_runs.lock().cache_scan = now;
        }

        let run_snapshots =
            { due(self.last_runs.lock().snapshot_cleanup, self.intervals.snapshot_cleanup) };
        if run_snapshots {
            report.snapshots_cleaned = self.evict_orphans("cb:snapshot:*").await?;
            self.last_runs.lock().snapshot_cleanup = now;
        }

        Ok(report)
    }

    /// Delete keys under `pattern` that lost their TTL (the store expires
    /// the rest on its own).
    async fn evict_orphans(&self, pattern: &str) -> Result<u64, KernelError> {
        let keys = self.kv.scan(pattern).await.map_err(dep)?;
        let mut evicted = 0;
        for key in keys {
            if self.kv.pttl(&key).await.map_err(dep)? == -1 {
                self.kv.del(&key).await.map_err(dep)?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Run ticks on the sweep cadence until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(holder = %self.holder, "scheduler started");
        let mut interval = tokio::time::interval(self.intervals.sweep);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!("scheduler tick failed: {}", err.message);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
