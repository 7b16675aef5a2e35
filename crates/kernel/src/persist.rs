// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relational store seam.
//!
//! The KV store is authoritative; the relational store is a best-effort
//! secondary sink. Failures here are logged by the pipeline and never
//! abort a call.

use async_trait::async_trait;
use thiserror::Error;

use cb_core::{SessionEventRecord, Task};

/// Relational persistence failure (swallowed at the pipeline seam).
#[derive(Debug, Error)]
#[error("relational store error: {0}")]
pub struct PersistError(pub String);

/// Secondary durable sink for session events and task records.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn record_event(
        &self,
        session_id: &str,
        record: &SessionEventRecord,
    ) -> Result<(), PersistError>;

    async fn record_task(&self, task: &Task) -> Result<(), PersistError>;
}

/// Default sink when `DB_URL` is unset.
pub struct NoopStore;

#[async_trait]
impl RelationalStore for NoopStore {
    async fn record_event(
        &self,
        _session_id: &str,
        _record: &SessionEventRecord,
    ) -> Result<(), PersistError> {
        Ok(())
    }

    async fn record_task(&self, _task: &Task) -> Result<(), PersistError> {
        Ok(())
    }
}
