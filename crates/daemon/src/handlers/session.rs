// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `session.*`: condensed views, replay, snapshots.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cb_core::{KernelError, SessionContext, SessionEventRecord, Snapshot, SnapshotReason};
use cb_kernel::{CallCtx, EventHandler, HandlerDescriptor, Kernel, REPLAY_MAX};

pub(super) fn register(kernel: &Kernel) -> Result<(), KernelError> {
    let registry = kernel.registry();
    registry.register(
        HandlerDescriptor::builder("session.state.get", StateGet)
            .summary("Condensed session view")
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("session.rehydrate", Rehydrate)
            .summary("Replay session events for resumption")
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("session.snapshot.create", SnapshotCreate)
            .summary("Capture a session snapshot")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("session.snapshot.restore", SnapshotRestore)
            .summary("Restore a snapshot over the live view")
            .build(),
    )?;
    Ok(())
}

// ── session.state.get ────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateGetInput {
    session_id: String,
    /// When false, recent stream entries ride along with the view
    #[serde(default = "default_true")]
    condensed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateGetOutput {
    #[serde(flatten)]
    context: SessionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<SessionEventRecord>>,
}

struct StateGet;

#[async_trait]
impl EventHandler for StateGet {
    type Input = StateGetInput;
    type Output = StateGetOutput;

    async fn handle(
        &self,
        input: StateGetInput,
        ctx: Arc<CallCtx>,
    ) -> Result<StateGetOutput, KernelError> {
        let sessions = ctx.kernel().sessions();
        let context = sessions.context(&input.session_id).await?;
        let events = if input.condensed {
            None
        } else {
            Some(sessions.replay(&input.session_id, None, 50).await?)
        };
        Ok(StateGetOutput { context, events })
    }
}

// ── session.rehydrate ────────────────────────────────────────────────────

fn default_count() -> u64 {
    100
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RehydrateInput {
    session_id: String,
    #[serde(default)]
    after_ms: Option<u64>,
    #[serde(default = "default_count")]
    count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RehydrateOutput {
    context: SessionContext,
    events: Vec<SessionEventRecord>,
}

struct Rehydrate;

#[async_trait]
impl EventHandler for Rehydrate {
    type Input = RehydrateInput;
    type Output = RehydrateOutput;

    async fn handle(
        &self,
        input: RehydrateInput,
        ctx: Arc<CallCtx>,
    ) -> Result<RehydrateOutput, KernelError> {
        let sessions = ctx.kernel().sessions();
        let context = sessions.context(&input.session_id).await?;
        let events = sessions
            .replay(&input.session_id, input.after_ms, input.count.min(REPLAY_MAX))
            .await?;
        Ok(RehydrateOutput { context, events })
    }
}

// ── snapshots ────────────────────────────────────────────────────────────

fn default_reason() -> SnapshotReason {
    SnapshotReason::Manual
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotCreateInput {
    session_id: String,
    #[serde(default = "default_reason")]
    reason: SnapshotReason,
}

struct SnapshotCreate;

#[async_trait]
impl EventHandler for SnapshotCreate {
    type Input = SnapshotCreateInput;
    type Output = Snapshot;

    async fn handle(
        &self,
        input: SnapshotCreateInput,
        ctx: Arc<CallCtx>,
    ) -> Result<Snapshot, KernelError> {
        ctx.kernel()
            .sessions()
            .create_snapshot(&input.session_id, input.reason)
            .await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRestoreInput {
    session_id: String,
    snapshot_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRestoreOutput {
    context: SessionContext,
}

struct SnapshotRestore;

#[async_trait]
impl EventHandler for SnapshotRestore {
    type Input = SnapshotRestoreInput;
    type Output = SnapshotRestoreOutput;

    async fn handle(
        &self,
        input: SnapshotRestoreInput,
        ctx: Arc<CallCtx>,
    ) -> Result<SnapshotRestoreOutput, KernelError> {
        let context = ctx
            .kernel()
            .sessions()
            .restore_snapshot(&input.session_id, &input.snapshot_id)
            .await?;
        Ok(SnapshotRestoreOutput { context })
    }
}
