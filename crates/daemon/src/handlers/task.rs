// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `task.*`: CRUD, assignment, completion, attachments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cb_core::{AttachmentType, EventEnvelope, KernelError, Task, TaskAttachment, TaskStatus};
use cb_kernel::{
    AssignmentRecord, CallCtx, CompletionRecord, EventHandler, HandlerDescriptor, Kernel,
    DEFAULT_CAPACITY,
};

pub(super) fn register(kernel: &Kernel) -> Result<(), KernelError> {
    let registry = kernel.registry();
    registry.register(
        HandlerDescriptor::builder("task.create", Create)
            .summary("Create a pending task")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.get", Get).summary("Fetch one task").build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.list", List)
            .summary("List pending tasks by priority")
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.update", Update)
            .summary("Update task fields")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.assign", Assign)
            .summary("Assign a task to an instance")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.complete", Complete)
            .summary("Complete an assigned task")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.fail", Fail)
            .summary("Mark a task failed")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.cancel", Cancel)
            .summary("Cancel a task")
            .persist()
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.attach", Attach)
            .summary("Write a keyed attachment")
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.attachments.get", AttachmentGet)
            .summary("Fetch one attachment")
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("task.attachments.list", AttachmentList)
            .summary("List attachment keys")
            .build(),
    )?;
    Ok(())
}

// ── task.create ──────────────────────────────────────────────────────────

fn default_priority() -> u8 {
    50
}

#[derive(Deserialize)]
struct CreateInput {
    text: String,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

struct Create;

#[async_trait]
impl EventHandler for Create {
    type Input = CreateInput;
    type Output = Task;

    async fn handle(&self, input: CreateInput, ctx: Arc<CallCtx>) -> Result<Task, KernelError> {
        if input.text.is_empty() {
            return Err(KernelError::invalid_input("task text must be non-empty"));
        }
        if input.priority > 100 {
            return Err(KernelError::invalid_input("priority must be 0–100"));
        }
        let task = ctx
            .kernel()
            .queue()
            .create(&input.text, input.priority, input.metadata)
            .await?;
        ctx.publish(EventEnvelope::new(
            "task.created",
            serde_json::json!({"taskId": task.id, "priority": task.priority}),
        ));
        Ok(task)
    }
}

// ── task.get / task.list ─────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetInput {
    task_id: String,
}

struct Get;

#[async_trait]
impl EventHandler for Get {
    type Input = GetInput;
    type Output = Task;

    async fn handle(&self, input: GetInput, ctx: Arc<CallCtx>) -> Result<Task, KernelError> {
        ctx.kernel()
            .queue()
            .get(&input.task_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("task {}", input.task_id)))
    }
}

fn default_limit() -> u64 {
    50
}

#[derive(Deserialize)]
struct ListInput {
    #[serde(default = "default_limit")]
    limit: u64,
}

#[derive(Serialize)]
struct ListOutput {
    tasks: Vec<Task>,
}

struct List;

#[async_trait]
impl EventHandler for List {
    type Input = ListInput;
    type Output = ListOutput;

    async fn handle(&self, input: ListInput, ctx: Arc<CallCtx>) -> Result<ListOutput, KernelError> {
        let queue = ctx.kernel().queue();
        let pending = queue.pending(input.limit).await?;
        let mut tasks = Vec::with_capacity(pending.len());
        for (id, _priority) in pending {
            if let Some(task) = queue.get(&id).await? {
                tasks.push(task);
            }
        }
        Ok(ListOutput { tasks })
    }
}

// ── task.update ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateInput {
    task_id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    metadata: Option<HashMap<String, Value>>,
}

struct Update;

#[async_trait]
impl EventHandler for Update {
    type Input = UpdateInput;
    type Output = Task;

    async fn handle(&self, input: UpdateInput, ctx: Arc<CallCtx>) -> Result<Task, KernelError> {
        let task = ctx
            .kernel()
            .queue()
            .update(
                &input.task_id,
                input.text.as_deref(),
                input.priority,
                input.metadata,
            )
            .await?;
        ctx.publish(EventEnvelope::new(
            "task.updated",
            serde_json::json!({"taskId": task.id}),
        ));
        Ok(task)
    }
}

// ── task.assign ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignInput {
    task_id: String,
    instance_id: String,
}

struct Assign;

#[async_trait]
impl EventHandler for Assign {
    type Input = AssignInput;
    type Output = AssignmentRecord;

    async fn handle(
        &self,
        input: AssignInput,
        ctx: Arc<CallCtx>,
    ) -> Result<AssignmentRecord, KernelError> {
        let kernel = ctx.kernel();
        let instance = kernel
            .instances()
            .get(&input.instance_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("instance {}", input.instance_id)))?;
        if !instance.status.accepts_work() {
            return Err(KernelError::conflict(format!(
                "instance {} is {}",
                instance.id,
                instance.status.as_str()
            )));
        }
        let record = kernel
            .queue()
            .assign(&input.task_id, &input.instance_id, DEFAULT_CAPACITY)
            .await?;
        ctx.publish(EventEnvelope::new(
            "task.assigned",
            serde_json::json!({
                "taskId": record.task_id,
                "instanceId": &record.instance_id,
                "assignedAt": &record.assigned_at,
            }),
        ));
        Ok(record)
    }
}

// ── task.complete ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteInput {
    task_id: String,
    instance_id: String,
}

struct Complete;

#[async_trait]
impl EventHandler for Complete {
    type Input = CompleteInput;
    type Output = CompletionRecord;

    async fn handle(
        &self,
        input: CompleteInput,
        ctx: Arc<CallCtx>,
    ) -> Result<CompletionRecord, KernelError> {
        let record = ctx
            .kernel()
            .queue()
            .complete(&input.task_id, &input.instance_id)
            .await?;
        ctx.publish(EventEnvelope::new(
            "task.completed",
            serde_json::json!({
                "taskId": record.task_id,
                "instanceId": &record.instance_id,
                "durationMs": record.duration_ms,
            }),
        ));
        Ok(record)
    }
}

// ── task.fail / task.cancel ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailInput {
    task_id: String,
    reason: String,
}

struct Fail;

#[async_trait]
impl EventHandler for Fail {
    type Input = FailInput;
    type Output = Task;

    async fn handle(&self, input: FailInput, ctx: Arc<CallCtx>) -> Result<Task, KernelError> {
        let task = ctx
            .kernel()
            .queue()
            .finish_with_status(&input.task_id, TaskStatus::Failed, Some(&input.reason))
            .await?;
        ctx.publish(EventEnvelope::new(
            "task.failed",
            serde_json::json!({"taskId": task.id, "reason": input.reason}),
        ));
        Ok(task)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelInput {
    task_id: String,
}

struct Cancel;

#[async_trait]
impl EventHandler for Cancel {
    type Input = CancelInput;
    type Output = Task;

    async fn handle(&self, input: CancelInput, ctx: Arc<CallCtx>) -> Result<Task, KernelError> {
        let task = ctx
            .kernel()
            .queue()
            .finish_with_status(&input.task_id, TaskStatus::Cancelled, None)
            .await?;
        ctx.publish(EventEnvelope::new(
            "task.cancelled",
            serde_json::json!({"taskId": task.id}),
        ));
        Ok(task)
    }
}

// ── attachments ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachInput {
    task_id: String,
    key: String,
    #[serde(rename = "type")]
    kind: AttachmentType,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    mime: Option<String>,
}

struct Attach;

#[async_trait]
impl EventHandler for Attach {
    type Input = AttachInput;
    type Output = TaskAttachment;

    async fn handle(
        &self,
        input: AttachInput,
        ctx: Arc<CallCtx>,
    ) -> Result<TaskAttachment, KernelError> {
        if input.key.is_empty() {
            return Err(KernelError::invalid_input("attachment key must be non-empty"));
        }
        ctx.kernel()
            .queue()
            .attach(
                &input.task_id,
                &input.key,
                input.kind,
                input.value,
                input.content,
                input.url,
                input.mime,
            )
            .await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentGetInput {
    task_id: String,
    key: String,
}

struct AttachmentGet;

#[async_trait]
impl EventHandler for AttachmentGet {
    type Input = AttachmentGetInput;
    type Output = TaskAttachment;

    async fn handle(
        &self,
        input: AttachmentGetInput,
        ctx: Arc<CallCtx>,
    ) -> Result<TaskAttachment, KernelError> {
        ctx.kernel()
            .queue()
            .attachment(&input.task_id, &input.key)
            .await?
            .ok_or_else(|| {
                KernelError::not_found(format!(
                    "attachment {} on task {}",
                    input.key, input.task_id
                ))
            })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentListInput {
    task_id: String,
}

#[derive(Serialize)]
struct AttachmentListOutput {
    keys: Vec<String>,
}

struct AttachmentList;

#[async_trait]
impl EventHandler for AttachmentList {
    type Input = AttachmentListInput;
    type Output = AttachmentListOutput;

    async fn handle(
        &self,
        input: AttachmentListInput,
        ctx: Arc<CallCtx>,
    ) -> Result<AttachmentListOutput, KernelError> {
        let keys = ctx.kernel().queue().attachment_keys(&input.task_id).await?;
        Ok(AttachmentListOutput { keys })
    }
}
