// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hook.*`: agent lifecycle hooks feeding the session processor.
//!
//! Output shapes are contract-fixed: `pre_tool` returns
//! `{allow, reason?, modified?}`, `post_tool` returns `{processed}` of
//! any type, `todo_write` and `user_prompt` return a strict boolean
//! `processed`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cb_core::KernelError;
use cb_kernel::{CallCtx, EventHandler, HandlerDescriptor, Kernel};

/// Command substrings the tool-policy refuses outright.
const BLOCKED_COMMAND_PATTERNS: [&str; 3] = ["rm -rf /", "mkfs", "> /dev/sda"];

pub(super) fn register(kernel: &Kernel) -> Result<(), KernelError> {
    let registry = kernel.registry();
    registry.register(
        HandlerDescriptor::builder("hook.pre_tool", PreTool)
            .summary("Tool-use policy gate")
            .persist()
            .quota(600)
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("hook.post_tool", PostTool)
            .summary("Tool-result observation")
            .persist()
            .quota(600)
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("hook.user_prompt", UserPrompt)
            .summary("User prompt observation")
            .persist()
            .quota(600)
            .build(),
    )?;
    registry.register(
        HandlerDescriptor::builder("hook.todo_write", TodoWrite)
            .summary("Todo list replacement")
            .persist()
            .quota(600)
            .build(),
    )?;
    Ok(())
}

// ── hook.pre_tool ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PreToolInput {
    tool: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct PreToolOutput {
    allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<Value>,
}

struct PreTool;

#[async_trait]
impl EventHandler for PreTool {
    type Input = PreToolInput;
    type Output = PreToolOutput;

    async fn handle(
        &self,
        input: PreToolInput,
        _ctx: Arc<CallCtx>,
    ) -> Result<PreToolOutput, KernelError> {
        if input.tool.is_empty() {
            return Err(KernelError::invalid_input("tool name must be non-empty"));
        }
        let command = input
            .params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("");
        for pattern in BLOCKED_COMMAND_PATTERNS {
            if command.contains(pattern) {
                return Ok(PreToolOutput {
                    allow: false,
                    reason: Some(format!("command matches blocked pattern {pattern:?}")),
                    modified: None,
                });
            }
        }
        Ok(PreToolOutput { allow: true, reason: None, modified: None })
    }
}

// ── hook.post_tool ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PostToolInput {
    tool: String,
    #[serde(default)]
    result: Value,
}

#[derive(Serialize)]
struct PostToolOutput {
    /// Any type per the hook contract: the observed result rides along
    processed: Value,
}

struct PostTool;

#[async_trait]
impl EventHandler for PostTool {
    type Input = PostToolInput;
    type Output = PostToolOutput;

    async fn handle(
        &self,
        input: PostToolInput,
        _ctx: Arc<CallCtx>,
    ) -> Result<PostToolOutput, KernelError> {
        if input.tool.is_empty() {
            return Err(KernelError::invalid_input("tool name must be non-empty"));
        }
        let processed = if input.result.is_null() {
            Value::Bool(true)
        } else {
            serde_json::json!({"tool": input.tool, "observed": input.result})
        };
        Ok(PostToolOutput { processed })
    }
}

// ── hook.user_prompt ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct UserPromptInput {
    prompt: String,
}

#[derive(Serialize)]
struct UserPromptOutput {
    processed: bool,
}

struct UserPrompt;

#[async_trait]
impl EventHandler for UserPrompt {
    type Input = UserPromptInput;
    type Output = UserPromptOutput;

    async fn handle(
        &self,
        input: UserPromptInput,
        _ctx: Arc<CallCtx>,
    ) -> Result<UserPromptOutput, KernelError> {
        if input.prompt.is_empty() {
            return Err(KernelError::invalid_input("prompt must be non-empty"));
        }
        Ok(UserPromptOutput { processed: true })
    }
}

// ── hook.todo_write ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TodoWriteInput {
    todos: Vec<Value>,
}

#[derive(Serialize)]
struct TodoWriteOutput {
    /// Strictly boolean per the hook contract
    processed: bool,
}

struct TodoWrite;

#[async_trait]
impl EventHandler for TodoWrite {
    type Input = TodoWriteInput;
    type Output = TodoWriteOutput;

    async fn handle(
        &self,
        input: TodoWriteInput,
        _ctx: Arc<CallCtx>,
    ) -> Result<TodoWriteOutput, KernelError> {
        for todo in &input.todos {
            if !todo.is_object() {
                return Err(KernelError::invalid_input("todos must be objects"));
            }
        }
        Ok(TodoWriteOutput { processed: true })
    }
}
