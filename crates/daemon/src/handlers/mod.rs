// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reference handler set: system, task, session, and hook methods, all
//! written as consumers of kernel contracts.

mod hook;
mod session;
mod system;
mod task;

use cb_core::KernelError;
use cb_kernel::Kernel;

/// Register every built-in handler. Called once at startup, before the
/// registry is frozen.
pub fn register_all(kernel: &Kernel) -> Result<(), KernelError> {
    system::register(kernel)?;
    task::register(kernel)?;
    session::register(kernel)?;
    hook::register(kernel)?;
    Ok(())
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
