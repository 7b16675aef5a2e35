// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for kernel tests.

use std::sync::Arc;

use cb_core::{Config, FakeClock};
use cb_kv::MemoryKv;

use crate::{Kernel, NoopStore};

/// Kernel over a fresh in-memory store and a controllable clock.
pub(crate) fn test_kernel() -> (Kernel, FakeClock) {
    test_kernel_with(Config::default())
}

pub(crate) fn test_kernel_with(cfg: Config) -> (Kernel, FakeClock) {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let kv = Arc::new(MemoryKv::new(Arc::new(clock.clone())));
    let kernel = Kernel::new(cfg, kv, Arc::new(clock.clone()), Arc::new(NoopStore), "proc-test");
    (kernel, clock)
}
