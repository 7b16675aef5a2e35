// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon tests.

use std::sync::Arc;

use cb_core::{Config, FakeClock};
use cb_kernel::{Kernel, NoopStore};
use cb_kv::MemoryKv;

use crate::handlers;

/// Kernel with the full reference handler set over an in-memory store.
pub(crate) fn test_kernel() -> (Kernel, FakeClock) {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let kv = Arc::new(MemoryKv::new(Arc::new(clock.clone())));
    let kernel = Kernel::new(
        Config::default(),
        kv,
        Arc::new(clock.clone()),
        Arc::new(NoopStore),
        "cbd-test",
    );
    handlers::register_all(&kernel).unwrap();
    kernel.registry().freeze();
    (kernel, clock)
}
