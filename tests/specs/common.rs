// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture: a kernel with the full reference handler set over an
//! in-memory store and a controllable clock.

use std::sync::Arc;

use cb_core::{Config, FakeClock};
use cb_kernel::{Kernel, NoopStore};
use cb_kv::MemoryKv;

pub fn kernel() -> (Kernel, FakeClock) {
    let (kernel, clock) = kernel_unfrozen();
    kernel.registry().freeze();
    (kernel, clock)
}

/// Registry left open so a spec can add its own handlers first.
pub fn kernel_unfrozen() -> (Kernel, FakeClock) {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let kv = Arc::new(MemoryKv::new(Arc::new(clock.clone())));
    let kernel = Kernel::new(
        Config::default(),
        kv,
        Arc::new(clock.clone()),
        Arc::new(NoopStore),
        "cbd-spec",
    );
    cb_daemon::handlers::register_all(&kernel).unwrap();
    (kernel, clock)
}
