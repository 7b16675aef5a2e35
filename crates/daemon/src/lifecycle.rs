// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: configuration, startup, shutdown.
//!
//! Startup order: KV → kernel (registry + handler discovery, frozen) →
//! bus/scheduler → transport. Teardown reverses it via one cancellation
//! token.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cb_core::{Config, ConfigError, SystemClock};
use cb_kernel::{JobIntervals, Kernel, NoopStore};
use cb_kv::{KvError, KvStore, RedisKv};

use crate::handlers;
use crate::listener::Listener;

/// Startup/shutdown failures, each mapped to a process exit code.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("KV store unreachable: {0}")]
    KvUnreachable(#[from] KvError),

    #[error("failed to bind port {0}: {1}")]
    Bind(u16, std::io::Error),

    #[error("startup error: {0}")]
    Startup(String),
}

impl LifecycleError {
    /// Exit codes: 1 configuration, 2 KV unreachable, 3 port in use.
    pub fn exit_code(&self) -> u8 {
        match self {
            LifecycleError::Config(_) | LifecycleError::Startup(_) => 1,
            LifecycleError::KvUnreachable(_) => 2,
            LifecycleError::Bind(..) => 3,
        }
    }
}

/// A running daemon: the kernel plus its background tasks.
pub struct Daemon {
    pub kernel: Kernel,
    shutdown: CancellationToken,
    listener_task: tokio::task::JoinHandle<()>,
    scheduler_task: tokio::task::JoinHandle<()>,
}

impl Daemon {
    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.shutdown.cancel();
        let _ = self.listener_task.await;
        let _ = self.scheduler_task.await;
        info!("shutdown complete");
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Bring the daemon up. Fails fast with a coded error when the KV store
/// is unreachable or the port is taken.
pub async fn startup(cfg: Config) -> Result<Daemon, LifecycleError> {
    let kv = RedisKv::connect(&cfg.kv_url).await?;
    kv.ping().await?;
    info!(kv_url = %cfg.kv_url, "KV store connected");

    if cfg.db_url.is_some() {
        // The relational seam ships with a no-op sink; a deployment wires
        // its own driver behind `RelationalStore`.
        warn!("DB_URL is set but no relational driver is built in; events stay KV-only");
    }

    let producer = format!("cbd-{}", nanoid::nanoid!(8));
    let port = cfg.port;
    let ws_path = cfg.ws_path.clone();
    let sweep = cfg.health_check_interval;
    let kernel = Kernel::new(
        cfg,
        Arc::new(kv),
        Arc::new(SystemClock),
        Arc::new(NoopStore),
        producer.clone(),
    );

    handlers::register_all(&kernel)
        .map_err(|err| LifecycleError::Startup(format!("handler registration: {err}")))?;
    kernel.registry().freeze();
    info!(
        %producer,
        methods = kernel.registry().len(),
        "registry discovered and frozen"
    );

    let tcp = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|err| LifecycleError::Bind(port, err))?;
    info!(port, "transport listening");

    let shutdown = CancellationToken::new();

    let scheduler = Arc::new(kernel.scheduler(JobIntervals {
        sweep,
        ..JobIntervals::default()
    }));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let listener = Listener::new(tcp, kernel.clone(), ws_path);
    let listener_task = tokio::spawn(listener.run(shutdown.clone()));

    Ok(Daemon { kernel, shutdown, listener_task, scheduler_task })
}
