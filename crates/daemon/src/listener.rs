// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! One TCP listener serves both surfaces: a connection opening with an
//! HTTP `GET` is upgraded to the WebSocket subscription channel; anything
//! else speaks length-prefixed JSON-RPC frames. Connections are handled
//! in spawned tasks so the accept loop never blocks.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cb_kernel::Kernel;
use cb_wire::{read_frame, write_frame, ProtocolError};

use crate::rpc;
use crate::ws;

/// Idle read timeout on a framed connection.
const READ_TIMEOUT: Duration = Duration::from_secs(300);
/// Write timeout for responses.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept loop over the daemon's TCP port.
pub struct Listener {
    tcp: TcpListener,
    kernel: Kernel,
    ws_path: String,
}

impl Listener {
    pub fn new(tcp: TcpListener, kernel: Kernel, ws_path: impl Into<String>) -> Self {
        Self { tcp, kernel, ws_path: ws_path.into() }
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.tcp.local_addr()
    }

    /// Run until cancelled, spawning a task per connection.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(ws_path = %self.ws_path, "listener started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("listener stopped");
                    return;
                }
                accepted = self.tcp.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!(%addr, "connection accepted");
                            let kernel = self.kernel.clone();
                            let ws_path = self.ws_path.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, kernel, &ws_path).await {
                                    log_connection_error(err);
                                }
                            });
                        }
                        Err(err) => error!("accept error: {err}"),
                    }
                }
            }
        }
    }
}

fn log_connection_error(err: ProtocolError) {
    match err {
        ProtocolError::ConnectionClosed => debug!("client disconnected"),
        ProtocolError::Timeout => debug!("connection idle timeout"),
        other => error!("connection error: {other}"),
    }
}

/// Sniff the first bytes: an HTTP upgrade becomes the WebSocket channel,
/// anything else is the framed JSON-RPC surface.
async fn handle_connection(
    stream: TcpStream,
    kernel: Kernel,
    ws_path: &str,
) -> Result<(), ProtocolError> {
    let mut probe = [0u8; 4];
    let n = stream.peek(&mut probe).await?;
    if &probe[..n] == b"GET " || (n < 4 && b"GET ".starts_with(&probe[..n])) {
        ws::serve(stream, kernel, ws_path).await;
        return Ok(());
    }
    handle_framed(stream, kernel).await
}

/// Serve length-prefixed JSON-RPC until the client disconnects.
async fn handle_framed(mut stream: TcpStream, kernel: Kernel) -> Result<(), ProtocolError> {
    loop {
        let payload = match read_frame(&mut stream, READ_TIMEOUT).await {
            Ok(payload) => payload,
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(err) => return Err(err),
        };
        if let Some(response) = rpc::handle_payload(&kernel, &payload).await {
            write_frame(&mut stream, &response, WRITE_TIMEOUT).await?;
        }
    }
}
