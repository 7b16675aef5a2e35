// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket subscription channel.
//!
//! Clients send `{action:"subscribe", events:[…]}` control messages and
//! receive `{type:"event", …}` frames; plain JSON-RPC payloads are also
//! accepted in text frames and answered in place.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use cb_core::{EventEnvelope, Subscription};
use cb_kernel::Kernel;
use cb_wire::{ControlMessage, EventFrame, SubscribeAck};

use crate::rpc;

/// Accept the upgrade (path-checked) and serve the connection until it
/// closes.
pub(crate) async fn serve(stream: TcpStream, kernel: Kernel, ws_path: &str) {
    let expected = ws_path.to_string();
    let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == expected {
            Ok(resp)
        } else {
            Err(ErrorResponse::new(Some("unknown path".to_string())))
        }
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!("websocket handshake failed: {err}");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let mut patterns: Vec<String> = Vec::new();
    let mut events: Option<mpsc::Receiver<EventEnvelope>> = None;

    loop {
        tokio::select! {
            incoming = source.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        debug!("websocket read error: {err}");
                        return;
                    }
                    None => return,
                };
                match message {
                    Message::Text(text) => {
                        if let Ok(control) = serde_json::from_str::<ControlMessage>(text.as_str()) {
                            apply_control(control, &mut patterns);
                            events = match resubscribe(&kernel, &patterns).await {
                                Ok(events) => events,
                                Err(err) => {
                                    warn!("subscription update failed: {err}");
                                    None
                                }
                            };
                            let ack = SubscribeAck::new(patterns.clone());
                            if send_json(&mut sink, &ack).await.is_err() {
                                return;
                            }
                        } else if let Some(response) =
                            rpc::handle_payload(&kernel, text.as_str().as_bytes()).await
                        {
                            if send_json(&mut sink, &response).await.is_err() {
                                return;
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Message::Close(_) => return,
                    _ => {}
                }
            }
            envelope = recv_event(&mut events) => {
                match envelope {
                    Some(envelope) => {
                        let frame = EventFrame::new(envelope);
                        if send_json(&mut sink, &frame).await.is_err() {
                            return;
                        }
                    }
                    // Subscriber connection dropped; wait for the client
                    // to re-subscribe.
                    None => events = None,
                }
            }
        }
    }
}

/// Fold a control message into the connection's pattern set.
pub(crate) fn apply_control(control: ControlMessage, patterns: &mut Vec<String>) {
    match control {
        ControlMessage::Subscribe { events } => {
            for event in events {
                if !patterns.contains(&event) {
                    patterns.push(event);
                }
            }
        }
        ControlMessage::Unsubscribe { events } => {
            if events.is_empty() {
                patterns.clear();
            } else {
                patterns.retain(|p| !events.contains(p));
            }
        }
    }
}

async fn resubscribe(
    kernel: &Kernel,
    patterns: &[String],
) -> Result<Option<mpsc::Receiver<EventEnvelope>>, cb_core::KernelError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let subscription = Subscription::new(patterns.iter().cloned());
    kernel.bus().subscribe(subscription).await.map(Some)
}

/// Receive from an optional subscription; pending forever when absent so
/// the select arm stays quiet.
async fn recv_event(
    events: &mut Option<mpsc::Receiver<EventEnvelope>>,
) -> Option<EventEnvelope> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_json<S, T>(sink: &mut S, value: &T) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
    T: serde::Serialize,
{
    let text = serde_json::to_string(value).map_err(|_| ())?;
    sink.send(Message::text(text)).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
