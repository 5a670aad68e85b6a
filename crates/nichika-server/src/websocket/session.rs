//! WebSocket session lifecycle: one connected peer from upgrade through
//! disconnect.
//!
//! Each session runs two pumps. The write pump drains the client's
//! [`Outbox`] into the socket and owns the heartbeat; the read pump submits
//! inbound frames to the hub. Whichever finishes first ends the session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use nichika_hub::{Client, ClientId, HubHandle, Outbox};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{Liveness, SlotGuard};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_FRAMES_RECEIVED_TOTAL,
};

/// Heartbeat timing for a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionTiming {
    /// Ping period.
    pub ping_interval: Duration,
    /// Silence allowed before the peer is dropped.
    pub pong_timeout: Duration,
}

/// Why the write pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteEnd {
    /// The hub closed the buffer (eviction, unregister or hub shutdown).
    OutboxClosed,
    /// A socket write failed.
    WriteFailed,
    /// The peer missed too many pings.
    TimedOut,
    /// Server shutdown.
    Cancelled,
}

impl WriteEnd {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutboxClosed => "outbox_closed",
            Self::WriteFailed => "write_failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Why the read pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEnd {
    /// The peer sent a Close frame or the stream ended.
    PeerClosed,
    /// The socket reported an error (including oversized frames).
    ReadFailed,
    /// The hub stopped accepting broadcasts.
    HubClosed,
}

impl ReadEnd {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadFailed => "read_failed",
            Self::HubClosed => "hub_closed",
        }
    }
}

/// Run a WebSocket session for an upgraded connection.
///
/// 1. Registers a [`Client`] for the peer with the hub
/// 2. Runs the write and read pumps concurrently
/// 3. When either pump ends, aborts the other and unregisters the client
#[instrument(skip_all, fields(origin = %origin))]
pub async fn run_ws_session(
    ws: WebSocket,
    origin: SocketAddr,
    hub: HubHandle,
    timing: SessionTiming,
    shutdown: CancellationToken,
    slot: SlotGuard,
) {
    let (client, outbox) = Client::new(origin.to_string(), hub.client_buffer());
    let client_id = client.id().clone();
    let liveness = Arc::new(Liveness::new());
    if hub.register(client).await.is_err() {
        warn!("hub stopped before the client could register");
        return;
    }

    info!(client_id = %client_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, ws_rx) = ws.split();
    let cancel = shutdown.child_token();

    let mut writer = tokio::spawn(write_pump(
        ws_tx,
        outbox,
        Arc::clone(&liveness),
        timing,
        cancel.clone(),
    ));
    let mut reader = tokio::spawn(read_pump(
        ws_rx,
        hub.clone(),
        Arc::clone(&liveness),
        client_id.clone(),
    ));

    let reason = tokio::select! {
        end = &mut writer => end.map_or("write_panicked", WriteEnd::as_str),
        end = &mut reader => end.map_or("read_panicked", ReadEnd::as_str),
    };
    cancel.cancel();
    writer.abort();
    reader.abort();

    // No-op when the hub already evicted this client.
    let _ = hub.unregister(&client_id).await;

    info!(client_id = %client_id, reason, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(liveness.age().as_secs_f64());
    drop(slot);
}

/// Frame a hub payload: text when it is valid UTF-8, binary otherwise.
pub fn frame_for(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}

async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbox: Outbox,
    liveness: Arc<Liveness>,
    timing: SessionTiming,
    cancel: CancellationToken,
) -> WriteEnd {
    let mut ping_interval = tokio::time::interval(timing.ping_interval);
    // Skip the immediate first tick.
    let _ = ping_interval.tick().await;

    let heartbeat = run_heartbeat(
        Arc::clone(&liveness),
        timing.ping_interval,
        timing.pong_timeout,
        cancel.clone(),
    );
    tokio::pin!(heartbeat);

    let end = loop {
        tokio::select! {
            payload = outbox.recv() => {
                match payload {
                    Some(payload) => {
                        if ws_tx.send(frame_for(payload)).await.is_err() {
                            break WriteEnd::WriteFailed;
                        }
                    }
                    None => break WriteEnd::OutboxClosed,
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break WriteEnd::WriteFailed;
                }
            }
            result = &mut heartbeat => {
                break match result {
                    HeartbeatResult::TimedOut => {
                        warn!(
                            timeout = ?timing.pong_timeout,
                            silent_for = ?liveness.last_seen_elapsed(),
                            "client unresponsive, disconnecting"
                        );
                        WriteEnd::TimedOut
                    }
                    HeartbeatResult::Cancelled => WriteEnd::Cancelled,
                };
            }
        }
    };

    let close = match end {
        WriteEnd::OutboxClosed => Some((close_code::NORMAL, "closed by server")),
        WriteEnd::Cancelled => Some((close_code::AWAY, "server shutting down")),
        WriteEnd::TimedOut => Some((close_code::POLICY, "heartbeat timeout")),
        WriteEnd::WriteFailed => None,
    };
    if let Some((code, reason)) = close {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
    }
    end
}

async fn read_pump(
    mut ws_rx: SplitStream<WebSocket>,
    hub: HubHandle,
    liveness: Arc<Liveness>,
    client_id: ClientId,
) -> ReadEnd {
    while let Some(frame) = ws_rx.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => Bytes::from(text),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                liveness.mark_alive();
                continue;
            }
            Ok(Message::Close(_)) => {
                debug!(client_id = %client_id, "client sent close frame");
                return ReadEnd::PeerClosed;
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "websocket read failed");
                return ReadEnd::ReadFailed;
            }
        };

        liveness.mark_alive();
        counter!(WS_FRAMES_RECEIVED_TOTAL).increment(1);
        if hub.broadcast(payload).await.is_err() {
            return ReadEnd::HubClosed;
        }
    }
    ReadEnd::PeerClosed
}
