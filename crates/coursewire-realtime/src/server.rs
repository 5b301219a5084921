// Accept loop and per-connection sessions
//
// The original reactor shape (one readiness wait multiplexing the listener,
// every client socket, and the poll timers) maps onto the async runtime as
// one task per connection: each task owns its socket, buffer, and cursors
// outright and multiplexes its own reads against its own poll ticks, so
// there is no cross-connection shared mutable state beyond the registry and
// the pooled database handle.

use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use coursewire_core::{ChangeLogSource, SessionStore, TaAssignmentSource};

use crate::config::Config;
use crate::connection::ConnectionState;
use crate::handshake::{self, Negotiation, Rejection};
use crate::poller;
use crate::protocol::{self, Opcode};
use crate::registry::{ConnectionInfo, Registry};

/// Change-log polls run no more often than this per connection.
pub const CHANGE_POLL_INTERVAL: Duration = Duration::from_millis(300);
/// TA-assignment polls run no more often than this per connection.
pub const TA_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Server-initiated keepalive ping cadence; idle checks piggyback on it.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Bytes buffered while waiting for a complete frame before the client is
/// closed with 1009. Clients only ever send control frames, so anything near
/// this limit is not a well-behaved client.
const MAX_CLIENT_BUFFER: usize = 32 * 1024;
/// Upper bound on the upgrade request head.
const MAX_HANDSHAKE_BUFFER: usize = 16 * 1024;
const READ_CHUNK: usize = 8192;

/// The pluggable backends a server runs against.
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub change_log: Arc<dyn ChangeLogSource>,
    pub ta_assignments: Arc<dyn TaAssignmentSource>,
}

struct Shared {
    config: Config,
    stores: Stores,
    registry: Registry,
    next_id: AtomicU64,
    shutdown: broadcast::Sender<()>,
}

pub struct RealtimeServer {
    shared: Arc<Shared>,
}

impl RealtimeServer {
    pub fn new(config: Config, stores: Stores) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                config,
                stores,
                registry: Registry::new(),
                next_id: AtomicU64::new(1),
                shutdown,
            }),
        }
    }

    /// Sending on this channel stops the accept loop and closes out every
    /// live connection.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shared.shutdown.clone()
    }

    pub async fn connection_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Bind and serve until shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.shared.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind realtime server on {addr}"))?;
        info!(%addr, "realtime server listening");
        self.serve(listener).await
    }

    /// Serve an already-bound listener; tests bind an ephemeral port first.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shared.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                            debug!(id, %peer, "connection accepted");
                            tokio::spawn(handle_connection(self.shared.clone(), socket, id));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        info!("realtime server shutting down");
        // connection tasks close out on the same shutdown broadcast
        let deadline = Instant::now() + Duration::from_secs(1);
        while !self.shared.registry.is_empty().await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }
}

async fn handle_connection(shared: Arc<Shared>, mut stream: TcpStream, id: u64) {
    // a connection stuck mid-handshake must not occupy a slot forever
    let handshake = timeout(
        shared.config.handshake_timeout,
        perform_handshake(&shared, &mut stream),
    )
    .await;

    let (accepted, residual) = match handshake {
        Ok(Some(outcome)) => outcome,
        Ok(None) => return,
        Err(_) => {
            debug!(id, "handshake deadline elapsed");
            return;
        }
    };

    run_session(shared, stream, id, accepted, residual).await;
}

/// Read until the header block is complete, then negotiate. Returns the
/// accepted connection plus any bytes the client pipelined behind the
/// request head, which replay as the first frame data.
async fn perform_handshake(
    shared: &Shared,
    stream: &mut TcpStream,
) -> Option<(handshake::Accepted, Vec<u8>)> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    let head_end = loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => n,
        };
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(end) = handshake::find_header_end(&buffer) {
            break end;
        }
        if buffer.len() > MAX_HANDSHAKE_BUFFER {
            let response = Rejection::bad_request("Request header too large.").into_response();
            let _ = stream.write_all(&response).await;
            let _ = stream.shutdown().await;
            return None;
        }
    };

    let client_count = shared.registry.len().await;
    let negotiation = handshake::negotiate(
        &buffer[..head_end],
        &shared.config.handshake_config(),
        shared.stores.sessions.as_ref(),
        client_count,
    )
    .await;

    match negotiation {
        Negotiation::Upgrade(accepted) => {
            if stream.write_all(&accepted.response).await.is_err() {
                return None;
            }
            let residual = buffer[head_end..].to_vec();
            Some((*accepted, residual))
        }
        Negotiation::Respond(response) => {
            let _ = stream.write_all(&response).await;
            let _ = stream.shutdown().await;
            None
        }
    }
}

#[derive(PartialEq)]
enum Disposition {
    Continue,
    Close,
}

async fn run_session(
    shared: Arc<Shared>,
    stream: TcpStream,
    id: u64,
    accepted: handshake::Accepted,
    residual: Vec<u8>,
) {
    let mut conn = ConnectionState::new(id, accepted);
    info!(
        id,
        user_id = conn.user.user_id,
        channels = %conn
            .subscription
            .channels()
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(","),
        course_id = ?conn.subscription.course_id,
        room_id = ?conn.subscription.room_id,
        "client connected"
    );
    shared
        .registry
        .add(
            id,
            ConnectionInfo {
                user_id: conn.user.user_id,
            },
        )
        .await;

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = residual;
    let mut chunk = [0u8; READ_CHUNK];

    // both poll timers are stamped to "now", so each source is first polled
    // after one full interval rather than immediately
    let start = Instant::now();
    let mut change_ticks = interval_at(start + CHANGE_POLL_INTERVAL, CHANGE_POLL_INTERVAL);
    let mut ta_ticks = interval_at(start + TA_POLL_INTERVAL, TA_POLL_INTERVAL);
    let mut heartbeat = interval_at(start + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    change_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ta_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let change_enabled = !conn.subscription.change_channels().is_empty();
    let ta_enabled = conn.subscription.ta_enabled();
    let mut last_activity = Instant::now();
    let mut shutdown_rx = shared.shutdown.subscribe();

    // frames the client pipelined behind the upgrade request
    let pipelined = if buffer.is_empty() {
        Disposition::Continue
    } else {
        dispatch_frames(&mut buffer, &mut writer).await
    };

    if pipelined == Disposition::Continue {
        loop {
            tokio::select! {
                read = reader.read(&mut chunk) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            last_activity = Instant::now();
                            buffer.extend_from_slice(&chunk[..n]);
                            if buffer.len() > MAX_CLIENT_BUFFER {
                                let _ = writer
                                    .write_all(&protocol::encode_close(1009, "message too big"))
                                    .await;
                                break;
                            }
                            if dispatch_frames(&mut buffer, &mut writer).await
                                == Disposition::Close
                            {
                                break;
                            }
                        }
                    }
                }
                _ = change_ticks.tick(), if change_enabled => {
                    let messages =
                        poller::poll_change_log(&mut conn, shared.stores.change_log.as_ref())
                            .await;
                    if send_text_frames(&mut writer, messages).await.is_err() {
                        break;
                    }
                }
                _ = ta_ticks.tick(), if ta_enabled => {
                    let messages = poller::poll_ta_assignments(
                        &mut conn,
                        shared.stores.ta_assignments.as_ref(),
                    )
                    .await;
                    if send_text_frames(&mut writer, messages).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if last_activity.elapsed() >= shared.config.idle_timeout {
                        debug!(id, user_id = conn.user.user_id, "closing idle client");
                        let _ = writer
                            .write_all(&protocol::encode_close(1001, "idle timeout"))
                            .await;
                        break;
                    }
                    if writer
                        .write_all(&protocol::encode_frame(b"", Opcode::Ping))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = writer
                        .write_all(&protocol::encode_close(1001, "server shutting down"))
                        .await;
                    break;
                }
            }
        }
    }

    shared.registry.remove(id).await;
    info!(id, user_id = conn.user.user_id, "client disconnected");
}

/// Extract and answer every complete frame in the buffer. Close means the
/// close reply (if any) has been written and the connection is done.
async fn dispatch_frames(buffer: &mut Vec<u8>, writer: &mut OwnedWriteHalf) -> Disposition {
    while let Some(frame) = protocol::parse_frame(buffer) {
        match frame.opcode {
            Opcode::Close => {
                let _ = writer.write_all(&protocol::encode_close(1000, "")).await;
                return Disposition::Close;
            }
            Opcode::Ping => {
                if writer
                    .write_all(&protocol::encode_frame(&frame.payload, Opcode::Pong))
                    .await
                    .is_err()
                {
                    return Disposition::Close;
                }
            }
            // server-push protocol: client data frames carry nothing we use
            _ => {}
        }
    }
    Disposition::Continue
}

async fn send_text_frames(
    writer: &mut OwnedWriteHalf,
    messages: Vec<String>,
) -> std::io::Result<()> {
    for message in messages {
        writer
            .write_all(&protocol::encode_frame(message.as_bytes(), Opcode::Text))
            .await?;
    }
    Ok(())
}
