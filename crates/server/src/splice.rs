//! The connected/spliced phase: bidirectional byte copy with
//! frame-boundary peeking for Close, heartbeat, and oversized frames.
//! Grounded on spec.md section 4.2 "Connected (splice) phase".

use std::sync::Arc;
use std::time::Duration;

use amqpprox_core::wire::constants::frame_type;
use amqpprox_core::wire::{frame, Decoded};
use amqpprox_core::CoreError;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connector::EgressConnection;
use crate::session::SessionCommand;
use crate::state::AppState;
use crate::stats::ConnectionStats;

const READ_CHUNK: usize = 65536;

/// Which side (if any) has sent a Close and is awaiting CloseOk.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Teardown {
    None,
    ClientInitiated,
    BackendInitiated,
}

pub async fn run(
    state: &Arc<AppState>,
    client: &mut TcpStream,
    mut egress: EgressConnection,
    vhost: &str,
    stats: Arc<ConnectionStats>,
    mut commands: mpsc::Receiver<SessionCommand>,
) -> Result<(), CoreError> {
    let backend = &mut egress.stream;
    let max_frame = egress.negotiated_tune.frame_max.max(1);
    let heartbeat_secs = egress.negotiated_tune.heartbeat_interval;
    let heartbeat_interval = if heartbeat_secs > 0 {
        Duration::from_secs(heartbeat_secs as u64)
    } else {
        Duration::from_secs(3600)
    };

    let mut paused = state.vhost_state.is_paused(vhost);
    let mut teardown = Teardown::None;
    // Set once a Close is observed from either side; if the peer never
    // answers with CloseOk before this elapses, the proxy tears down
    // unilaterally rather than waiting forever (spec.md section 4.2).
    let mut teardown_deadline: Option<tokio::time::Instant> = None;
    let close_timeout = Duration::from_millis(state.config.session.close_timeout_ms.max(1));
    let mut c2b_scan = BytesMut::new();
    let mut b2c_scan = BytesMut::new();
    let mut heartbeat_ticker = tokio::time::interval(heartbeat_interval);
    heartbeat_ticker.tick().await;

    let outcome = loop {
        if paused {
            tokio::select! {
                cmd = commands.recv() => {
                    match apply_command(cmd, &mut paused, client, backend, &stats).await? {
                        Some(()) => {}
                        None => break Ok(()),
                    }
                }
                _ = heartbeat_ticker.tick() => {
                    emit_heartbeat(client).await?;
                    emit_heartbeat(backend).await?;
                }
                _ = wait_teardown_deadline(teardown_deadline) => {
                    warn!(vhost, "timed out waiting for CloseOk, tearing down");
                    break Ok(());
                }
            }
            continue;
        }

        let mut client_buf = state.buffer_pool.acquire(READ_CHUNK);
        let mut backend_buf = state.buffer_pool.acquire(READ_CHUNK);

        let step = tokio::select! {
            cmd = commands.recv() => {
                match apply_command(cmd, &mut paused, client, backend, &stats).await? {
                    Some(()) => None,
                    None => Some(Ok(())),
                }
            }
            _ = heartbeat_ticker.tick() => None,
            _ = wait_teardown_deadline(teardown_deadline) => {
                warn!(vhost, "timed out waiting for CloseOk, tearing down");
                Some(Ok(()))
            }
            result = client.read(&mut client_buf) => {
                let n = result?;
                if n == 0 {
                    Some(Ok(()))
                } else {
                    backend.write_all(&client_buf[..n]).await?;
                    let frames = observe_frames(&client_buf[..n], &mut c2b_scan, max_frame, &mut teardown, Teardown::ClientInitiated)?;
                    stats.record_out(n, frames.count);
                    if teardown_deadline.is_none() && teardown != Teardown::None {
                        teardown_deadline = Some(tokio::time::Instant::now() + close_timeout);
                    }
                    if vhost_quota_exceeded(state, vhost, n) {
                        warn!(vhost, "data-rate alarm threshold crossed (client to backend)");
                    }
                    if frames.teardown_complete { Some(Ok(())) } else { None }
                }
            }
            result = backend.read(&mut backend_buf) => {
                let n = result?;
                if n == 0 {
                    Some(Ok(()))
                } else {
                    client.write_all(&backend_buf[..n]).await?;
                    let frames = observe_frames(&backend_buf[..n], &mut b2c_scan, max_frame, &mut teardown, Teardown::BackendInitiated)?;
                    stats.record_in(n, frames.count);
                    if teardown_deadline.is_none() && teardown != Teardown::None {
                        teardown_deadline = Some(tokio::time::Instant::now() + close_timeout);
                    }
                    if vhost_quota_exceeded(state, vhost, n) {
                        warn!(vhost, "data-rate alarm threshold crossed (backend to client)");
                    }
                    if frames.teardown_complete { Some(Ok(())) } else { None }
                }
            }
        };

        if let Some(result) = step {
            break result;
        }
    };

    state
        .stats
        .merge_session(vhost, &egress.backend.name, stats.snapshot());
    outcome
}

fn vhost_quota_exceeded(state: &Arc<AppState>, vhost: &str, bytes: usize) -> bool {
    state.data_rate_limiters.record_usage(vhost, bytes)
}

struct FrameObservation {
    count: u64,
    teardown_complete: bool,
}

/// Feed newly forwarded bytes into the scan buffer and decode as many
/// complete frames as are available, watching for Close/CloseOk and
/// rejecting anything over `max_frame`. `teardown_complete` is set once
/// both sides have completed a graceful Close/CloseOk exchange.
fn observe_frames(
    chunk: &[u8],
    scan: &mut BytesMut,
    max_frame: u32,
    teardown: &mut Teardown,
    initiator: Teardown,
) -> Result<FrameObservation, CoreError> {
    scan.extend_from_slice(chunk);
    let mut count = 0u64;
    loop {
        match frame::decode(&scan[..], max_frame) {
            Ok(Decoded::Frame(f, consumed)) => {
                count += 1;
                if f.frame_type == frame_type::METHOD {
                    if let Ok(method) = amqpprox_core::wire::Method::decode(f.payload) {
                        match method {
                            amqpprox_core::wire::Method::Close(_) if *teardown == Teardown::None => {
                                *teardown = initiator;
                                debug!("observed Close, awaiting CloseOk");
                            }
                            amqpprox_core::wire::Method::CloseOk(_)
                                if *teardown != Teardown::None && *teardown != initiator =>
                            {
                                let _ = scan.split_to(consumed);
                                return Ok(FrameObservation {
                                    count,
                                    teardown_complete: true,
                                });
                            }
                            _ => {}
                        }
                    }
                }
                let _ = scan.split_to(consumed);
            }
            Ok(Decoded::Incomplete) => {
                return Ok(FrameObservation {
                    count,
                    teardown_complete: false,
                })
            }
            Err(err) => {
                // Oversized or malformed frame: fatal per spec (close 501),
                // not something to swallow and keep forwarding past.
                return Err(err.into());
            }
        }
    }
}

/// Resolves at `deadline` if one is set, otherwise never resolves; lets a
/// `tokio::select!` branch double as an optional timeout.
async fn wait_teardown_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn emit_heartbeat(stream: &mut TcpStream) -> Result<(), CoreError> {
    let mut out = BytesMut::new();
    frame::encode(&mut out, frame_type::HEARTBEAT, 0, &[]);
    stream.write_all(&out).await?;
    Ok(())
}

/// Apply a control-channel command; `Ok(None)` means the session should
/// terminate, `Ok(Some(()))` means continue the splice loop.
async fn apply_command(
    cmd: Option<SessionCommand>,
    paused: &mut bool,
    client: &mut TcpStream,
    backend: &mut TcpStream,
    stats: &ConnectionStats,
) -> Result<Option<()>, CoreError> {
    match cmd {
        None => Ok(Some(())), // sender dropped; nothing to do
        Some(SessionCommand::Pause) => {
            *paused = true;
            stats.record_pause();
            Ok(Some(()))
        }
        Some(SessionCommand::Unpause) => {
            *paused = false;
            Ok(Some(()))
        }
        Some(SessionCommand::ForceDisconnect) => {
            let _ = client.shutdown().await;
            let _ = backend.shutdown().await;
            Ok(None)
        }
        Some(SessionCommand::DisconnectGraceful) => {
            use amqpprox_core::wire::methods::{Close, Method};
            let close = Method::Close(Close::new(200, "OK"));
            let body = close.encode_to_vec();
            let mut out = BytesMut::new();
            frame::encode(&mut out, frame_type::METHOD, 0, &body);
            let _ = client.write_all(&out).await;
            let _ = backend.write_all(&out).await;
            let _ = client.shutdown().await;
            let _ = backend.shutdown().await;
            Ok(None)
        }
    }
}
