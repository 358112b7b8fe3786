//! Egress connection establishment: given a [`ConnectionManager`], attempt
//! backends in order until one completes its handshake. Grounded on
//! spec.md section 4.2's egress state list and
//! `amqpprox_connectionmanager.cpp`.

use std::sync::Arc;
use std::time::Duration;

use amqpprox_core::wire::field_table::FieldValue;
use amqpprox_core::wire::methods::{Method, Open, Tune};
use amqpprox_core::CoreError;
use amqpprox_registry::{Backend, ConnectionManager};
use bytes::BytesMut;
use tokio::net::TcpStream;
use tracing::warn;

use crate::framing::{expect_method, write_method};
use crate::proxy_protocol;
use crate::state::AppState;

/// A successfully established egress connection, handed back to the
/// session for the splice phase.
pub struct EgressConnection {
    pub stream: TcpStream,
    pub backend: Arc<Backend>,
    pub negotiated_tune: Tune,
}

/// Attempt every backend the connection manager yields (bumping the retry
/// counter on each failure) until one completes its handshake or the
/// manager returns `None`.
pub async fn connect(
    state: &Arc<AppState>,
    manager: &ConnectionManager,
    vhost: &str,
    client_addr: std::net::SocketAddr,
    offered_tune: Tune,
    start_ok: &Method,
) -> Result<EgressConnection, CoreError> {
    let mut retry_count: u64 = 0;
    loop {
        let backend = match manager.get_connection(retry_count) {
            Some(b) => b,
            None => {
                return Err(CoreError::NoRoute(format!(
                    "no reachable backend for vhost {vhost:?} after {retry_count} attempt(s)"
                )))
            }
        };

        match attempt_backend(state, &backend, client_addr, offered_tune, start_ok, vhost).await {
            Ok(conn) => return Ok(conn),
            // The broker explicitly refused (e.g. Close(530) instead of
            // OpenOk) rather than just being unreachable; forward that
            // verdict to the client instead of silently trying the next
            // backend.
            Err(err @ CoreError::PeerClosed(_)) => return Err(err),
            Err(err) => {
                warn!(backend = %backend.name, error = %err, "egress attempt failed");
                state.stats.connect_attempt_failed();
                retry_count += 1;
            }
        }
    }
}

async fn attempt_backend(
    state: &Arc<AppState>,
    backend: &Arc<Backend>,
    client_addr: std::net::SocketAddr,
    offered_tune: Tune,
    start_ok: &Method,
    vhost: &str,
) -> Result<EgressConnection, CoreError> {
    let addrs = state
        .dns
        .resolve(&backend.host, &backend.port.to_string())
        .await
        .map_err(|e| CoreError::Other(e.to_string()))?;
    let addr = addrs
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::Other(format!("no addresses for {}", backend.host)))?;

    let connect_timeout = Duration::from_millis(state.config.session.connect_timeout_ms);
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| CoreError::HandshakeTimeout("connect".to_string()))??;

    if backend.proxy_protocol {
        let line = proxy_protocol::header_line(client_addr, addr);
        use tokio::io::AsyncWriteExt;
        stream.write_all(line.as_bytes()).await?;
    }

    // TLS handshake would happen here when `backend.tls` is set; left as a
    // named collaborator per spec.md section 1 ("TLS context setup" is
    // out of scope for this core).

    use tokio::io::AsyncWriteExt;
    stream
        .write_all(amqpprox_core::wire::constants::PROTOCOL_HEADER)
        .await?;

    let mut buf = BytesMut::new();
    let max_frame = state.config.session.max_frame_size;

    match expect_method(&mut stream, &mut buf, max_frame).await? {
        Method::Start(_) => {}
        other => return Err(unexpected("Start", other)),
    }

    let start_ok = inject_outbound_local_port(start_ok, &stream);
    write_method(&mut stream, 0, &start_ok).await?;

    let broker_tune = match expect_method(&mut stream, &mut buf, max_frame).await? {
        Method::Tune(t) => t,
        other => return Err(unexpected("Tune", other)),
    };
    let negotiated = Tune::negotiate(offered_tune, broker_tune);
    write_method(&mut stream, 0, &Method::TuneOk(negotiated)).await?;

    write_method(&mut stream, 0, &Method::Open(Open { virtual_host: vhost.to_string() })).await?;

    match expect_method(&mut stream, &mut buf, max_frame).await? {
        Method::OpenOk(_) => {}
        other => return Err(unexpected("OpenOk", other)),
    }

    Ok(EgressConnection {
        stream,
        backend: backend.clone(),
        negotiated_tune: negotiated,
    })
}

/// Adds the outbound local port to the StartOk's client-properties, now
/// that the egress socket is connected and its local address is known.
/// Completes the `ConnectorUtil::injectProxyClientIdent` augmentation
/// started in `session::augment_start_ok`, which can't know this port
/// until a backend has actually been dialed.
fn inject_outbound_local_port(start_ok: &Method, stream: &TcpStream) -> Method {
    let mut start_ok = match start_ok {
        Method::StartOk(s) => s.clone(),
        other => unreachable!("connector always builds a StartOk, got {other:?}"),
    };
    if let Ok(local_addr) = stream.local_addr() {
        start_ok.client_properties.push((
            "proxy_outbound_local_port".to_string(),
            FieldValue::I32(local_addr.port() as i32),
        ));
    }
    Method::StartOk(start_ok)
}

fn unexpected(expected: &str, got: Method) -> CoreError {
    CoreError::Other(format!("expected {expected} from backend, got {got:?}"))
}
