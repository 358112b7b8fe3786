//! Per-connection ingress handshake state machine, grounded on spec.md
//! section 4.2. Everything past `Connected` is handed off to
//! [`crate::splice`].

use std::net::SocketAddr;
use std::sync::Arc;

use amqpprox_core::wire::constants::{self, class_method};
use amqpprox_core::wire::field_table::FieldValue;
use amqpprox_core::wire::methods::{Close, Method, OpenOk, Start, Tune};
use amqpprox_core::CoreError;
use amqpprox_registry::{AuthRequestData, BackendSet, ConnectionManager, Resource};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connector;
use crate::framing::{expect_method, write_method};
use crate::splice;
use crate::state::AppState;
use crate::stats::ConnectionStats;

/// Commands the control channel posts onto a running session.
pub enum SessionCommand {
    Pause,
    Unpause,
    DisconnectGraceful,
    ForceDisconnect,
}

fn server_properties() -> Vec<(String, FieldValue)> {
    vec![
        ("product".to_string(), FieldValue::LongStr(constants::PRODUCT.to_string())),
        ("version".to_string(), FieldValue::LongStr(constants::VERSION.to_string())),
        ("copyright".to_string(), FieldValue::LongStr(constants::COPYRIGHT.to_string())),
        ("platform".to_string(), FieldValue::LongStr("Rust".to_string())),
        ("capabilities".to_string(), FieldValue::Table(Vec::new())),
    ]
}

/// Drive one accepted client connection end to end: preamble, synthesized
/// handshake, backend selection, egress handshake, then splice.
pub async fn run(state: Arc<AppState>, mut client: TcpStream, peer_addr: SocketAddr) {
    if !state.conn_rate_limiter.allow_new_connection() || !state.total_conn_limiter.allow_new_connection()
    {
        warn!(peer = %peer_addr, "connection rejected by rate/connection limiter");
        return;
    }

    let (tx, rx) = mpsc::channel(8);
    let handle = state.sessions.register(peer_addr.to_string(), tx);
    state.stats.connection_opened();

    let result = drive(&state, &mut client, peer_addr, rx, &handle).await;

    if let Err(err) = &result {
        warn!(session = handle.id, peer = %peer_addr, error = %err, "session ended with error");
        let close = match err {
            // The backend itself already gave us a reply code and text
            // (e.g. a broker refusing the vhost during handshake); forward
            // that verbatim instead of re-wrapping it in a debug string.
            CoreError::PeerClosed(close) => Close {
                reply_code: close.reply_code,
                reply_text: close.reply_text.clone(),
                class_id: close.class_id,
                method_id: close.method_id,
            },
            other => Close::new(other.reply_code(), other.to_string()),
        };
        let _ = write_method(&mut client, 0, &Method::Close(close)).await;
    }

    state.sessions.unregister(handle.id);
    state.stats.connection_closed();
    state.total_conn_limiter.connection_closed();
    info!(session = handle.id, peer = %peer_addr, "session closed");
}

async fn drive(
    state: &Arc<AppState>,
    client: &mut TcpStream,
    peer_addr: SocketAddr,
    commands: mpsc::Receiver<SessionCommand>,
    handle: &Arc<crate::state::SessionHandle>,
) -> Result<(), CoreError> {
    let max_frame = state.config.session.max_frame_size;

    let mut preamble = [0u8; 8];
    client.read_exact(&mut preamble).await?;

    if preamble == *constants::LEGACY_PROTOCOL_HEADER {
        client.write_all(constants::PROTOCOL_HEADER).await?;
        return Ok(());
    }
    if preamble != *constants::PROTOCOL_HEADER {
        return Err(CoreError::BadPreamble);
    }

    let mut buf = BytesMut::new();

    let offered_start = Start {
        version_major: constants::VERSION_MAJOR,
        version_minor: constants::VERSION_MINOR,
        server_properties: server_properties(),
        mechanisms: constants::SASL_MECHANISM.to_string(),
        locales: constants::LOCALE.to_string(),
    };
    write_method(client, 0, &Method::Start(offered_start)).await?;

    let start_ok = match expect_method(client, &mut buf, max_frame).await? {
        Method::StartOk(s) => s,
        other => return Err(unexpected("StartOk", other)),
    };
    let augmented_start_ok = augment_start_ok(start_ok, &peer_addr, &state.config);

    let offered_tune = Tune {
        channel_max: state.config.session.channel_max,
        frame_max: state.config.session.max_frame_size,
        heartbeat_interval: state.config.session.heartbeat_secs,
    };
    write_method(client, 0, &Method::Tune(offered_tune)).await?;

    let client_tune = match expect_method(client, &mut buf, max_frame).await? {
        Method::TuneOk(t) => t,
        other => return Err(unexpected("TuneOk", other)),
    };

    let open = match expect_method(client, &mut buf, max_frame).await? {
        Method::Open(o) => o,
        other => return Err(unexpected("Open", other)),
    };
    let vhost = open.virtual_host.clone();

    let auth_request = AuthRequestData {
        vhost: vhost.clone(),
        mechanism: augmented_start_ok.mechanism.clone(),
        credentials: augmented_start_ok.response.clone().into_bytes(),
    };
    let decision = state.auth.authenticate(&auth_request).await;
    if !decision.is_allowed() {
        let reason = match decision.decision {
            amqpprox_registry::AuthDecision::Deny(reason) => reason,
            amqpprox_registry::AuthDecision::Allow => unreachable!(),
        };
        return Err(CoreError::AuthDenied(reason));
    }

    let manager = build_connection_manager(state, &vhost)?;

    let augmented_start_ok_method = Method::StartOk(augmented_start_ok);
    let egress = connector::connect(
        state,
        &manager,
        &vhost,
        peer_addr,
        Tune {
            channel_max: client_tune.channel_max,
            frame_max: client_tune.frame_max,
            heartbeat_interval: client_tune.heartbeat_interval,
        },
        &augmented_start_ok_method,
    )
    .await?;

    write_method(client, 0, &Method::OpenOk(OpenOk)).await?;

    *handle.vhost.lock().unwrap() = Some(vhost.clone());
    *handle.backend.lock().unwrap() = Some(egress.backend.name.clone());

    let stats = Arc::new(ConnectionStats::default());
    splice::run(state, client, egress, &vhost, stats, commands).await
}

fn unexpected(expected: &str, got: Method) -> CoreError {
    CoreError::Other(format!("expected {expected} from client, got {got:?}"))
}

/// Injects the ingress-side identity the proxy knows about as soon as the
/// client's StartOk arrives. Mirrors `ConnectorUtil::injectProxyClientIdent`,
/// except the outbound local port: that's only known once an egress socket
/// is connected, so it's added later in `connector::attempt_backend`.
fn augment_start_ok(
    mut start_ok: amqpprox_core::wire::methods::StartOk,
    peer_addr: &SocketAddr,
    config: &amqpprox_core::Config,
) -> amqpprox_core::wire::methods::StartOk {
    start_ok.client_properties.push((
        "proxy_client_address".to_string(),
        FieldValue::LongStr(peer_addr.to_string()),
    ));
    start_ok.client_properties.push((
        "proxy_client_hostname".to_string(),
        FieldValue::LongStr(peer_addr.ip().to_string()),
    ));
    start_ok.client_properties.push((
        "proxy_client_remote_port".to_string(),
        FieldValue::I32(peer_addr.port() as i32),
    ));
    start_ok.client_properties.push((
        "proxy_local_hostname".to_string(),
        FieldValue::LongStr(local_hostname()),
    ));
    start_ok.client_properties.push((
        "proxy_listen_port".to_string(),
        FieldValue::I32(config.listen.port as i32),
    ));
    start_ok.client_properties.push((
        "proxy_ingress_tls".to_string(),
        // TLS termination on the ingress listener is a named out-of-scope
        // collaborator (spec.md section 1); this is always false until one
        // exists.
        FieldValue::Bool(false),
    ));
    start_ok
}

/// The proxy's own hostname, injected into the augmented StartOk as
/// `proxy_local_hostname`. Falls back to a fixed placeholder if the
/// platform call fails rather than failing the handshake over it.
fn local_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_string())
}

fn build_connection_manager(state: &Arc<AppState>, vhost: &str) -> Result<ConnectionManager, CoreError> {
    let resource = state
        .resource_map
        .resolve(vhost)
        .or_else(|| state.config.routing.default_farm.clone().map(Resource::Farm))
        .ok_or_else(|| CoreError::NoRoute(vhost.to_string()))?;

    match resource {
        Resource::Backend(name) => {
            let backend = state
                .backends
                .lookup(&name)
                .ok_or_else(|| CoreError::NoRoute(format!("backend {name:?} not found")))?;
            let set = BackendSet::new(vec![vec![backend]]);
            Ok(ConnectionManager::new(set, None))
        }
        Resource::Farm(name) => {
            let (set, selector) = state
                .farms
                .materialize(&name)
                .map_err(|e| CoreError::NoRoute(e.to_string()))?;
            Ok(ConnectionManager::new(set, Some(selector)))
        }
    }
}
