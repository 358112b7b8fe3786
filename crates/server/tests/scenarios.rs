//! End-to-end scenarios from spec.md section 8: each spins up a real
//! `AppState` behind a loopback `TcpListener`, drives the client side of
//! the AMQP 0-9-1 handshake by hand, and (where a backend is needed) runs
//! a small fake broker on another loopback socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use amqpprox_core::wire::constants;
use amqpprox_core::wire::field_table::FieldValue;
use amqpprox_core::wire::methods::{Close, CloseOk, Method, Open, OpenOk, Start, StartOk, Tune};
use amqpprox_core::Config;
use amqpprox_server::control::commands::dispatch;
use amqpprox_server::state::AppState;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use amqpprox_server::framing::{expect_method, write_method};

fn test_config() -> Config {
    let mut config = Config::for_profile("");
    config.session.connect_timeout_ms = 500;
    config
}

async fn bound_state(config: Config) -> (Arc<AppState>, SocketAddr) {
    let state = AppState::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(amqpprox_server::serve_clients(state.clone(), listener));
    (state, addr)
}

/// A bound-but-unaccepted listener's port, freed immediately so a connect
/// to it refuses rather than hangs.
fn unreachable_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Client-side half of the handshake, driven with the same `framing`
/// helpers the proxy itself uses.
struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        TestClient {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::new(),
        }
    }

    async fn send_preamble(&mut self) {
        self.stream.write_all(constants::PROTOCOL_HEADER).await.unwrap();
    }

    async fn send_legacy_preamble(&mut self) {
        self.stream.write_all(constants::LEGACY_PROTOCOL_HEADER).await.unwrap();
    }

    async fn write(&mut self, method: Method) {
        write_method(&mut self.stream, 0, &method).await.unwrap();
    }

    async fn expect(&mut self) -> Method {
        expect_method(&mut self.stream, &mut self.buf, constants::MAX_FRAME_SIZE)
            .await
            .unwrap()
    }

    /// Drive the handshake up to and including `Open`, returning the
    /// method the proxy answers with (`OpenOk` on success, or an error if
    /// the proxy closed instead).
    async fn handshake(&mut self, vhost: &str) -> Result<Method, amqpprox_core::CoreError> {
        self.send_preamble().await;
        match self.expect().await {
            Method::Start(_) => {}
            other => panic!("expected Start, got {other:?}"),
        }
        self.write(Method::StartOk(StartOk {
            client_properties: Vec::new(),
            mechanism: "PLAIN".to_string(),
            response: "\0guest\0guest".to_string(),
            locale: "en_US".to_string(),
        }))
        .await;
        match self.expect().await {
            Method::Tune(_) => {}
            other => panic!("expected Tune, got {other:?}"),
        }
        self.write(Method::TuneOk(Tune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat_interval: 60,
        }))
        .await;
        self.write(Method::Open(Open {
            virtual_host: vhost.to_string(),
        }))
        .await;
        expect_method(&mut self.stream, &mut self.buf, constants::MAX_FRAME_SIZE).await
    }
}

/// Broker-side half of the handshake for a fake backend: read the
/// preamble, exchange Start/Tune, read Open, then either answer `OpenOk`
/// or a refusing `Close`.
async fn fake_backend_handshake(stream: &mut TcpStream) -> String {
    let mut preamble = [0u8; 8];
    stream.read_exact(&mut preamble).await.unwrap();
    assert_eq!(&preamble, constants::PROTOCOL_HEADER);

    let mut buf = BytesMut::new();
    write_method(
        stream,
        0,
        &Method::Start(Start {
            version_major: constants::VERSION_MAJOR,
            version_minor: constants::VERSION_MINOR,
            server_properties: vec![("product".to_string(), FieldValue::LongStr("fake-broker".to_string()))],
            mechanisms: constants::SASL_MECHANISM.to_string(),
            locales: constants::LOCALE.to_string(),
        }),
    )
    .await
    .unwrap();
    match expect_method(stream, &mut buf, constants::MAX_FRAME_SIZE).await.unwrap() {
        Method::StartOk(_) => {}
        other => panic!("expected StartOk, got {other:?}"),
    }

    write_method(
        stream,
        0,
        &Method::Tune(Tune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat_interval: 60,
        }),
    )
    .await
    .unwrap();
    match expect_method(stream, &mut buf, constants::MAX_FRAME_SIZE).await.unwrap() {
        Method::TuneOk(_) => {}
        other => panic!("expected TuneOk, got {other:?}"),
    }

    match expect_method(stream, &mut buf, constants::MAX_FRAME_SIZE).await.unwrap() {
        Method::Open(o) => o.virtual_host,
        other => panic!("expected Open, got {other:?}"),
    }
}

/// Spawn a one-shot fake backend that completes the handshake
/// successfully, then echoes a Close/CloseOk teardown so splice can
/// observe a clean finish.
fn spawn_fake_backend_success(listener: TcpListener) {
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        fake_backend_handshake(&mut stream).await;
        write_method(&mut stream, 0, &Method::OpenOk(OpenOk)).await.unwrap();

        let mut buf = BytesMut::new();
        if let Err(amqpprox_core::CoreError::PeerClosed(_)) =
            expect_method(&mut stream, &mut buf, constants::MAX_FRAME_SIZE).await
        {
            let _ = write_method(&mut stream, 0, &Method::CloseOk(CloseOk)).await;
        }
    });
}

/// Spawn a one-shot fake backend that refuses the vhost instead of
/// answering `OpenOk`.
fn spawn_fake_backend_refusing(listener: TcpListener) {
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        fake_backend_handshake(&mut stream).await;
        write_method(&mut stream, 0, &Method::Close(Close::new(530, "ACCESS_REFUSED")))
            .await
            .unwrap();
    });
}

async fn free_listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// S1: happy path — direct backend mapping, full handshake, bidirectional
/// close teardown, stats reflect one clean connection.
#[tokio::test]
async fn s1_happy_path_direct_backend() {
    let backend_listener = free_listener().await;
    let backend_port = backend_listener.local_addr().unwrap().port();
    spawn_fake_backend_success(backend_listener);

    let (state, proxy_addr) = bound_state(test_config()).await;
    dispatch(&state, &format!("BACKEND ADD b1 127.0.0.1 {backend_port}")).unwrap();
    dispatch(&state, "MAP BACKEND / b1").unwrap();

    let mut client = TestClient::connect(proxy_addr).await;
    match client.handshake("/").await.unwrap() {
        Method::OpenOk(_) => {}
        other => panic!("expected OpenOk, got {other:?}"),
    }

    assert!(wait_until(|| state.stats.summary().active_connections == 1, Duration::from_millis(500)).await);

    client.write(Method::Close(Close::new(200, "OK"))).await;
    match client.expect().await {
        Method::CloseOk(_) => {}
        other => panic!("expected CloseOk, got {other:?}"),
    }

    let mut trailing = [0u8; 1];
    let n = client.stream.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0, "proxy should close the socket after teardown");

    assert!(wait_until(|| state.stats.summary().active_connections == 0, Duration::from_millis(500)).await);
    let summary = state.stats.summary();
    assert_eq!(summary.total_connections, 1);
    assert_eq!(summary.failed_connect_attempts, 0);
}

/// S2: a client speaking the legacy 0-9 preamble gets the current preamble
/// echoed back and the socket closed, with no backend attempt at all.
#[tokio::test]
async fn s2_legacy_preamble_is_rejected_with_current_header() {
    let (state, proxy_addr) = bound_state(test_config()).await;

    let mut client = TestClient::connect(proxy_addr).await;
    client.send_legacy_preamble().await;

    let mut reply = [0u8; 8];
    client.stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, constants::PROTOCOL_HEADER);

    let mut trailing = [0u8; 1];
    let n = client.stream.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0);

    assert!(wait_until(|| state.stats.summary().active_connections == 0, Duration::from_millis(500)).await);
    assert_eq!(state.stats.summary().failed_connect_attempts, 0);
}

/// S3: a 3-member round-robin farm where the first member refuses the
/// connection must retry onto the second member, per the fixed
/// marker-snapshot round-robin semantics.
#[tokio::test]
async fn s3_farm_retries_onto_second_member() {
    let b1_port = unreachable_port();
    let b2_listener = free_listener().await;
    let b2_port = b2_listener.local_addr().unwrap().port();
    spawn_fake_backend_success(b2_listener);
    let b3_port = unreachable_port();

    let (state, proxy_addr) = bound_state(test_config()).await;
    dispatch(&state, &format!("BACKEND ADD b1 127.0.0.1 {b1_port}")).unwrap();
    dispatch(&state, &format!("BACKEND ADD b2 127.0.0.1 {b2_port}")).unwrap();
    dispatch(&state, &format!("BACKEND ADD b3 127.0.0.1 {b3_port}")).unwrap();
    dispatch(&state, "FARM ADD f1 round-robin b1,b2,b3").unwrap();
    dispatch(&state, "MAP VHOST / f1").unwrap();

    let mut client = TestClient::connect(proxy_addr).await;
    match client.handshake("/").await.unwrap() {
        Method::OpenOk(_) => {}
        other => panic!("expected OpenOk after retry, got {other:?}"),
    }

    let summary = state.stats.summary();
    assert_eq!(summary.failed_connect_attempts, 1, "only b1 should have failed");
}

/// S4: datacenter affinity partitions the farm into same-DC members first;
/// two failures inside that partition must fall through to the
/// out-of-DC member.
#[tokio::test]
async fn s4_affinity_falls_back_after_two_failures() {
    let b1_port = unreachable_port(); // NY
    let b2_listener = free_listener().await; // LN
    let b2_port = b2_listener.local_addr().unwrap().port();
    spawn_fake_backend_success(b2_listener);
    let b3_port = unreachable_port(); // NY

    let mut config = test_config();
    config.routing.datacenter = Some("NY".to_string());
    let (state, proxy_addr) = bound_state(config).await;

    dispatch(&state, &format!("BACKEND ADD b1 127.0.0.1 {b1_port} NY")).unwrap();
    dispatch(&state, &format!("BACKEND ADD b2 127.0.0.1 {b2_port} LN")).unwrap();
    dispatch(&state, &format!("BACKEND ADD b3 127.0.0.1 {b3_port} NY")).unwrap();
    dispatch(&state, "FARM ADD f1 round-robin b1,b2,b3").unwrap();
    dispatch(&state, "FARM ADD_POLICY f1 datacenter-affinity").unwrap();
    dispatch(&state, "MAP VHOST / f1").unwrap();

    let mut client = TestClient::connect(proxy_addr).await;
    match client.handshake("/").await.unwrap() {
        Method::OpenOk(_) => {}
        other => panic!("expected OpenOk after falling back to b2, got {other:?}"),
    }

    let summary = state.stats.summary();
    assert_eq!(summary.failed_connect_attempts, 2, "both NY members should have failed first");
}

/// S5: a vhost paused before a session starts still lets that session's
/// handshake complete, but no bytes cross the splice until unpaused.
#[tokio::test]
async fn s5_paused_vhost_blocks_splice_until_unpaused() {
    let backend_listener = free_listener().await;
    let backend_port = backend_listener.local_addr().unwrap().port();
    spawn_fake_backend_success(backend_listener);

    let (state, proxy_addr) = bound_state(test_config()).await;
    dispatch(&state, &format!("BACKEND ADD b1 127.0.0.1 {backend_port}")).unwrap();
    dispatch(&state, "MAP BACKEND / b1").unwrap();
    dispatch(&state, "VHOST PAUSE /").unwrap();

    let mut client = TestClient::connect(proxy_addr).await;
    match client.handshake("/").await.unwrap() {
        Method::OpenOk(_) => {}
        other => panic!("expected OpenOk, got {other:?}"),
    }

    client.write(Method::Close(Close::new(200, "OK"))).await;

    let blocked = tokio::time::timeout(Duration::from_millis(150), client.expect()).await;
    assert!(blocked.is_err(), "no reply should arrive while the vhost is paused");

    dispatch(&state, "VHOST UNPAUSE /").unwrap();

    let reply = tokio::time::timeout(Duration::from_millis(500), client.expect())
        .await
        .expect("reply should arrive once unpaused");
    match reply {
        Method::CloseOk(_) => {}
        other => panic!("expected CloseOk once unpaused, got {other:?}"),
    }
}

/// S6: a broker that refuses the vhost during handshake gets its
/// `Close(530, "ACCESS_REFUSED")` forwarded to the client verbatim.
#[tokio::test]
async fn s6_broker_refusal_is_forwarded_to_client() {
    let backend_listener = free_listener().await;
    let backend_port = backend_listener.local_addr().unwrap().port();
    spawn_fake_backend_refusing(backend_listener);

    let (state, proxy_addr) = bound_state(test_config()).await;
    dispatch(&state, &format!("BACKEND ADD b1 127.0.0.1 {backend_port}")).unwrap();
    dispatch(&state, "MAP BACKEND / b1").unwrap();

    let mut client = TestClient::connect(proxy_addr).await;
    match client.handshake("/").await {
        Err(amqpprox_core::CoreError::PeerClosed(close)) => {
            assert_eq!(close.reply_code, 530);
            assert_eq!(close.reply_text, "ACCESS_REFUSED");
        }
        other => panic!("expected a forwarded Close(530, ACCESS_REFUSED), got {other:?}"),
    }

    let mut trailing = [0u8; 1];
    let n = client.stream.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0, "proxy should close the socket after forwarding the refusal");
}
