// tests/signaling_test.rs
//! Both signaling modes over loopback TCP, with admission replaced by a
//! double that admits everything.

use apolo_feature_server::config::{ConnectFailurePolicy, SignalingConfig, SignalingMode};
use apolo_feature_server::error::AdmissionError;
use apolo_feature_server::frame::{Frame, FrameCodec};
use apolo_feature_server::models::CallRequest;
use apolo_feature_server::pipeline::{CallAdmission, RequestContext};
use apolo_feature_server::services::{
    CallDispatcher, InboundCallSession, SessionController, SessionRegistry,
};
use apolo_feature_server::signaling::{SignalingConnector, SignalingError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const SECRET: &str = "s3cret";

struct AdmitAll;

#[async_trait]
impl CallAdmission for AdmitAll {
    async fn evaluate(
        &self,
        request: CallRequest,
        _cancel: &CancellationToken,
    ) -> Result<RequestContext, AdmissionError> {
        Ok(RequestContext::new(request))
    }
}

fn signaling(mode: SignalingMode, policy: ConnectFailurePolicy) -> SignalingConfig {
    SignalingConfig {
        mode,
        secret: SECRET.to_string(),
        on_connect_failure: policy,
        reconnect_delay: Duration::from_millis(50),
    }
}

fn dispatcher() -> (Arc<CallDispatcher>, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    let controller = Arc::new(SessionController::new(
        registry.clone(),
        Arc::new(InboundCallSession),
    ));
    (
        Arc::new(CallDispatcher::new(Arc::new(AdmitAll), controller)),
        registry,
    )
}

fn invite(call_id: &str) -> Frame {
    Frame::default()
        .with_header("Content-Type", "sip/request")
        .with_header("Method", "INVITE")
        .with_header("Call-ID", call_id)
        .with_header("Request-URI", "sip:+15551234567@fs.example.com")
        .with_header("From", "<sip:+15550001111@carrier.example>;tag=1")
        .with_header("To", "<sip:+15551234567@fs.example.com>")
}

async fn next(stream: &mut Framed<TcpStream, FrameCodec>) -> Option<Frame> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|frame| frame.unwrap())
}

async fn next_on(stream: &mut Framed<&mut TcpStream, FrameCodec>) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .unwrap()
}

async fn wait_for_count(registry: &SessionRegistry, expected: usize) {
    for _ in 0..200 {
        if registry.count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.count().await, expected);
}

async fn start_listener() -> (u16, Arc<SessionRegistry>, CancellationToken) {
    let (dispatcher, registry) = dispatcher();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();

    let connector = SignalingConnector::new(
        signaling(SignalingMode::Listen { port }, ConnectFailurePolicy::Reconnect),
        dispatcher,
    );
    let token = shutdown.clone();
    tokio::spawn(async move { connector.serve_listener(listener, token).await });

    (port, registry, shutdown)
}

#[tokio::test]
async fn listen_mode_answers_invite_and_releases_on_disconnect() {
    let (port, registry, shutdown) = start_listener().await;

    let socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut engine = Framed::new(socket, FrameCodec);

    let greeting = next(&mut engine).await.unwrap();
    assert_eq!(greeting.content_type(), Some("auth/request"));
    engine
        .send(Frame::command(format!("auth {}", SECRET)))
        .await
        .unwrap();
    assert!(next(&mut engine).await.unwrap().reply_ok());

    engine.send(invite("call-1")).await.unwrap();
    let answer = next(&mut engine).await.unwrap();
    assert_eq!(answer.command.as_deref(), Some("sendmsg call-1"));
    assert_eq!(answer.content_type(), Some("sip/response"));
    assert_eq!(answer.header("Status"), Some("200"));
    assert!(answer.header("X-Call-Sid").is_some());
    assert_eq!(registry.count().await, 1);

    drop(engine);
    wait_for_count(&registry, 0).await;
    shutdown.cancel();
}

#[tokio::test]
async fn oversized_frame_drops_transport_and_its_sessions() {
    let (port, registry, shutdown) = start_listener().await;

    let mut socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    {
        let mut engine = Framed::new(&mut socket, FrameCodec);
        next_on(&mut engine).await;
        engine
            .send(Frame::command(format!("auth {}", SECRET)))
            .await
            .unwrap();
        next_on(&mut engine).await;
        engine.send(invite("call-1")).await.unwrap();
        next_on(&mut engine).await;
    }
    assert_eq!(registry.count().await, 1);

    let garbage = format!(
        "Content-Type: sip/request\nContent-Length: {}\n\n",
        u64::MAX
    );
    socket.write_all(garbage.as_bytes()).await.unwrap();

    wait_for_count(&registry, 0).await;
    shutdown.cancel();
}

#[tokio::test]
async fn listen_mode_rejects_wrong_secret() {
    let (port, registry, shutdown) = start_listener().await;

    let socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut engine = Framed::new(socket, FrameCodec);

    next(&mut engine).await.unwrap();
    engine.send(Frame::command("auth guess")).await.unwrap();
    let reply = next(&mut engine).await.unwrap();
    assert_eq!(reply.header("Reply-Text"), Some("-ERR invalid"));

    // The connection is closed without serving anything.
    assert!(next(&mut engine).await.is_none());
    assert_eq!(registry.count().await, 0);
    shutdown.cancel();
}

#[tokio::test]
async fn connect_mode_authenticates_and_subscribes() {
    let engine_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = engine_listener.local_addr().unwrap().port();
    let (dispatcher, registry) = dispatcher();
    let shutdown = CancellationToken::new();

    let connector = SignalingConnector::new(
        signaling(
            SignalingMode::Connect {
                host: "127.0.0.1".into(),
                port,
            },
            ConnectFailurePolicy::Reconnect,
        ),
        dispatcher,
    );
    let running = tokio::spawn(connector.run(shutdown.clone()));

    let (socket, _) = engine_listener.accept().await.unwrap();
    let mut server = Framed::new(socket, FrameCodec);
    let ok = || {
        Frame::default()
            .with_header("Content-Type", "command/reply")
            .with_header("Reply-Text", "+OK")
    };

    server
        .send(Frame::default().with_header("Content-Type", "auth/request"))
        .await
        .unwrap();
    let auth = next(&mut server).await.unwrap();
    assert_eq!(auth.command, Some(format!("auth {}", SECRET)));
    server.send(ok()).await.unwrap();

    let route = next(&mut server).await.unwrap();
    assert_eq!(route.command.as_deref(), Some("route invite"));
    server.send(ok()).await.unwrap();

    server.send(invite("call-9")).await.unwrap();
    let answer = next(&mut server).await.unwrap();
    assert_eq!(answer.command.as_deref(), Some("sendmsg call-9"));
    assert_eq!(answer.header("Status"), Some("200"));
    assert_eq!(registry.count().await, 1);

    let bye = Frame::default()
        .with_header("Content-Type", "sip/request")
        .with_header("Method", "BYE")
        .with_header("Call-ID", "call-9");
    server.send(bye).await.unwrap();
    wait_for_count(&registry, 0).await;

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    tokio_test::assert_ok!(result);
}

#[tokio::test]
async fn exit_policy_aborts_when_engine_unreachable() {
    let port = {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        unused.local_addr().unwrap().port()
    };
    let (dispatcher, _) = dispatcher();

    let connector = SignalingConnector::new(
        signaling(
            SignalingMode::Connect {
                host: "127.0.0.1".into(),
                port,
            },
            ConnectFailurePolicy::Exit,
        ),
        dispatcher,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        connector.run(CancellationToken::new()),
    )
    .await
    .unwrap();
    let err = tokio_test::assert_err!(result);
    assert!(matches!(err, SignalingError::Aborted(_)));
}
