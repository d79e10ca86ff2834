// src/signaling/connection.rs
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use super::message::{hangup_frame, response_frame};
use super::{Responder, SignalingError, SignalingEvent};
use crate::frame::{Frame, FrameCodec, FrameError};
use crate::models::SipResponse;
use crate::services::CallDispatcher;

pub type SignalingStream = Framed<TcpStream, FrameCodec>;

const OUTBOUND_QUEUE: usize = 256;

/// Write half of one signaling connection, shared by every call on it.
pub struct SignalingConnection {
    outbound: mpsc::Sender<Frame>,
}

impl SignalingConnection {
    async fn send(&self, frame: Frame) -> Result<(), SignalingError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| SignalingError::Closed)
    }
}

#[async_trait]
impl Responder for SignalingConnection {
    async fn respond(&self, call_id: &str, response: SipResponse) -> Result<(), SignalingError> {
        debug!(call_id = %call_id, status = response.status, "sending final response");
        self.send(response_frame(call_id, &response)).await
    }

    async fn hangup(&self, call_id: &str) -> Result<(), SignalingError> {
        debug!(call_id = %call_id, "sending BYE");
        self.send(hangup_frame(call_id)).await
    }
}

async fn next_frame(stream: &mut SignalingStream) -> Result<Frame, SignalingError> {
    match stream.next().await {
        Some(frame) => Ok(frame?),
        None => Err(SignalingError::Closed),
    }
}

/// Connect mode: authenticate against the engine and subscribe to INVITEs.
pub async fn client_handshake(stream: &mut SignalingStream, secret: &str) -> Result<(), SignalingError> {
    let greeting = next_frame(stream).await?;
    if greeting.content_type() != Some("auth/request") {
        return Err(SignalingError::Handshake(format!(
            "expected auth/request, got {:?}",
            greeting.content_type()
        )));
    }

    stream.send(Frame::command(format!("auth {}", secret))).await?;
    let reply = next_frame(stream).await?;
    if !reply.reply_ok() {
        return Err(SignalingError::AuthFailed(
            reply.header("Reply-Text").unwrap_or("no reply text").to_string(),
        ));
    }

    stream.send(Frame::command("route invite")).await?;
    let reply = next_frame(stream).await?;
    if !reply.reply_ok() {
        return Err(SignalingError::Handshake(
            reply.header("Reply-Text").unwrap_or("route refused").to_string(),
        ));
    }
    Ok(())
}

/// Listen mode: challenge the engine for the shared secret.
pub async fn server_handshake(stream: &mut SignalingStream, secret: &str) -> Result<(), SignalingError> {
    stream
        .send(Frame::default().with_header("Content-Type", "auth/request"))
        .await?;

    let attempt = next_frame(stream).await?;
    let presented = attempt
        .command
        .as_deref()
        .and_then(|line| line.strip_prefix("auth "))
        .map(str::trim);

    if presented == Some(secret) {
        stream.send(command_reply("+OK accepted")).await?;
        Ok(())
    } else {
        stream.send(command_reply("-ERR invalid")).await?;
        Err(SignalingError::AuthFailed("invalid secret".to_string()))
    }
}

fn command_reply(text: &str) -> Frame {
    Frame::default()
        .with_header("Content-Type", "command/reply")
        .with_header("Reply-Text", text)
}

/// Stops the reader when `serve` itself is dropped, e.g. on shutdown.
struct ReaderTask(JoinHandle<Result<(), SignalingError>>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Feeds requests from an authenticated connection to the dispatcher until
/// the peer goes away, then releases everything that arrived on it.
pub async fn serve(
    stream: SignalingStream,
    transport_id: String,
    dispatcher: Arc<CallDispatcher>,
) -> Result<(), SignalingError> {
    let (mut sink, mut frames) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let connection = Arc::new(SignalingConnection { outbound: tx });

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match sink.send(frame).await {
                Ok(()) => {}
                Err(FrameError::LineBreak(field)) => {
                    warn!("Dropping outbound frame with line break in {:?}", field);
                }
                Err(e) => {
                    warn!("Signaling write failed: {}", e);
                    break;
                }
            }
        }
    });

    info!(transport_id = %transport_id, "signaling connection ready");

    // Reading runs on its own task so the transport is released even if
    // handling a frame panics.
    let mut reader = ReaderTask({
        let transport_id = transport_id.clone();
        let dispatcher = dispatcher.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            loop {
                match frames.next().await {
                    Some(Ok(frame)) => match SignalingEvent::from_frame(frame, &transport_id) {
                        Some(event) => dispatcher.dispatch(event, connection.clone()).await,
                        None => debug!("ignoring non-request frame"),
                    },
                    Some(Err(e)) => break Err(SignalingError::from(e)),
                    None => break Ok(()),
                }
            }
        })
    });

    let result = match (&mut reader.0).await {
        Ok(result) => result,
        Err(e) => {
            error!(transport_id = %transport_id, "❌ Signaling reader died: {}", e);
            Err(SignalingError::Reader(e.to_string()))
        }
    };

    dispatcher.transport_lost(&transport_id).await;
    drop(connection);
    writer.abort();

    info!(transport_id = %transport_id, "signaling connection closed");
    result
}
