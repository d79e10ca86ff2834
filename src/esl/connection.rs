// src/esl/connection.rs
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use super::EslError;
use crate::config::FreeSwitchServer;
use crate::frame::{Frame, FrameCodec};

/// Authenticated inbound event-socket connection to FreeSWITCH.
pub struct EslConnection {
    framed: Framed<TcpStream, FrameCodec>,
    server_id: String,
}

impl EslConnection {
    pub async fn connect(server: &FreeSwitchServer) -> Result<Self, EslError> {
        let server_id = server.address();
        info!("Connecting to FreeSWITCH ESL: {}", server_id);

        let stream = TcpStream::connect(&server_id).await?;
        let mut framed = Framed::new(stream, FrameCodec);

        let greeting = Self::next_frame(&mut framed).await?;
        if greeting.content_type() != Some("auth/request") {
            return Err(EslError::AuthFailed(format!(
                "unexpected greeting {:?}",
                greeting.content_type()
            )));
        }
        debug!("Received auth request from {}", server_id);

        framed
            .send(Frame::command(format!("auth {}", server.password)))
            .await?;

        let reply = Self::next_frame(&mut framed).await?;
        if !reply.reply_ok() {
            return Err(EslError::AuthFailed(
                reply.header("Reply-Text").unwrap_or("no reply text").to_string(),
            ));
        }

        info!("✅ Authenticated to FreeSWITCH: {}", server_id);
        Ok(Self { framed, server_id })
    }

    /// Runs `api <command>` and returns the response body.
    pub async fn api(&mut self, command: &str) -> Result<String, EslError> {
        self.framed
            .send(Frame::command(format!("api {}", command)))
            .await?;

        loop {
            let frame = Self::next_frame(&mut self.framed).await?;
            if frame.content_type() == Some("text/disconnect-notice") {
                return Err(EslError::Closed);
            }
            if frame.content_type() != Some("api/response") {
                // Events and command replies may interleave with api output.
                debug!("Skipping {:?} while waiting for api response", frame.content_type());
                continue;
            }

            let body = frame.body.unwrap_or_default();
            if body.starts_with("-ERR") {
                return Err(EslError::Command(body.trim().to_string()));
            }
            return Ok(body);
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn next_frame(framed: &mut Framed<TcpStream, FrameCodec>) -> Result<Frame, EslError> {
        match framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(EslError::Closed),
        }
    }
}
