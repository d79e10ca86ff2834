// src/signaling/connector.rs
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::connection::{client_handshake, serve, server_handshake, SignalingStream};
use super::SignalingError;
use crate::config::{ConnectFailurePolicy, SignalingConfig, SignalingMode};
use crate::frame::FrameCodec;
use crate::services::CallDispatcher;

/// Brings up the signaling channel in the configured mode and keeps it up.
pub struct SignalingConnector {
    config: SignalingConfig,
    dispatcher: Arc<CallDispatcher>,
}

impl SignalingConnector {
    pub fn new(config: SignalingConfig, dispatcher: Arc<CallDispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Returns only on shutdown, or with `Aborted` when the connect-failure
    /// policy is `exit`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SignalingError> {
        match self.config.mode.clone() {
            SignalingMode::Connect { host, port } => {
                self.run_connect(format!("{}:{}", host, port), shutdown).await
            }
            SignalingMode::Listen { port } => {
                let listener = TcpListener::bind(("0.0.0.0", port)).await?;
                self.serve_listener(listener, shutdown).await
            }
        }
    }

    async fn run_connect(
        &self,
        address: String,
        shutdown: CancellationToken,
    ) -> Result<(), SignalingError> {
        loop {
            info!("Connecting to signaling engine: {}", address);

            let established = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = self.establish(&address) => result,
            };

            match established {
                Ok(stream) => {
                    info!("✅ Connected to signaling engine: {}", address);
                    let transport_id = Uuid::new_v4().to_string();
                    let served = tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        result = serve(stream, transport_id, self.dispatcher.clone()) => result,
                    };
                    match served {
                        Ok(()) => warn!("⚠️  Signaling engine {} closed the connection", address),
                        Err(e) => error!("❌ Signaling connection to {} failed: {}", address, e),
                    }
                }
                Err(e) => {
                    error!("❌ Signaling connect to {} failed: {}", address, e);
                    if self.config.on_connect_failure == ConnectFailurePolicy::Exit {
                        return Err(SignalingError::Aborted(e.to_string()));
                    }
                }
            }

            warn!(
                "Reconnecting to {} in {:?}...",
                address, self.config.reconnect_delay
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn establish(&self, address: &str) -> Result<SignalingStream, SignalingError> {
        let socket = TcpStream::connect(address).await?;
        let mut stream = Framed::new(socket, FrameCodec);
        client_handshake(&mut stream, &self.config.secret).await?;
        Ok(stream)
    }

    /// Accepts engine connections until shutdown; each one is authenticated
    /// and served on its own task.
    pub async fn serve_listener(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), SignalingError> {
        info!("🎧 Signaling listener on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, addr)) => {
                    info!("Signaling connection accepted from {}", addr);
                    let secret = self.config.secret.clone();
                    let dispatcher = self.dispatcher.clone();

                    tokio::spawn(async move {
                        let mut stream = Framed::new(socket, FrameCodec);
                        if let Err(e) = server_handshake(&mut stream, &secret).await {
                            warn!("Rejected signaling connection from {}: {}", addr, e);
                            return;
                        }
                        let transport_id = Uuid::new_v4().to_string();
                        if let Err(e) = serve(stream, transport_id, dispatcher).await {
                            error!("Error handling signaling connection from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept signaling connection: {}", e),
            }
        }
    }
}
