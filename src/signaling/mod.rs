// src/signaling/mod.rs
//! Connection to the SIP signaling engine, in either connect or listen mode.

pub mod connection;
pub mod connector;
pub mod message;

pub use connection::SignalingConnection;
pub use connector::SignalingConnector;
pub use message::SignalingEvent;

use async_trait::async_trait;
use std::io;
use thiserror::Error;

use crate::frame::FrameError;
use crate::models::SipResponse;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unexpected handshake reply: {0}")]
    Handshake(String),

    #[error("Signaling reader failed: {0}")]
    Reader(String),

    #[error("Signaling connect failed, giving up: {0}")]
    Aborted(String),
}

/// Sends call-scoped messages back toward the signaling engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Responder: Send + Sync {
    /// Final response to the INVITE identified by `call_id`.
    async fn respond(&self, call_id: &str, response: SipResponse) -> Result<(), SignalingError>;

    /// Asks the engine to tear down the dialog.
    async fn hangup(&self, call_id: &str) -> Result<(), SignalingError>;
}
