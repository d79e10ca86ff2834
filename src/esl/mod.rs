// src/esl/mod.rs
pub mod connection;
pub mod status;

pub use connection::EslConnection;
pub use status::parse_status;

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum EslError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    Malformed(String),
}
