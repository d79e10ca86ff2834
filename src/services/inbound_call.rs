// src/services/inbound_call.rs
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::registry::HangupSignal;
use crate::models::{ApplicationConfig, CallRequest, SessionId, SipResponse};
use crate::signaling::{Responder, SignalingError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Session failed: {0}")]
    Failed(String),
}

/// Everything a running session needs; owned by the session task.
pub struct SessionCall {
    pub session_id: SessionId,
    pub call_sid: Uuid,
    pub call_id: String,
    pub request: CallRequest,
    pub application: Option<ApplicationConfig>,
    pub instructions: Option<Value>,
    pub responder: Arc<dyn Responder>,
    pub hangup: HangupSignal,
}

/// Dialog execution for one admitted call.
#[async_trait]
pub trait CallSession: Send + Sync {
    async fn execute(&self, call: SessionCall) -> Result<(), SessionError>;
}

/// Answers the call and holds it until either side hangs up.
pub struct InboundCallSession;

#[async_trait]
impl CallSession for InboundCallSession {
    async fn execute(&self, call: SessionCall) -> Result<(), SessionError> {
        if call.hangup.is_triggered() {
            info!(call_id = %call.call_id, "hung up before answer");
            return Ok(());
        }

        let answer = SipResponse::ok().with_header("X-Call-Sid", call.call_sid.to_string());
        call.responder.respond(&call.call_id, answer).await?;
        info!(call_id = %call.call_id, "📞 Call answered");

        let origin = call.hangup.triggered().await;
        info!(call_id = %call.call_id, ?origin, "call hung up");
        Ok(())
    }
}
