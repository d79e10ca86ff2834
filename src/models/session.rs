// src/models/session.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Terminating,
    Terminated,
}

impl SessionState {
    /// `Terminating` may not be skipped on the way to `Terminated`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Active) | (Created, Terminating) | (Active, Terminating) | (Terminating, Terminated)
        )
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// One admitted, in-progress call.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    /// Signaling dialog handle (the SIP Call-ID).
    pub call_id: String,
    pub transport_id: String,
    /// Media-leg identifiers; the call sid handed to the engine on answer.
    pub media_handles: Vec<String>,
    pub application_sid: Option<String>,
    pub created_at: DateTime<Utc>,
    state: SessionState,
}

impl Session {
    pub fn new(
        call_id: impl Into<String>,
        transport_id: impl Into<String>,
        application_sid: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            call_id: call_id.into(),
            transport_id: transport_id.into(),
            media_handles: Vec::new(),
            application_sid,
            created_at: Utc::now(),
            state: SessionState::Created,
        }
    }

    pub fn with_media_handle(mut self, handle: impl Into<String>) -> Self {
        self.media_handles.push(handle.into());
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
