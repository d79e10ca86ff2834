// src/models/mod.rs
pub mod application;
pub mod call;
pub mod capacity;
pub mod session;

pub use application::{ApplicationConfig, HookMethod, Webhook};
pub use call::{CallRequest, SipResponse};
pub use capacity::CapacitySnapshot;
pub use session::{Session, SessionId, SessionState, InvalidTransition};

use serde::{Deserialize, Serialize};

// ==================== API DTOs ====================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub active_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCallRequest {
    pub call_status: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateCallResponse {
    pub session_id: SessionId,
    pub call_status: String,
}
