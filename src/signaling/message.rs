// src/signaling/message.rs
use std::collections::HashMap;

use crate::frame::Frame;
use crate::models::{CallRequest, SipResponse};

pub const SIP_REQUEST: &str = "sip/request";
pub const SIP_RESPONSE: &str = "sip/response";

/// Headers lifted into `CallRequest` fields or owned by the framing layer.
const STRUCTURAL: [&str; 8] = [
    "Content-Type",
    "Content-Length",
    "Method",
    "Call-ID",
    "Request-URI",
    "From",
    "To",
    "Source-Address",
];

#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Invite(CallRequest),
    Cancel { call_id: String },
    Bye { call_id: String },
    Ignored { method: String },
}

impl SignalingEvent {
    /// Interprets a `sip/request` frame; other frames yield `None`.
    pub fn from_frame(frame: Frame, transport_id: &str) -> Option<Self> {
        if frame.content_type() != Some(SIP_REQUEST) {
            return None;
        }

        let method = frame.header("Method").unwrap_or_default().to_ascii_uppercase();
        let Some(call_id) = frame.header("Call-ID").map(str::to_string) else {
            return Some(SignalingEvent::Ignored { method });
        };

        let event = match method.as_str() {
            "INVITE" => {
                let field = |name: &str| frame.header(name).unwrap_or_default().to_string();
                let mut headers = HashMap::new();
                for (name, value) in &frame.headers {
                    if STRUCTURAL.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                        continue;
                    }
                    headers.entry(name.clone()).or_insert_with(|| value.clone());
                }

                SignalingEvent::Invite(CallRequest {
                    request_uri: field("Request-URI"),
                    from: field("From"),
                    to: field("To"),
                    source_address: frame.header("Source-Address").map(str::to_string),
                    headers,
                    body: frame.body.clone(),
                    transport_id: transport_id.to_string(),
                    call_id,
                })
            }
            "CANCEL" => SignalingEvent::Cancel { call_id },
            "BYE" => SignalingEvent::Bye { call_id },
            _ => SignalingEvent::Ignored { method },
        };
        Some(event)
    }
}

pub fn response_frame(call_id: &str, response: &SipResponse) -> Frame {
    let mut frame = Frame::command(format!("sendmsg {}", call_id))
        .with_header("Content-Type", SIP_RESPONSE)
        .with_header("Status", response.status.to_string())
        .with_header("Reason", response.reason.clone());

    for (name, value) in &response.headers {
        frame = frame.with_header(name.clone(), value.clone());
    }
    if let Some(body) = &response.body {
        frame = frame.with_body(body.clone());
    }
    frame
}

pub fn hangup_frame(call_id: &str) -> Frame {
    Frame::command(format!("sendmsg {}", call_id))
        .with_header("Content-Type", SIP_REQUEST)
        .with_header("Method", "BYE")
}
