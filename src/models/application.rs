// src/models/application.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HookMethod {
    Get,
    Post,
}

impl HookMethod {
    /// Anything other than `GET` falls back to `POST`.
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("get") {
            HookMethod::Get
        } else {
            HookMethod::Post
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub url: String,
    pub method: HookMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

/// Account/application settings resolved for one inbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub application_sid: String,
    pub account_sid: String,
    pub name: String,
    pub call_hook: Webhook,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_status_hook: Option<Webhook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_synthesis_vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_recognizer_vendor: Option<String>,
}
