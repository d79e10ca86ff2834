// src/pipeline/webhook.rs
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use super::{AdmissionStage, RequestContext, StageTimeout};
use crate::error::AdmissionError;
use crate::models::{ApplicationConfig, HookMethod, Webhook};

const DEFAULT_REJECT_STATUS: u16 = 403;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HookError {
    #[error("Connection error: {0}")]
    Unreachable(String),

    #[error("Timeout waiting for call hook")]
    Timeout,

    #[error("HTTP error: status {0}")]
    Status(u16),

    #[error("Invalid call hook response: {0}")]
    Malformed(String),
}

/// What the application's call hook decided for this call.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    Admit { instructions: Option<Value> },
    Reject { status: u16, reason: String },
    Redirect { contact: String },
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ActionReply {
    Admit {
        #[serde(default)]
        instructions: Option<Value>,
    },
    Reject {
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    Redirect {
        contact: String,
    },
}

impl HookDecision {
    /// Empty bodies, bare verb arrays and objects without an `action` key
    /// admit the call and are kept as instructions.
    pub fn parse(body: &str) -> Result<Self, HookError> {
        if body.trim().is_empty() {
            return Ok(HookDecision::Admit { instructions: None });
        }

        let value: Value =
            serde_json::from_str(body).map_err(|e| HookError::Malformed(e.to_string()))?;
        let has_action = value.get("action").is_some();

        match value {
            Value::Null => Ok(HookDecision::Admit { instructions: None }),
            Value::Array(_) => Ok(HookDecision::Admit {
                instructions: Some(value),
            }),
            Value::Object(_) if has_action => {
                let reply: ActionReply = serde_json::from_value(value)
                    .map_err(|e| HookError::Malformed(e.to_string()))?;
                let field = match &reply {
                    ActionReply::Reject { reason, .. } => reason.as_deref(),
                    ActionReply::Redirect { contact } => Some(contact.as_str()),
                    ActionReply::Admit { .. } => None,
                };
                if field.map_or(false, |f| f.contains(['\r', '\n'])) {
                    return Err(HookError::Malformed(
                        "line break in reject reason or redirect contact".to_string(),
                    ));
                }
                Ok(match reply {
                    ActionReply::Admit { instructions } => HookDecision::Admit { instructions },
                    ActionReply::Reject { status, reason } => {
                        let status = status
                            .filter(|s| (400..700).contains(s))
                            .unwrap_or(DEFAULT_REJECT_STATUS);
                        HookDecision::Reject {
                            status,
                            reason: reason.unwrap_or_else(|| "Forbidden".to_string()),
                        }
                    }
                    ActionReply::Redirect { contact } => HookDecision::Redirect { contact },
                })
            }
            Value::Object(_) => Ok(HookDecision::Admit {
                instructions: Some(value),
            }),
            other => Err(HookError::Malformed(format!("unexpected JSON value: {}", other))),
        }
    }
}

/// Body sent to the call hook.
#[derive(Debug, Clone, Serialize)]
pub struct CallHookPayload {
    pub call_sid: String,
    pub call_id: String,
    pub direction: &'static str,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    pub account_sid: String,
    pub application_sid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originating_address: Option<String>,
    pub service_url: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub sip_headers: HashMap<String, String>,
}

impl CallHookPayload {
    pub fn new(ctx: &RequestContext, application: &ApplicationConfig, service_url: &str) -> Self {
        let request = ctx.request();
        Self {
            call_sid: ctx.call_sid.to_string(),
            call_id: request.call_id.clone(),
            direction: "inbound",
            from: ctx.calling_number.clone().unwrap_or_default(),
            to: ctx.called_number.clone().unwrap_or_default(),
            caller_name: request.caller_name().map(str::to_string),
            account_sid: application.account_sid.clone(),
            application_sid: application.application_sid.clone(),
            originating_address: request.source_address.clone(),
            service_url: service_url.to_string(),
            sip_headers: request.custom_headers(),
        }
    }

    /// Scalar fields for GET hooks.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("call_sid", self.call_sid.clone()),
            ("call_id", self.call_id.clone()),
            ("direction", self.direction.to_string()),
            ("from", self.from.clone()),
            ("to", self.to.clone()),
            ("account_sid", self.account_sid.clone()),
            ("application_sid", self.application_sid.clone()),
            ("service_url", self.service_url.clone()),
        ];
        if let Some(name) = &self.caller_name {
            pairs.push(("caller_name", name.clone()));
        }
        if let Some(addr) = &self.originating_address {
            pairs.push(("originating_address", addr.clone()));
        }
        pairs
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallHook: Send + Sync {
    async fn decide(
        &self,
        hook: &Webhook,
        payload: &CallHookPayload,
    ) -> Result<HookDecision, HookError>;
}

/// Call hook client over HTTP(S).
pub struct HttpCallHook {
    http_client: Client,
}

impl HttpCallHook {
    pub fn new(timeout: Duration) -> Result<Self, HookError> {
        let http_client = ClientBuilder::new()
            .timeout(timeout)
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("apolo-feature-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HookError::Unreachable(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl CallHook for HttpCallHook {
    #[instrument(skip(self, hook, payload), fields(url = %hook.url))]
    async fn decide(
        &self,
        hook: &Webhook,
        payload: &CallHookPayload,
    ) -> Result<HookDecision, HookError> {
        let mut request = match hook.method {
            HookMethod::Get => self.http_client.get(&hook.url).query(&payload.query_pairs()),
            HookMethod::Post => self.http_client.post(&hook.url).json(payload),
        };
        if let Some(username) = &hook.username {
            request = request.basic_auth(username, hook.password.as_ref());
        }

        let to_hook_error = |e: reqwest::Error| {
            if e.is_timeout() {
                HookError::Timeout
            } else {
                HookError::Unreachable(e.to_string())
            }
        };

        let response = request.send().await.map_err(to_hook_error)?;

        let status = response.status();
        if !status.is_success() {
            error!("Call hook HTTP error: status={}", status);
            return Err(HookError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(to_hook_error)?;
        debug!("Call hook response: {}", body);

        HookDecision::parse(&body)
    }
}

/// Asks the application whether and how to take the call.
pub struct InvokeCallHook<C> {
    client: C,
    timeout: Duration,
    service_url: String,
}

impl<C: CallHook> InvokeCallHook<C> {
    pub fn new(client: C, timeout: Duration, service_url: impl Into<String>) -> Self {
        Self {
            client,
            timeout,
            service_url: service_url.into(),
        }
    }
}

#[async_trait]
impl<C: CallHook> AdmissionStage for InvokeCallHook<C> {
    fn name(&self) -> &'static str {
        "invoke_call_hook"
    }

    fn timeout(&self) -> Option<StageTimeout> {
        Some(StageTimeout {
            after: self.timeout,
            error: AdmissionError::WebhookTimeout(self.timeout),
        })
    }

    async fn process(&self, ctx: &mut RequestContext) -> Result<(), AdmissionError> {
        let application = ctx.application.clone().ok_or_else(|| {
            AdmissionError::ApplicationNotFound(ctx.called_number.clone().unwrap_or_default())
        })?;
        let payload = CallHookPayload::new(ctx, &application, &self.service_url);

        match self.client.decide(&application.call_hook, &payload).await {
            Ok(HookDecision::Admit { instructions }) => {
                ctx.instructions = instructions;
                Ok(())
            }
            Ok(HookDecision::Reject { status, reason }) => {
                Err(AdmissionError::WebhookRejected { status, reason })
            }
            Ok(HookDecision::Redirect { contact }) => {
                Err(AdmissionError::WebhookRedirect { contact })
            }
            Err(HookError::Timeout) => Err(AdmissionError::WebhookTimeout(self.timeout)),
            Err(e) => {
                warn!(url = %application.call_hook.url, "call hook failed: {}", e);
                Err(AdmissionError::WebhookUnreachable(e.to_string()))
            }
        }
    }
}
