// src/error.rs
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

use crate::models::SipResponse;

/// Seconds suggested to the caller before retrying after a lookup timeout.
pub const RETRY_AFTER_SECS: u64 = 5;

/// Errors raised by HTTP route handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            error!(error = %self, "unhandled route error");
        }

        HttpResponse::build(status_code).json(json!({ "msg": self.to_string() }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Why an inbound call was not admitted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("No application found for {0}")]
    ApplicationNotFound(String),

    #[error("Application retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("Application retrieval timed out after {0:?}")]
    RetrievalTimeout(Duration),

    #[error("Call hook unreachable: {0}")]
    WebhookUnreachable(String),

    #[error("Call hook timed out after {0:?}")]
    WebhookTimeout(Duration),

    #[error("Call rejected by application: {status} {reason}")]
    WebhookRejected { status: u16, reason: String },

    #[error("Call redirected by application to {contact}")]
    WebhookRedirect { contact: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl AdmissionError {
    pub fn sip_response(&self) -> SipResponse {
        match self {
            AdmissionError::InvalidDestination(_) => SipResponse::new(484, "Address Incomplete"),
            AdmissionError::ApplicationNotFound(_) | AdmissionError::RetrievalFailed(_) => {
                SipResponse::new(500, "Server Internal Error")
            }
            AdmissionError::RetrievalTimeout(_) => SipResponse::new(503, "Service Unavailable")
                .with_header("Retry-After", RETRY_AFTER_SECS.to_string()),
            AdmissionError::WebhookUnreachable(_) => SipResponse::new(502, "Bad Gateway"),
            AdmissionError::WebhookTimeout(_) => SipResponse::new(504, "Server Time-out"),
            AdmissionError::WebhookRejected { status, reason } => {
                SipResponse::new(*status, reason.clone())
            }
            AdmissionError::WebhookRedirect { contact } => {
                SipResponse::new(302, "Moved Temporarily").with_header("Contact", contact.clone())
            }
            AdmissionError::Cancelled => SipResponse::new(487, "Request Terminated"),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AdmissionError::InvalidDestination(_) => "invalid_destination",
            AdmissionError::ApplicationNotFound(_) => "application_not_found",
            AdmissionError::RetrievalFailed(_) => "retrieval_failed",
            AdmissionError::RetrievalTimeout(_) => "retrieval_timeout",
            AdmissionError::WebhookUnreachable(_) => "webhook_unreachable",
            AdmissionError::WebhookTimeout(_) => "webhook_timeout",
            AdmissionError::WebhookRejected { .. } => "webhook_rejected",
            AdmissionError::WebhookRedirect { .. } => "webhook_redirect",
            AdmissionError::Cancelled => "cancelled",
        }
    }
}
