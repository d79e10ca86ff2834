// src/api/handlers.rs
use actix_web::{web, Either, HttpRequest, HttpResponse};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::AppError;
use crate::models::{HealthResponse, UpdateCallRequest, UpdateCallResponse};

pub async fn health_check(ctx: web::Data<AppContext>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: ctx.registry.count().await,
    })
}

pub async fn metrics(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

pub async fn list_sessions(ctx: web::Data<AppContext>) -> HttpResponse {
    HttpResponse::Ok().json(ctx.registry.list().await)
}

/// Accepts JSON or url-encoded bodies; only `completed` is supported.
pub async fn update_call(
    path: web::Path<String>,
    body: Either<web::Json<UpdateCallRequest>, web::Form<UpdateCallRequest>>,
    ctx: web::Data<AppContext>,
) -> Result<HttpResponse, AppError> {
    let session_id = Uuid::parse_str(&path.into_inner())
        .map_err(|e| AppError::BadRequest(format!("invalid session id: {}", e)))?;
    let request = match body {
        Either::Left(json) => json.into_inner(),
        Either::Right(form) => form.into_inner(),
    };

    if request.call_status != "completed" {
        return Err(AppError::BadRequest(format!(
            "unsupported call_status: {}",
            request.call_status
        )));
    }

    if !ctx.controller.hangup_session(&session_id).await {
        return Err(AppError::NotFound(format!("session {} not found", session_id)));
    }

    info!(session_id = %session_id, "call completed via API");
    Ok(HttpResponse::Accepted().json(UpdateCallResponse {
        session_id,
        call_status: request.call_status,
    }))
}

pub async fn not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound("route not found".to_string()))
}

pub async fn method_not_allowed(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::MethodNotAllowed(format!(
        "method {} not allowed on {}",
        req.method(),
        req.path()
    )))
}
