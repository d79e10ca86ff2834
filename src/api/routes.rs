// src/api/routes.rs
use actix_web::web;

use crate::api::handlers;
use crate::error::AppError;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::FormConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .service(resource("/health").route(web::get().to(handlers::health_check)))
    .service(resource("/metrics").route(web::get().to(handlers::metrics)))
    .service(
        web::scope("/v1")
            .service(resource("/sessions").route(web::get().to(handlers::list_sessions)))
            .service(
                resource("/updateCall/{session_id}")
                    .route(web::post().to(handlers::update_call)),
            ),
    );
}

/// A resource whose unmatched methods get a JSON 405.
fn resource(path: &str) -> actix_web::Resource {
    web::resource(path).default_service(web::to(handlers::method_not_allowed))
}
