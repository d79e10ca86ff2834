// src/main.rs
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use apolo_feature_server::api;
use apolo_feature_server::config::Config;
use apolo_feature_server::context::{service_url, AppContext};
use apolo_feature_server::database::{check_connection, create_pool};
use apolo_feature_server::pipeline::{
    AdmissionPipeline, HttpCallHook, InvokeCallHook, NormalizeNumbers, PgApplicationStore,
    RetrieveApplication,
};
use apolo_feature_server::services::{
    init_metrics, CallDispatcher, CapacityMonitor, FreeSwitchStatusSource, InboundCallSession,
    MetricsGauges, MetricsReporter, SessionController, SessionRegistry,
};
use apolo_feature_server::signaling::{SignalingConnector, SignalingError};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .json()
        .init();

    info!("🚀 Starting Apolo Feature Server");

    // Nothing listens until the configuration is complete.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Environment: {}", config.environment);

    let prometheus = init_metrics().context("failed to install metrics recorder")?;

    // Database pool
    let db_pool = create_pool(&config.database).context("failed to create database pool")?;
    match check_connection(&db_pool).await {
        Ok(()) => info!("✅ Database pool created"),
        Err(e) => warn!("⚠️  Database not reachable yet, lookups will fail until it is: {}", e),
    }

    let service_url = service_url(config.http_port);

    // Admission pipeline
    let call_hook =
        HttpCallHook::new(config.webhook_timeout).context("failed to build call hook client")?;
    let pipeline = AdmissionPipeline::new(
        NormalizeNumbers,
        RetrieveApplication::new(PgApplicationStore::new(db_pool), config.app_lookup_timeout),
        InvokeCallHook::new(call_hook, config.webhook_timeout, service_url.clone()),
    );

    let registry = Arc::new(SessionRegistry::new());
    let controller = Arc::new(SessionController::new(registry, Arc::new(InboundCallSession)));
    let ctx = AppContext::new(config.clone(), controller.clone(), service_url.clone());
    let dispatcher = Arc::new(CallDispatcher::new(Arc::new(pipeline), controller));

    let shutdown = CancellationToken::new();

    // Media engine capacity
    let monitor = CapacityMonitor::new(
        FreeSwitchStatusSource::new(config.freeswitch.clone()),
        ctx.capacity.clone(),
        config.capacity_poll_interval,
    );
    tokio::spawn(monitor.run(shutdown.clone()));

    let reporter = MetricsReporter::new(
        ctx.registry.clone(),
        ctx.capacity.clone(),
        MetricsGauges,
        config.metrics_interval,
        config.capacity_poll_interval,
    );
    tokio::spawn(reporter.run(shutdown.clone()));

    // Signaling
    let connector = SignalingConnector::new(config.signaling.clone(), dispatcher);
    let signaling_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match connector.run(signaling_shutdown).await {
            Ok(()) => info!("Signaling connector stopped"),
            Err(SignalingError::Aborted(reason)) => {
                error!("❌ Signaling connect failed and policy is exit: {}", reason);
                std::process::exit(1);
            }
            Err(e) => error!("❌ Signaling connector failed: {}", e),
        }
    });

    // HTTP Server
    let bind_address = format!("{}:{}", config.http_host, config.http_port);
    info!("🌐 Starting HTTP server on {} ({})", bind_address, service_url);

    let app_ctx = web::Data::new(ctx);
    let prometheus = web::Data::new(prometheus);

    HttpServer::new(move || {
        App::new()
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(app_ctx.clone())
            .app_data(prometheus.clone())
            .configure(api::routes::configure)
            .default_service(web::route().to(api::handlers::not_found))
    })
    .bind(&bind_address)?
    .run()
    .await?;

    shutdown.cancel();
    info!("Apolo Feature Server stopped");
    Ok(())
}
