// src/context.rs
use std::sync::Arc;

use crate::config::Config;
use crate::services::{CapacityStore, SessionController, SessionRegistry};

/// Process-wide state, built once in `main` and handed to every component
/// that needs it.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub capacity: CapacityStore,
    pub controller: Arc<SessionController>,
    /// Base URL of our HTTP surface, advertised to call hooks.
    pub service_url: String,
}

impl AppContext {
    pub fn new(config: Config, controller: Arc<SessionController>, service_url: String) -> Self {
        Self {
            config: Arc::new(config),
            registry: controller.registry().clone(),
            capacity: CapacityStore::new(),
            controller,
            service_url,
        }
    }
}

pub fn service_url(http_port: u16) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("http://{}:{}", host, http_port)
}
