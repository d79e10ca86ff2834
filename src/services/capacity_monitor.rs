// src/services/capacity_monitor.rs
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::FreeSwitchServer;
use crate::esl::{parse_status, EslConnection, EslError};
use crate::models::CapacitySnapshot;

/// Upper bound on one connect-and-poll round trip.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest capacity reading, replaced wholesale on every successful poll.
#[derive(Clone)]
pub struct CapacityStore {
    tx: watch::Sender<Option<CapacitySnapshot>>,
}

impl CapacityStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn latest(&self) -> Option<CapacitySnapshot> {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, snapshot: CapacitySnapshot) {
        self.tx.send_replace(Some(snapshot));
    }
}

impl Default for CapacityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapacitySource: Send {
    async fn poll(&mut self) -> Result<CapacitySnapshot, EslError>;
}

/// Polls `api status` over a single long-lived event-socket connection,
/// reconnecting lazily after a failure.
pub struct FreeSwitchStatusSource {
    server: FreeSwitchServer,
    connection: Option<EslConnection>,
}

impl FreeSwitchStatusSource {
    pub fn new(server: FreeSwitchServer) -> Self {
        Self {
            server,
            connection: None,
        }
    }

    async fn poll_once(&mut self) -> Result<CapacitySnapshot, EslError> {
        if self.connection.is_none() {
            let connection = EslConnection::connect(&self.server).await?;
            info!("✅ Media engine connected: {}", connection.server_id());
            self.connection = Some(connection);
        }

        let connection = self.connection.as_mut().ok_or(EslError::Closed)?;
        let body = connection.api("status").await?;
        parse_status(&body)
    }
}

#[async_trait]
impl CapacitySource for FreeSwitchStatusSource {
    async fn poll(&mut self) -> Result<CapacitySnapshot, EslError> {
        let result = match timeout(POLL_TIMEOUT, self.poll_once()).await {
            Ok(result) => result,
            Err(_) => Err(EslError::Timeout(POLL_TIMEOUT)),
        };

        // A malformed report says nothing about the socket; anything else does.
        if let Err(e) = &result {
            if !matches!(e, EslError::Malformed(_)) && self.connection.take().is_some() {
                warn!("Dropping media engine connection {}: {}", self.server.address(), e);
            }
        }
        result
    }
}

/// Samples media engine capacity on a fixed cadence.
pub struct CapacityMonitor<S> {
    source: S,
    store: CapacityStore,
    every: Duration,
}

impl<S: CapacitySource> CapacityMonitor<S> {
    pub fn new(source: S, store: CapacityStore, every: Duration) -> Self {
        Self {
            source,
            store,
            every,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Capacity monitor stopped");
                    return;
                }
                _ = ticker.tick() => self.poll_once().await,
            }
        }
    }

    /// Failures keep the previous snapshot in place.
    pub async fn poll_once(&mut self) {
        match self.source.poll().await {
            Ok(snapshot) => {
                tracing::debug!(
                    current = snapshot.current_sessions,
                    max = snapshot.max_sessions,
                    cps = snapshot.calls_per_second,
                    cpu_idle = snapshot.cpu_idle,
                    "capacity sampled"
                );
                self.store.publish(snapshot);
            }
            Err(e) => warn!("⚠️  Capacity poll failed, keeping last snapshot: {}", e),
        }
    }
}
