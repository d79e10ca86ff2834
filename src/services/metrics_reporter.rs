// src/services/metrics_reporter.rs
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::capacity_monitor::CapacityStore;
use super::registry::SessionRegistry;

pub const SIP_CALLS_COUNT: &str = "fs.sip.calls.count";
pub const MEDIA_CHANNELS_IN_USE: &str = "fs.media.channels.in_use";
pub const MEDIA_CHANNELS_FREE: &str = "fs.media.channels.free";
pub const MEDIA_CALLS_PER_SECOND: &str = "fs.media.calls_per_second";
pub const MEDIA_CPU_IDLE: &str = "fs.media.cpu_idle";

/// Install the Prometheus recorder and describe the gauges we publish.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_gauge!(SIP_CALLS_COUNT, "Number of live call sessions");
    describe_gauge!(MEDIA_CHANNELS_IN_USE, "Media engine sessions in use");
    describe_gauge!(MEDIA_CHANNELS_FREE, "Media engine sessions still available");
    describe_gauge!(MEDIA_CALLS_PER_SECOND, "Media engine calls per second");
    describe_gauge!(MEDIA_CPU_IDLE, "Media engine idle CPU fraction");

    Ok(handle)
}

pub trait GaugeSink: Send + Sync {
    fn gauge(&self, name: &'static str, value: f64);
}

/// Forwards to whatever `metrics` recorder is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsGauges;

impl GaugeSink for MetricsGauges {
    fn gauge(&self, name: &'static str, value: f64) {
        gauge!(name).set(value);
    }
}

impl<T: GaugeSink + ?Sized> GaugeSink for Arc<T> {
    fn gauge(&self, name: &'static str, value: f64) {
        (**self).gauge(name, value)
    }
}

/// Publishes the live call count and the latest media capacity as gauges.
/// Never writes to either source.
pub struct MetricsReporter<G> {
    registry: Arc<SessionRegistry>,
    capacity: CapacityStore,
    sink: G,
    calls_every: Duration,
    media_every: Duration,
}

impl<G: GaugeSink> MetricsReporter<G> {
    pub fn new(
        registry: Arc<SessionRegistry>,
        capacity: CapacityStore,
        sink: G,
        calls_every: Duration,
        media_every: Duration,
    ) -> Self {
        Self {
            registry,
            capacity,
            sink,
            calls_every,
            media_every,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut calls_tick = interval(self.calls_every);
        let mut media_tick = interval(self.media_every);
        calls_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        media_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "📊 Metrics reporter started (calls every {:?}, media every {:?})",
            self.calls_every, self.media_every
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = calls_tick.tick() => self.report_calls().await,
                _ = media_tick.tick() => self.report_media(),
            }
        }
    }

    pub async fn report_calls(&self) {
        let count = self.registry.count().await;
        self.sink.gauge(SIP_CALLS_COUNT, count as f64);
    }

    pub fn report_media(&self) {
        let Some(snapshot) = self.capacity.latest() else {
            debug!("no capacity snapshot yet");
            return;
        };

        self.sink
            .gauge(MEDIA_CHANNELS_IN_USE, snapshot.current_sessions as f64);
        self.sink
            .gauge(MEDIA_CHANNELS_FREE, snapshot.free_sessions() as f64);
        self.sink
            .gauge(MEDIA_CALLS_PER_SECOND, snapshot.calls_per_second as f64);
        self.sink.gauge(MEDIA_CPU_IDLE, snapshot.cpu_idle);
    }
}
