pub mod server;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics output is not utf-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    servers_connected: IntGauge,
    server_disconnections: IntCounterVec,
    // Header ingestion
    headers_saved: IntCounterVec,
    headers_rejected: IntCounterVec,
    headers_duplicate: IntCounter,
    headers_orphaned: IntCounterVec,
    chain_height: IntGaugeVec,
    catch_up_duration: HistogramVec,
    // Cross-context bridge
    bridge_timeouts: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let servers_connected = IntGauge::with_opts(Opts::new(
            "header_sync_servers_connected",
            "Number of connected backend servers",
        ))?;
        registry.register(Box::new(servers_connected.clone()))?;

        let server_disconnections = IntCounterVec::new(
            Opts::new("header_sync_server_disconnections_total", "Total number of server disconnections"),
            &["reason"],
        )?;
        registry.register(Box::new(server_disconnections.clone()))?;

        let headers_saved = IntCounterVec::new(
            Opts::new("header_sync_headers_saved_total", "Total number of headers appended to a chain"),
            &["source"],
        )?;
        registry.register(Box::new(headers_saved.clone()))?;

        let headers_rejected = IntCounterVec::new(
            Opts::new("header_sync_headers_rejected_total", "Total number of headers failing validation"),
            &["source"],
        )?;
        registry.register(Box::new(headers_rejected.clone()))?;

        let headers_duplicate = IntCounter::with_opts(Opts::new(
            "header_sync_headers_duplicate_total",
            "Total number of re-broadcast headers already stored",
        ))?;
        registry.register(Box::new(headers_duplicate.clone()))?;

        let headers_orphaned = IntCounterVec::new(
            Opts::new("header_sync_headers_orphaned_total", "Total number of headers matching no chain"),
            &["action"],
        )?;
        registry.register(Box::new(headers_orphaned.clone()))?;

        let chain_height = IntGaugeVec::new(
            Opts::new("header_sync_chain_height", "Tip height of each local chain"),
            &["fork_height"],
        )?;
        registry.register(Box::new(chain_height.clone()))?;

        let catch_up_duration = HistogramVec::new(
            HistogramOpts::new("header_sync_catch_up_duration_seconds", "Time taken by one catch-up pass")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &[],
        )?;
        registry.register(Box::new(catch_up_duration.clone()))?;

        let bridge_timeouts = IntCounter::with_opts(Opts::new(
            "header_sync_bridge_timeouts_total",
            "Total number of cross-context calls that timed out",
        ))?;
        registry.register(Box::new(bridge_timeouts.clone()))?;

        Ok(Self {
            registry,
            servers_connected,
            server_disconnections,
            headers_saved,
            headers_rejected,
            headers_duplicate,
            headers_orphaned,
            chain_height,
            catch_up_duration,
            bridge_timeouts,
        })
    }

    pub fn gather(&self) -> Result<String, MetricsError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    // Servers
    pub fn set_servers_connected(&self, v: i64) {
        self.servers_connected.set(v);
    }

    pub fn inc_server_disconnection(&self, reason: &str) {
        self.server_disconnections.with_label_values(&[reason]).inc();
    }

    // Headers
    pub fn inc_headers_saved(&self, source: &str) {
        self.headers_saved.with_label_values(&[source]).inc();
    }

    pub fn inc_headers_rejected(&self, source: &str) {
        self.headers_rejected.with_label_values(&[source]).inc();
    }

    pub fn inc_headers_duplicate(&self) {
        self.headers_duplicate.inc();
    }

    pub fn inc_headers_orphaned(&self, action: &str) {
        self.headers_orphaned.with_label_values(&[action]).inc();
    }

    pub fn set_chain_height(&self, fork_height: u64, height: u64) {
        self.chain_height
            .with_label_values(&[&fork_height.to_string()])
            .set(height as i64);
    }

    pub fn observe_catch_up_duration(&self, duration: f64) {
        self.catch_up_duration.with_label_values::<&str>(&[]).observe(duration);
    }

    pub fn inc_bridge_timeouts(&self) {
        self.bridge_timeouts.inc();
    }
}

pub type SharedMetrics = Arc<Metrics>;
