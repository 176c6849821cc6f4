//! Prometheus metrics for compilation runs.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const CLIPS_PREPARED_TOTAL: &str = "clipreel_clips_prepared_total";
    pub const CLIP_PREPARE_DURATION_SECONDS: &str = "clipreel_clip_prepare_duration_seconds";
    pub const ASSET_CACHE_HITS_TOTAL: &str = "clipreel_asset_cache_hits_total";
    pub const ASSET_BUILDS_TOTAL: &str = "clipreel_asset_builds_total";
    pub const TRANSITIONS_INSERTED_TOTAL: &str = "clipreel_transitions_inserted_total";
    pub const COMPILATIONS_TOTAL: &str = "clipreel_compilations_total";
}

/// Serve metrics on `addr` for scraping.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Record the final status of one prepared clip.
pub fn record_clip(status: &str, duration_secs: f64) {
    let labels = [("status", status.to_string())];
    counter!(names::CLIPS_PREPARED_TOTAL, &labels).increment(1);
    histogram!(names::CLIP_PREPARE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_asset_cache_hit() {
    counter!(names::ASSET_CACHE_HITS_TOTAL).increment(1);
}

/// Record a transition-asset build attempt with the audio mode used.
pub fn record_asset_build(mode: &str, success: bool) {
    let labels = [
        ("mode", mode.to_string()),
        ("result", if success { "ok" } else { "failed" }.to_string()),
    ];
    counter!(names::ASSET_BUILDS_TOTAL, &labels).increment(1);
}

pub fn record_transition(name: &str) {
    let labels = [("asset", name.to_string())];
    counter!(names::TRANSITIONS_INSERTED_TOTAL, &labels).increment(1);
}

/// Record how a compilation ended (`encoded`, `empty`, `aborted`, `encode_failed`).
pub fn record_compilation(result: &str) {
    let labels = [("result", result.to_string())];
    counter!(names::COMPILATIONS_TOTAL, &labels).increment(1);
}
