//! Prometheus metrics for the cluster controller.
//!
//! Exported metrics:
//! - `cluster_controller_rate_limiter_use` (gauge): saturation of the
//!   control-plane client's token bucket, 1.0 = exhausted.
//! - `cluster_controller_sync_duration_seconds` (histogram): wall time of
//!   one cluster sync.
//! - `cluster_controller_sync_errors` (counter): failed syncs labeled by
//!   error kind.
//! - `cluster_controller_work_queue_depth` (gauge): keys waiting in the
//!   work queue.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Stable error kind, e.g. "conflict" or "provider".
    pub kind: String,
}

pub static RATE_LIMITER_USE: Lazy<Gauge<f64, AtomicU64>> = Lazy::new(Gauge::default);

pub static SYNC_DURATION_SECONDS: Lazy<Histogram> =
    Lazy::new(|| Histogram::new(exponential_buckets(0.001, 2.0, 16)));

pub static SYNC_ERRORS: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static WORK_QUEUE_DEPTH: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

/// Registry holding every controller metric.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "cluster_controller_rate_limiter_use",
        "Saturation of the control-plane client rate limiter (1.0 = exhausted)",
        RATE_LIMITER_USE.clone(),
    );
    registry.register(
        "cluster_controller_sync_duration_seconds",
        "Duration of one cluster sync in seconds",
        SYNC_DURATION_SECONDS.clone(),
    );
    registry.register(
        "cluster_controller_sync_errors",
        "Failed cluster syncs by error kind",
        SYNC_ERRORS.clone(),
    );
    registry.register(
        "cluster_controller_work_queue_depth",
        "Keys currently waiting in the cluster work queue",
        WORK_QUEUE_DEPTH.clone(),
    );

    registry
});

pub fn set_rate_limiter_use(saturation: f64) {
    RATE_LIMITER_USE.set(saturation);
}

pub fn observe_sync_duration(seconds: f64) {
    SYNC_DURATION_SECONDS.observe(seconds);
}

pub fn inc_sync_error(kind: &str) {
    SYNC_ERRORS
        .get_or_create(&ErrorLabels {
            kind: kind.to_string(),
        })
        .inc();
}

pub fn set_work_queue_depth(depth: usize) {
    WORK_QUEUE_DEPTH.set(depth as i64);
}
