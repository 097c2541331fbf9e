//! Metrics module for billing-service.
//! Provides Prometheus metrics for webhook processing, usage metering, and
//! bulk operations.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Webhook events counter
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Usage events counter
pub static USAGE_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Bulk operations counter
pub static BULK_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Bulk target outcomes counter
pub static BULK_TARGETS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_webhook_events_total",
                "Total webhook events by type and outcome"
            ),
            &["event_type", "outcome"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    USAGE_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_usage_events_total", "Total usage events by metric"),
            &["metric"]
        )
        .expect("Failed to register USAGE_EVENTS_TOTAL")
    });

    BULK_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_bulk_operations_total",
                "Total bulk operations by kind and terminal status"
            ),
            &["kind", "status"]
        )
        .expect("Failed to register BULK_OPERATIONS_TOTAL")
    });

    BULK_TARGETS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_bulk_targets_total",
                "Total bulk operation targets by kind and outcome"
            ),
            &["kind", "outcome"]
        )
        .expect("Failed to register BULK_TARGETS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a webhook event outcome.
pub fn record_webhook_event(event_type: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type, outcome]).inc();
    }
}

/// Record a usage event append.
pub fn record_usage_event(metric: &str) {
    if let Some(counter) = USAGE_EVENTS_TOTAL.get() {
        counter.with_label_values(&[metric]).inc();
    }
}

/// Record a bulk operation reaching a terminal status.
pub fn record_bulk_operation(kind: &str, status: &str) {
    if let Some(counter) = BULK_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[kind, status]).inc();
    }
}

/// Record a bulk target outcome.
pub fn record_bulk_target(kind: &str, outcome: &str) {
    if let Some(counter) = BULK_TARGETS_TOTAL.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}
