use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, TextEncoder};

fn register_counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("failed to create {}: {}", name, e));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register {}: {}", name, e));
    counter
}

static SUMMARIES_EMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "billing_summaries_emitted_total",
        "Usage summaries confirmed delivered to billing",
        &["mode"],
    )
});

static TENANT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "billing_tenant_failures_total",
        "Per-tenant sweep failures by stage",
        &["mode", "stage"],
    )
});

static QUERY_DEGRADED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "billing_query_degraded_total",
        "Non-foundational metric queries that failed and defaulted to zero",
        &["query"],
    )
});

static SCHEMA_FALLBACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "billing_schema_fallbacks_total",
        "Metric queries retried with the legacy column set",
        &["query"],
    )
});

static CURSOR_ADVANCES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "billing_cursor_advances_total",
        "Incremental cursor advances by reason",
        &["reason"],
    )
});

static SWEEP_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "billing_sweep_duration_seconds",
            "Wall-clock duration of a billing sweep",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
        &["mode"],
    )
    .expect("failed to create billing_sweep_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register billing_sweep_duration_seconds");
    histogram
});

pub fn record_summaries_emitted(mode: &str, count: usize) {
    SUMMARIES_EMITTED
        .with_label_values(&[mode])
        .inc_by(count as u64);
}

pub fn record_tenant_failure(mode: &str, stage: &str) {
    TENANT_FAILURES.with_label_values(&[mode, stage]).inc();
}

pub fn record_query_degraded(query: &str) {
    QUERY_DEGRADED.with_label_values(&[query]).inc();
}

pub fn record_schema_fallback(query: &str) {
    SCHEMA_FALLBACKS.with_label_values(&[query]).inc();
}

pub fn record_cursor_advance(reason: &str) {
    CURSOR_ADVANCES.with_label_values(&[reason]).inc();
}

pub fn observe_sweep(mode: &str, elapsed: Duration) {
    SWEEP_DURATION_SECONDS
        .with_label_values(&[mode])
        .observe(elapsed.as_secs_f64());
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
