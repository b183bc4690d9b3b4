use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all sheetbridge metrics
const PREFIX: &str = "sheetbridge";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Conversion Metrics
    pub static ref CONVERSIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_conversions_total"), "Conversion attempts by strategy and outcome"),
        &["strategy", "outcome"]
    ).expect("Failed to create conversions_total metric");

    pub static ref CONVERSION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_conversion_duration_seconds"),
            "Duration of a single strategy attempt in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["strategy"]
    ).expect("Failed to create conversion_duration_seconds metric");

    // Upload Metrics
    pub static ref UPLOADS_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_uploads_rejected_total"), "Uploads rejected before conversion"),
        &["reason"]
    ).expect("Failed to create uploads_rejected_total metric");

    pub static ref CONVERTED_FILES_PRUNED_TOTAL: prometheus::Counter = prometheus::Counter::new(
        format!("{PREFIX}_converted_files_pruned_total"),
        "Converted files deleted by the retention sweep"
    ).expect("Failed to create converted_files_pruned_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CONVERSIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CONVERSION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UPLOADS_REJECTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CONVERTED_FILES_PRUNED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record one strategy attempt. `outcome` is "success" or an error category.
pub fn record_conversion(strategy: &str, outcome: &str, duration: Duration) {
    CONVERSIONS_TOTAL
        .with_label_values(&[strategy, outcome])
        .inc();

    CONVERSION_DURATION_SECONDS
        .with_label_values(&[strategy])
        .observe(duration.as_secs_f64());
}

/// Record an upload rejected before any strategy ran
pub fn record_upload_rejected(reason: &str) {
    UPLOADS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_pruned_files(count: u64) {
    CONVERTED_FILES_PRUNED_TOTAL.inc_by(count as f64);
}

/// Groups request paths so per-file download URLs don't explode label
/// cardinality.
pub fn categorize_endpoint(path: &str) -> &'static str {
    if path.starts_with("/downloads/") {
        "/downloads"
    } else {
        match path {
            "/upload" => "/upload",
            "/health" => "/health",
            "/" => "/",
            _ => "other",
        }
    }
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // Parse the RSS (Resident Set Size) in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
