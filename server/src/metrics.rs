use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};
use std::time::Instant;

lazy_static::lazy_static! {
    // HTTP metrics
    static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "geoexplorer_http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    ).unwrap();

    static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "geoexplorer_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint", "status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    static ref HTTP_RESPONSE_SIZE_BYTES: HistogramVec = register_histogram_vec!(
        "geoexplorer_http_response_size_bytes",
        "HTTP response size in bytes",
        &["endpoint"],
        vec![100.0, 1000.0, 10000.0, 100000.0, 1000000.0, 10000000.0, 100000000.0]
    ).unwrap();

    // Dataset metrics
    static ref DATASET_FETCH_DURATION: Histogram = register_histogram!(
        "geoexplorer_dataset_fetch_duration_seconds",
        "Time taken to fetch a dataset and compute its statistics",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    static ref DATA_BYTES_SERVED: CounterVec = register_counter_vec!(
        "geoexplorer_data_bytes_served_total",
        "Total bytes of point data served",
        &["endpoint"]
    ).unwrap();

    static ref DATA_POINTS_SERVED: CounterVec = register_counter_vec!(
        "geoexplorer_data_points_served_total",
        "Total number of points served",
        &["endpoint"]
    ).unwrap();

    static ref FETCH_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "geoexplorer_fetch_failures_total",
        "Total number of failed dataset requests",
        &["endpoint", "kind"]
    ).unwrap();
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_http_request(self, method: &str, endpoint: &str, status: u16) {
        HTTP_REQUEST_DURATION
            .with_label_values(&[method, endpoint, &status.to_string()])
            .observe(self.start.elapsed().as_secs_f64());
    }

    pub fn observe_dataset_fetch(self) {
        DATASET_FETCH_DURATION.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Helper functions for recording metrics
pub mod helpers {
    use super::*;

    pub fn record_http_request(method: &str, endpoint: &str, status: u16) {
        let status_str = status.to_string();
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[method, endpoint, &status_str])
            .inc();
    }

    pub fn record_response_size(endpoint: &str, size: usize) {
        HTTP_RESPONSE_SIZE_BYTES
            .with_label_values(&[endpoint])
            .observe(size as f64);
    }

    pub fn record_data_served(endpoint: &str, bytes: usize, points: usize) {
        DATA_BYTES_SERVED
            .with_label_values(&[endpoint])
            .inc_by(bytes as f64);

        DATA_POINTS_SERVED
            .with_label_values(&[endpoint])
            .inc_by(points as f64);
    }

    pub fn record_fetch_failure(endpoint: &str, kind: &str) {
        FETCH_FAILURES_TOTAL
            .with_label_values(&[endpoint, kind])
            .inc();
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> anyhow::Result<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

/// Middleware for tracking HTTP requests
pub struct MetricsMiddleware {
    pub timer: Timer,
    pub method: String,
    pub endpoint: String,
}

impl MetricsMiddleware {
    pub fn new(method: &str, endpoint: &str) -> Self {
        Self {
            timer: Timer::start(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn complete(self, status: u16, response_size: usize) {
        helpers::record_http_request(&self.method, &self.endpoint, status);
        helpers::record_response_size(&self.endpoint, response_size);
        self.timer.observe_http_request(&self.method, &self.endpoint, status);
    }
}
