use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};
use log::info;

/// Общее количество HTTP запросов
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "devproxy_http_requests_total",
        "Total HTTP requests",
        &["method", "status", "route"]
    )
    .expect("Failed to register devproxy_http_requests_total metric")
});

/// Длительность обработки HTTP запросов
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "devproxy_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["route"]
    )
    .expect("Failed to register devproxy_http_request_duration_seconds metric")
});

/// Неудачные подключения к upstream
pub static UPSTREAM_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "devproxy_upstream_errors_total",
        "Total upstream connection failures",
        &["context"]
    )
    .expect("Failed to register devproxy_upstream_errors_total metric")
});

/// Инициализация метрик
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&UPSTREAM_ERRORS);
    info!("Prometheus metrics initialized");
}

/// Учитывает завершенный запрос
pub fn record_request(method: &str, status: u16, route: &str, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string(), route])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration_secs);
}
