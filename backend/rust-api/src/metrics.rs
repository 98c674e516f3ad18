use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // Session store
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "session_store_operations_total",
        "Total number of session store operations",
        &["backend", "operation", "status"]
    )
    .unwrap();

    // Quiz
    pub static ref QUIZ_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_sessions_total",
        "Total number of quiz sessions by outcome",
        &["status"]
    )
    .unwrap();

    pub static ref QUIZ_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "quiz_sessions_active",
        "Number of live quiz sessions in the session store, sampled on scrape"
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct", "phase"]
    )
    .unwrap();

    pub static ref QUESTIONS_GENERATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "questions_generated_total",
        "Total number of questions generated",
        &["kind", "category"]
    )
    .unwrap();

    // Generative model
    pub static ref MODEL_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "model_calls_total",
        "Total number of generative model calls",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref MODEL_CALL_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "model_call_duration_seconds",
        "Generative model call duration in seconds",
        &["operation"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    pub static ref GENERATION_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "generation_retries_total",
        "Total number of retried generation attempts",
        &["operation"]
    )
    .unwrap();

    pub static ref DRIVING_ANALYSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "driving_analyses_total",
        "Total number of driving performance analyses",
        &["mode", "status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a generative model call with metrics
pub async fn track_model_call<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    MODEL_CALLS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    MODEL_CALL_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

/// Helper: count a session store operation
pub fn record_store_operation(backend: &str, operation: &str, ok: bool) {
    let status = if ok { "success" } else { "error" };
    STORE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation, status])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = QUIZ_SESSIONS_ACTIVE.get();
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
    }

    #[tokio::test]
    async fn track_model_call_counts_failures() {
        let before = MODEL_CALLS_TOTAL
            .with_label_values(&["metrics_test", "error"])
            .get();

        let result: Result<(), &str> = track_model_call("metrics_test", async { Err("boom") }).await;

        assert!(result.is_err());
        assert_eq!(
            MODEL_CALLS_TOTAL
                .with_label_values(&["metrics_test", "error"])
                .get(),
            before + 1
        );
    }
}
