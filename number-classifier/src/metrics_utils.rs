use axum::{routing, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const REQUESTS_COUNTER: &str = "classifier_requests_total";
pub const MALFORMED_REQUESTS_COUNTER: &str = "classifier_malformed_requests_total";
pub const CACHE_HITS_COUNTER: &str = "classifier_cache_hits_total";
pub const CACHE_MISSES_COUNTER: &str = "classifier_cache_misses_total";
pub const STORE_HITS_COUNTER: &str = "classifier_store_hits_total";
pub const COMPUTED_COUNTER: &str = "classifier_computed_total";
pub const INVALID_COMMANDS_COUNTER: &str = "classifier_invalid_commands_total";
pub const INTERNAL_ERRORS_COUNTER: &str = "classifier_internal_errors_total";
pub const PUBLISH_ERRORS_COUNTER: &str = "classifier_publish_errors_total";
pub const LOG_APPENDS_COUNTER: &str = "classifier_log_appends_total";
pub const LOG_READS_COUNTER: &str = "classifier_log_reads_total";

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn app(metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(|| async { "ok" }))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
}

pub async fn index() -> &'static str {
    "number-classifier"
}
