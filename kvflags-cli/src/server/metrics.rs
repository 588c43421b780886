use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::{MatchedPath, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::state::AppState;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// `path` label of requests served by the fallback route.
pub const FALLBACK_PATH_LABEL: &str = "fallback";

/// Global metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// All application metrics
pub struct Metrics {
    // Eval metrics
    pub eval_total: IntCounterVec,
    pub eval_duration: HistogramVec,
    pub eval_errors: IntCounterVec,

    // Store metrics
    pub store_reads_total: IntCounterVec,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new(registry: &Registry) -> Self {
        // ── Eval metrics ─────────────────────────────────────────────
        let eval_total = IntCounterVec::new(
            Opts::new("kvflags_eval_total", "Total number of flag evaluations"),
            &["flag", "reason"],
        )
        .expect("failed to create eval_total metric");

        let eval_duration = HistogramVec::new(
            HistogramOpts::new(
                "kvflags_eval_duration_seconds",
                "Duration of flag evaluations, including the kv read",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["flag"],
        )
        .expect("failed to create eval_duration metric");

        let eval_errors = IntCounterVec::new(
            Opts::new("kvflags_eval_errors_total", "Total number of flag evaluation errors"),
            &["flag", "error_kind"],
        )
        .expect("failed to create eval_errors metric");

        // ── Store metrics ─────────────────────────────────────────────
        let store_reads_total = IntCounterVec::new(
            Opts::new("kvflags_store_reads_total", "Environment record reads by outcome"),
            &["outcome"],
        )
        .expect("failed to create store_reads_total metric");

        // ── HTTP request metrics ──────────────────────────────────────
        let http_requests_total = IntCounterVec::new(
            Opts::new("kvflags_http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("failed to create http_requests_total metric");

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "kvflags_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["method", "path"],
        )
        .expect("failed to create http_request_duration metric");

        registry.register(Box::new(eval_total.clone())).expect("register eval_total");
        registry.register(Box::new(eval_duration.clone())).expect("register eval_duration");
        registry.register(Box::new(eval_errors.clone())).expect("register eval_errors");
        registry.register(Box::new(store_reads_total.clone())).expect("register store_reads_total");
        registry.register(Box::new(http_requests_total.clone())).expect("register http_requests_total");
        registry.register(Box::new(http_request_duration.clone())).expect("register http_request_duration");

        Self {
            eval_total,
            eval_duration,
            eval_errors,
            store_reads_total,
            http_requests_total,
            http_request_duration,
        }
    }
}

/// Get the global metrics instance, initializing on first call
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = REGISTRY.get_or_init(Registry::new);
        Metrics::new(registry)
    })
}

/// GET /metrics: Prometheus text format
pub async fn handle_metrics() -> Response {
    // Ensure all metric collectors are registered on first call.
    let _ = metrics();
    let registry = REGISTRY.get_or_init(Registry::new);
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Axum handler for GET /readyz
///
/// Ready once the flag client reports its data store initialized, i.e. the
/// kv store is reachable.
pub async fn handle_readyz(State(state): State<Arc<AppState>>) -> Response {
    let probe = Arc::clone(&state);
    let initialized = tokio::task::spawn_blocking(move || probe.client.initialized())
        .await
        .unwrap_or(false);

    if !initialized {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({
                "ready": false,
                "reason": "kv store unavailable",
            })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "ready": true,
            "flag": state.settings.flag_key,
        })),
    )
        .into_response()
}

/// Axum middleware that records HTTP request count and duration.
pub async fn track_metrics(request: Request<axum::body::Body>, next: Next) -> Response {
    let method = request.method().to_string();
    // Unmatched paths share one label so clients cannot mint new series.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| FALLBACK_PATH_LABEL.to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let m = metrics();
    m.http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    m.http_request_duration
        .with_label_values(&[&method, &path])
        .observe(elapsed);

    response
}

/// GET /health, always 200
pub async fn handle_health_check() -> Response {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({"status": "ok"})),
    )
        .into_response()
}
