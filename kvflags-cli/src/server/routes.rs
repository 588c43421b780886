use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use kvflags_lib::EvalError;

use super::metrics::metrics;
use super::response::render_evaluation;
use super::state::AppState;

fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "This method is not allowed\n").into_response()
}

fn internal_error(body: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}

/// How the environment record read behind an evaluation went. Failures
/// after a successful read (wrong type, malformed flag) still count as `ok`.
fn store_read_outcome<T>(evaluation: &Result<T, EvalError>) -> &'static str {
    match evaluation {
        Ok(_) => "ok",
        Err(EvalError::FlagNotFound(_)) => "not_found",
        Err(EvalError::Store(_)) => "error",
        Err(_) => "ok",
    }
}

// ── Any path: evaluate the configured flag ───────────────────

pub async fn handle_evaluate(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if matches!(
        method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) {
        return method_not_allowed();
    }

    let flag_key = state.settings.flag_key.clone();
    let trace_id = state.runtime.trace_id(&headers);
    let context = match state
        .runtime
        .evaluation_context(&state.settings.user_key, &trace_id)
    {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "failed to build evaluation context");
            return internal_error(format!("Error building evaluation context: {}\n", e));
        }
    };

    let start = Instant::now();
    let eval_state = Arc::clone(&state);
    let eval_context = context.clone();
    let result = tokio::task::spawn_blocking(move || {
        eval_state.client.string_variation_detail(
            &eval_state.settings.flag_key,
            &eval_context,
            &eval_state.settings.default_value,
        )
    })
    .await;

    let m = metrics();
    m.eval_duration
        .with_label_values(&[&flag_key])
        .observe(start.elapsed().as_secs_f64());

    let outcome = match &result {
        Ok(evaluation) => store_read_outcome(evaluation),
        Err(_) => "error",
    };
    m.store_reads_total.with_label_values(&[outcome]).inc();

    let detail = match result {
        Ok(Ok(detail)) => detail,
        Ok(Err(e)) => {
            tracing::error!(flag = %flag_key, trace_id = %trace_id, error = %e, "error getting flag");
            m.eval_errors
                .with_label_values(&[&flag_key, e.error_kind().as_str()])
                .inc();
            return internal_error(format!("Error getting {}: {}", flag_key, e));
        }
        Err(e) => {
            tracing::error!(flag = %flag_key, error = %e, "evaluation task failed");
            return internal_error(format!("Error getting {}\n", flag_key));
        }
    };

    m.eval_total
        .with_label_values(&[&flag_key, detail.reason.kind()])
        .inc();

    match render_evaluation(&flag_key, &detail, &context, &state.runtime.service_version) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "error encoding response");
            internal_error("Error encoding response\n".to_string())
        }
    }
}
