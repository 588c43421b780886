pub mod config;
pub mod metrics;
pub mod request_context;
pub mod response;
pub mod routes;
pub mod state;
pub mod store;

use std::sync::Arc;

use anyhow::Context as _;
use axum::routing::{any, get};
use axum::Router;
use kvflags_lib::{FlagClient, KvDataStore};
use tower_http::compression::CompressionLayer;

use self::config::KvflagsConfig;
use self::metrics::{handle_health_check, handle_metrics, handle_readyz, track_metrics};
use self::request_context::RuntimeInfo;
use self::routes::handle_evaluate;
use self::state::{AppState, EvalSettings};

/// Routes of the edge service. Every path outside the operational routes
/// evaluates the configured flag.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health_check))
        .route("/readyz", get(handle_readyz))
        .route("/metrics", get(handle_metrics))
        .route("/", any(handle_evaluate))
        .fallback(handle_evaluate)
        .layer(axum::middleware::from_fn(track_metrics))
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Open the configured backend and build the read-only data store for the
/// environment the configuration names.
pub fn open_data_store(config: &KvflagsConfig, is_local: bool) -> anyhow::Result<KvDataStore> {
    let client_side_id = config.client_side_id(is_local).context(
        "no client side id configured, set launchdarkly.client_side_id or KVF_CLIENT_SIDE_ID",
    )?;
    let kv = store::open_backend(config)?;
    let data_store = KvDataStore::builder()
        .client_side_id(&client_side_id)
        .kv_store_name(&config.launchdarkly.kv_store_name)
        .build(kv)?;
    Ok(data_store)
}

pub async fn run_serve(config: KvflagsConfig) -> anyhow::Result<()> {
    let runtime = RuntimeInfo::from_env();
    tracing::info!(
        service_version = %runtime.service_version,
        pop = %runtime.pop,
        local = runtime.is_local(),
        "starting kvflags edge service"
    );

    let data_store = open_data_store(&config, runtime.is_local())?;
    tracing::info!(
        kv_store = %data_store.kv_store_name(),
        record = %data_store.record_key(),
        "reading flags from kv store"
    );

    let client = FlagClient::new(Arc::new(data_store));
    let initialized = tokio::task::spawn_blocking({
        let store = Arc::clone(client.store());
        move || store.is_initialized()
    })
    .await
    .unwrap_or(false);
    if !initialized {
        tracing::warn!("kv store not reachable yet, /readyz will report unavailable");
    }

    let state = Arc::new(AppState {
        client,
        settings: EvalSettings {
            flag_key: config.launchdarkly.flag_key.clone(),
            default_value: config.launchdarkly.default_value.clone(),
            user_key: config.launchdarkly.user_key.clone(),
        },
        runtime,
    });
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.hostname, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!(
        addr = %addr,
        flag = %config.launchdarkly.flag_key,
        "serving on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, finishing in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_data_store_requires_client_side_id() {
        let config = KvflagsConfig::default();
        let err = open_data_store(&config, false).err().unwrap();
        assert!(err.to_string().contains("client side id"));
    }

    #[test]
    fn test_open_data_store_local_mode() {
        let config = KvflagsConfig::parse(
            r#"
[[local_server.kv_stores.launchdarkly]]
key = "LD-Env-local"
data = '{"flags":{"animal":"dog"}}'
"#,
        )
        .unwrap();
        let store = open_data_store(&config, true).unwrap();
        assert_eq!(store.record_key(), "LD-Env-local");
        assert_eq!(store.kv_store_name(), "launchdarkly");
    }
}
