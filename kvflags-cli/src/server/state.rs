use kvflags_lib::FlagClient;

use super::request_context::RuntimeInfo;

/// What the evaluation endpoint evaluates.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    pub flag_key: String,
    pub default_value: String,
    pub user_key: String,
}

/// Shared application state for the HTTP server.
///
/// The flag client is built once at startup and owned here; handlers borrow
/// it through the `Arc<AppState>` axum hands them.
pub struct AppState {
    pub client: FlagClient,
    pub settings: EvalSettings,
    pub runtime: RuntimeInfo,
}
