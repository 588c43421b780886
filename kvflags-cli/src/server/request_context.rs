use std::env;

use axum::http::HeaderMap;
use kvflags_lib::{Context, ContextBuilder, ContextError, MultiContextBuilder};

/// Kind of the per-request context added next to the user context.
pub const REQUEST_KIND: &str = "fastly-request";

/// Facts about the hosting runtime, read from its environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub service_version: String,
    pub service_id: String,
    pub pop: String,
    pub region: String,
    pub hostname: String,
    pub trace_id: Option<String>,
}

impl RuntimeInfo {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| var(name).unwrap_or_default();
        Self {
            service_version: get("FASTLY_SERVICE_VERSION"),
            service_id: get("FASTLY_SERVICE_ID"),
            pop: get("FASTLY_POP"),
            region: get("FASTLY_REGION"),
            hostname: get("FASTLY_HOSTNAME"),
            trace_id: var("FASTLY_TRACE_ID").filter(|id| !id.is_empty()),
        }
    }

    pub fn is_local(&self) -> bool {
        self.hostname == "localhost"
    }

    /// Trace id for a request: request headers first, then the runtime's
    /// trace id, then `unknown`.
    pub fn trace_id(&self, headers: &HeaderMap) -> String {
        ["fastly-trace-id", "x-request-id"]
            .iter()
            .find_map(|name| {
                headers
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .or_else(|| self.trace_id.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// The evaluation context for one request: the configured user plus a
    /// request context carrying the runtime's identity.
    pub fn evaluation_context(&self, user_key: &str, trace_id: &str) -> Result<Context, ContextError> {
        let request = ContextBuilder::new(trace_id)
            .kind(REQUEST_KIND)
            .set_string("fastly_service_version", &self.service_version)
            .set_string("fastly_pop", &self.pop)
            .set_string("fastly_region", &self.region)
            .set_string("fastly_service_id", &self.service_id)
            .build()?;
        MultiContextBuilder::new()
            .add(Context::new(user_key)?)
            .add(request)
            .build()
    }
}
