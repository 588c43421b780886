//! Feature flags read from a read-only key-value store.
//!
//! Flag data for an environment is synchronized out-of-band into a kv store
//! as one JSON document under `LD-Env-<client side id>`. [`KvDataStore`]
//! exposes that document through the [`PersistentDataStore`] contract and
//! [`FlagClient`] evaluates flags on top of it.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use kvflags_lib::kv::MemoryKv;
//! use kvflags_lib::{Context, FlagClient, KvDataStore};
//!
//! let kv = Arc::new(MemoryKv::new());
//! kv.insert("launchdarkly", "LD-Env-abc", r#"{"flags":{"animal":"cat"}}"#).unwrap();
//!
//! let store = KvDataStore::builder()
//!     .client_side_id("abc")
//!     .kv_store_name("launchdarkly")
//!     .build(kv)
//!     .unwrap();
//! let client = FlagClient::new(Arc::new(store));
//!
//! let ctx = Context::new("user-123").unwrap();
//! assert_eq!(client.string_variation("animal", &ctx, "default"), "cat");
//! ```

use std::sync::Arc;

use wasm_bindgen::prelude::wasm_bindgen;

pub mod client;
pub mod context;
pub mod error;
pub mod kv;
pub mod kv_data_store;
pub mod record;
pub mod store;

pub use client::{EvaluationDetail, EvaluationReason, FlagClient};
pub use context::{Context, ContextBuilder, MultiContextBuilder, SingleContext};
pub use error::{ContextError, DataStoreError, ErrorKind, EvalError, KvError};
pub use kv::{KvStore, MemoryKv};
pub use kv_data_store::{KvDataStore, KvDataStoreBuilder};
pub use record::{env_key, EnvironmentRecord, ENV_KEY_PREFIX};
pub use store::{
    Capabilities, DataKind, KeyedSerializedItem, PersistentDataStore, SerializedCollection,
    SerializedItem,
};

const INLINE_STORE: &str = "inline";
const INLINE_ENV: &str = "inline";

/// Evaluates a string flag from an environment record passed in as JSON and
/// returns the evaluation detail as JSON. Failures are reported as an
/// `ERROR` reason with `default_value` served.
#[wasm_bindgen]
pub fn evaluate_record(record: &str, flag_key: &str, default_value: &str) -> String {
    let detail = evaluate_inline(record, flag_key, default_value)
        .unwrap_or_else(|e| EvaluationDetail::error(default_value.to_string(), &e));
    serde_json::to_string(&detail).unwrap_or_default()
}

fn evaluate_inline(
    record: &str,
    flag_key: &str,
    default_value: &str,
) -> Result<EvaluationDetail<String>, EvalError> {
    let kv = Arc::new(MemoryKv::new());
    kv.insert(INLINE_STORE, &env_key(INLINE_ENV), record)
        .map_err(|source| DataStoreError::StoreUnreachable {
            store: INLINE_STORE.to_string(),
            source,
        })?;
    let client = FlagClient::new(Arc::new(KvDataStore::new(kv, INLINE_ENV, INLINE_STORE)));
    let context = Context::new("anonymous")?;
    client.string_variation_detail(flag_key, &context, default_value)
}
