//! Flag client evaluating definitions read from a persistent data store.
//!
//! Only variation selection is performed: a definition with a `variations`
//! array serves its `offVariation` when off and its fallthrough variation when
//! on; any other JSON value is served as-is. Targeting rules are not applied.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::{ErrorKind, EvalError};
use crate::store::{DataKind, PersistentDataStore};

/// Why a flag evaluated to the value it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    Off,
    Fallthrough,
    Error {
        #[serde(rename = "errorKind")]
        error_kind: ErrorKind,
    },
}

impl EvaluationReason {
    /// The reason's `kind` as it appears in JSON.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluationReason::Off => "OFF",
            EvaluationReason::Fallthrough => "FALLTHROUGH",
            EvaluationReason::Error { .. } => "ERROR",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EvaluationReason::Error { .. })
    }
}

/// An evaluated value together with the variation served and the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationDetail<T> {
    pub value: T,
    #[serde(rename = "variationIndex", skip_serializing_if = "Option::is_none")]
    pub variation_index: Option<usize>,
    pub reason: EvaluationReason,
}

impl<T> EvaluationDetail<T> {
    /// The detail reported when evaluation failed and the default was served.
    pub fn error(default: T, err: &EvalError) -> Self {
        Self {
            value: default,
            variation_index: None,
            reason: EvaluationReason::Error {
                error_kind: err.error_kind(),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariationFlag {
    #[serde(default)]
    on: bool,
    variations: Vec<Value>,
    off_variation: Option<usize>,
    #[serde(default)]
    fallthrough: Fallthrough,
}

#[derive(Deserialize, Default)]
struct Fallthrough {
    variation: Option<usize>,
}

/// Select the value a definition serves. `None` means "serve the default".
fn resolve(key: &str, definition: Value) -> Result<EvaluationDetail<Option<Value>>, EvalError> {
    let has_variations = definition
        .as_object()
        .is_some_and(|obj| obj.contains_key("variations"));
    if !has_variations {
        return Ok(EvaluationDetail {
            value: Some(definition),
            variation_index: None,
            reason: EvaluationReason::Fallthrough,
        });
    }

    let malformed = |reason: String| EvalError::MalformedFlag {
        key: key.to_string(),
        reason,
    };
    let flag: VariationFlag =
        serde_json::from_value(definition).map_err(|e| malformed(e.to_string()))?;

    let (index, reason) = if flag.on {
        let index = flag
            .fallthrough
            .variation
            .ok_or_else(|| malformed("fallthrough has no variation".to_string()))?;
        (Some(index), EvaluationReason::Fallthrough)
    } else {
        (flag.off_variation, EvaluationReason::Off)
    };

    let value = match index {
        Some(i) => Some(
            flag.variations
                .get(i)
                .cloned()
                .ok_or_else(|| malformed(format!("variation index {} out of range", i)))?,
        ),
        None => None,
    };
    Ok(EvaluationDetail {
        value,
        variation_index: index,
        reason,
    })
}

/// Evaluates flags against a persistent data store.
///
/// The client is an ordinary owned value: construct one per process (or per
/// batch of requests) and pass it to whatever needs evaluations.
pub struct FlagClient {
    store: Arc<dyn PersistentDataStore>,
}

impl FlagClient {
    pub fn new(store: Arc<dyn PersistentDataStore>) -> Self {
        if !store.capabilities().supports_writes() {
            tracing::debug!("flag client using a read-only data store, data is updated externally");
        }
        Self { store }
    }

    pub fn initialized(&self) -> bool {
        self.store.is_initialized()
    }

    pub fn store(&self) -> &Arc<dyn PersistentDataStore> {
        &self.store
    }

    fn evaluate(
        &self,
        flag_key: &str,
        context: &Context,
    ) -> Result<EvaluationDetail<Option<Value>>, EvalError> {
        tracing::debug!(flag_key, context_kind = context.kind(), "evaluating flag");

        let item = self
            .store
            .get(DataKind::Features, flag_key)?
            .filter(|item| !item.deleted)
            .ok_or_else(|| EvalError::FlagNotFound(flag_key.to_string()))?;
        let definition: Value =
            serde_json::from_slice(&item.bytes).map_err(|e| EvalError::MalformedFlag {
                key: flag_key.to_string(),
                reason: e.to_string(),
            })?;
        resolve(flag_key, definition)
    }

    /// Evaluate a string flag, reporting failures to the caller.
    pub fn string_variation_detail(
        &self,
        flag_key: &str,
        context: &Context,
        default: &str,
    ) -> Result<EvaluationDetail<String>, EvalError> {
        let detail = self.evaluate(flag_key, context)?;
        let value = match detail.value {
            None => default.to_string(),
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(EvalError::WrongType {
                    key: flag_key.to_string(),
                    expected: "string",
                })
            }
        };
        Ok(EvaluationDetail {
            value,
            variation_index: detail.variation_index,
            reason: detail.reason,
        })
    }

    /// Evaluate a flag of any JSON type.
    pub fn json_variation_detail(
        &self,
        flag_key: &str,
        context: &Context,
        default: Value,
    ) -> Result<EvaluationDetail<Value>, EvalError> {
        let detail = self.evaluate(flag_key, context)?;
        Ok(EvaluationDetail {
            value: detail.value.unwrap_or(default),
            variation_index: detail.variation_index,
            reason: detail.reason,
        })
    }

    /// Evaluate a string flag, serving `default` on any failure.
    pub fn string_variation(&self, flag_key: &str, context: &Context, default: &str) -> String {
        match self.string_variation_detail(flag_key, context, default) {
            Ok(detail) => detail.value,
            Err(e) => {
                tracing::warn!(flag_key, error = %e, "flag evaluation failed, serving default");
                default.to_string()
            }
        }
    }

    /// The value every flag currently serves. Flags that are off without an
    /// off variation are reported as `null`.
    pub fn all_flag_values(&self) -> Result<BTreeMap<String, Value>, EvalError> {
        let mut values = BTreeMap::new();
        for keyed in self.store.get_all(DataKind::Features)? {
            if keyed.item.deleted {
                continue;
            }
            let definition: Value =
                serde_json::from_slice(&keyed.item.bytes).map_err(|e| EvalError::MalformedFlag {
                    key: keyed.key.clone(),
                    reason: e.to_string(),
                })?;
            let detail = resolve(&keyed.key, definition)?;
            values.insert(keyed.key, detail.value.unwrap_or(Value::Null));
        }
        Ok(values)
    }

    pub fn close(&self) {
        if let Err(e) = self.store.close() {
            tracing::warn!(error = %e, "failed to close data store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::KvError;
    use crate::kv::{KvStore, MemoryKv};
    use crate::kv_data_store::KvDataStore;
    use serde_json::json;

    fn client_with(record: &str) -> FlagClient {
        let kv = Arc::new(MemoryKv::new());
        kv.insert("launchdarkly", "LD-Env-abc", record).unwrap();
        FlagClient::new(Arc::new(KvDataStore::new(kv, "abc", "launchdarkly")))
    }

    fn user() -> Context {
        Context::new("user-123").unwrap()
    }

    #[test]
    fn test_plain_value_is_served_as_fallthrough() {
        let client = client_with(r#"{"flags":{"animal":"cat"}}"#);
        let detail = client
            .string_variation_detail("animal", &user(), "default")
            .unwrap();
        assert_eq!(detail.value, "cat");
        assert_eq!(detail.reason, EvaluationReason::Fallthrough);
        assert_eq!(detail.variation_index, None);
    }

    #[test]
    fn test_variation_flag_on_serves_fallthrough_variation() {
        let client = client_with(
            r#"{"flags":{"animal":{"key":"animal","on":true,"variations":["cat","dog"],"offVariation":0,"fallthrough":{"variation":1},"version":4}}}"#,
        );
        let detail = client
            .string_variation_detail("animal", &user(), "default")
            .unwrap();
        assert_eq!(detail.value, "dog");
        assert_eq!(detail.variation_index, Some(1));
        assert_eq!(detail.reason, EvaluationReason::Fallthrough);
    }

    #[test]
    fn test_variation_flag_off() {
        let client = client_with(
            r#"{"flags":{"a":{"on":false,"variations":["cat","dog"],"offVariation":0},"b":{"on":false,"variations":["cat"]}}}"#,
        );
        let detail = client.string_variation_detail("a", &user(), "default").unwrap();
        assert_eq!(detail.value, "cat");
        assert_eq!(detail.reason, EvaluationReason::Off);

        // no off variation: the caller's default is served
        let detail = client.string_variation_detail("b", &user(), "default").unwrap();
        assert_eq!(detail.value, "default");
        assert_eq!(detail.variation_index, None);
        assert_eq!(detail.reason, EvaluationReason::Off);
    }

    #[test]
    fn test_malformed_variation_flags() {
        let client = client_with(
            r#"{"flags":{"range":{"on":true,"variations":["cat"],"fallthrough":{"variation":3}},"nofall":{"on":true,"variations":["cat"]},"badvars":{"variations":"cat"}}}"#,
        );
        for key in ["range", "nofall", "badvars"] {
            let err = client.string_variation_detail(key, &user(), "d").unwrap_err();
            assert_eq!(err.error_kind(), ErrorKind::MalformedFlag, "flag {}", key);
        }
    }

    #[test]
    fn test_unknown_flag_and_wrong_type() {
        let client = client_with(r#"{"flags":{"count":3}}"#);
        let err = client.string_variation_detail("animal", &user(), "d").unwrap_err();
        assert!(matches!(err, EvalError::FlagNotFound(ref k) if k == "animal"));

        let err = client.string_variation_detail("count", &user(), "d").unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::WrongType);

        let detail = client.json_variation_detail("count", &user(), json!(0)).unwrap();
        assert_eq!(detail.value, json!(3));
    }

    #[test]
    fn test_store_fault_falls_back_to_default() {
        let kv = Arc::new(MemoryKv::new());
        let client = FlagClient::new(Arc::new(KvDataStore::new(kv, "abc", "launchdarkly")));
        assert!(!client.initialized());
        let err = client.string_variation_detail("animal", &user(), "d").unwrap_err();
        assert!(matches!(err, EvalError::Store(_)));
        assert_eq!(client.string_variation("animal", &user(), "fallback"), "fallback");

        let detail = EvaluationDetail::error("fallback".to_string(), &err);
        assert_eq!(
            serde_json::to_value(&detail).unwrap(),
            json!({"value": "fallback", "reason": {"kind": "ERROR", "errorKind": "EXCEPTION"}})
        );
    }

    #[test]
    fn test_all_flag_values() {
        let client = client_with(
            r#"{"flags":{"animal":"cat","size":{"on":true,"variations":[1,2],"fallthrough":{"variation":0}},"dark":{"on":false,"variations":[true,false]}}}"#,
        );
        let values = client.all_flag_values().unwrap();
        assert_eq!(values.get("animal"), Some(&json!("cat")));
        assert_eq!(values.get("size"), Some(&json!(1)));
        assert_eq!(values.get("dark"), Some(&Value::Null));
    }

    /// Counts `open` calls made against an in-memory kv store.
    struct CountingKv {
        inner: MemoryKv,
        opens: AtomicUsize,
    }

    impl KvStore for CountingKv {
        fn open(&self, store: &str) -> Result<(), KvError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open(store)
        }

        fn lookup(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
            self.inner.lookup(store, key)
        }
    }

    #[test]
    fn test_evaluation_opens_store_once() {
        let inner = MemoryKv::new();
        inner
            .insert("launchdarkly", "LD-Env-abc", r#"{"flags":{"animal":"cat"}}"#)
            .unwrap();
        let kv = Arc::new(CountingKv {
            inner,
            opens: AtomicUsize::new(0),
        });
        let store = KvDataStore::new(Arc::clone(&kv) as Arc<dyn KvStore>, "abc", "launchdarkly");
        let client = FlagClient::new(Arc::new(store));

        assert_eq!(client.string_variation("animal", &user(), "d"), "cat");
        assert_eq!(kv.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detail_json_shape() {
        let detail = EvaluationDetail {
            value: "dog".to_string(),
            variation_index: Some(1),
            reason: EvaluationReason::Fallthrough,
        };
        assert_eq!(
            serde_json::to_value(&detail).unwrap(),
            json!({"value": "dog", "variationIndex": 1, "reason": {"kind": "FALLTHROUGH"}})
        );
    }
}
