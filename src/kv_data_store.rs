//! Read-only persistent data store over an external kv store.
//!
//! Flag data for an environment lives in one JSON document under
//! `LD-Env-<client side id>`. Every read fetches and parses the whole
//! document; nothing is cached between calls. Writes are rejected because the
//! document is maintained by an external synchronization process.

use std::sync::Arc;

use crate::error::DataStoreError;
use crate::kv::KvStore;
use crate::record::{env_key, serialize_item, EnvironmentRecord};
use crate::store::{
    Capabilities, DataKind, KeyedSerializedItem, PersistentDataStore, SerializedCollection,
    SerializedItem,
};

/// Configures a [`KvDataStore`]. Both parameters are required.
///
/// ```
/// use std::sync::Arc;
/// use kvflags_lib::kv::MemoryKv;
/// use kvflags_lib::KvDataStoreBuilder;
///
/// let kv = Arc::new(MemoryKv::new());
/// let store = KvDataStoreBuilder::new()
///     .client_side_id("abc")
///     .kv_store_name("launchdarkly")
///     .build(kv)
///     .unwrap();
/// assert_eq!(store.record_key(), "LD-Env-abc");
/// ```
#[derive(Debug, Default, Clone)]
pub struct KvDataStoreBuilder {
    client_side_id: Option<String>,
    kv_store_name: Option<String>,
}

impl KvDataStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_side_id(mut self, client_side_id: &str) -> Self {
        self.client_side_id = Some(client_side_id.to_string());
        self
    }

    pub fn kv_store_name(mut self, kv_store_name: &str) -> Self {
        self.kv_store_name = Some(kv_store_name.to_string());
        self
    }

    pub fn build(self, kv: Arc<dyn KvStore>) -> Result<KvDataStore, DataStoreError> {
        let client_side_id = self
            .client_side_id
            .filter(|s| !s.is_empty())
            .ok_or(DataStoreError::MissingParameter("client_side_id"))?;
        let kv_store_name = self
            .kv_store_name
            .filter(|s| !s.is_empty())
            .ok_or(DataStoreError::MissingParameter("kv_store_name"))?;
        Ok(KvDataStore::new(kv, &client_side_id, &kv_store_name))
    }
}

/// Persistent data store reading one environment record from a kv store.
pub struct KvDataStore {
    kv: Arc<dyn KvStore>,
    kv_store_name: String,
    record_key: String,
}

impl KvDataStore {
    pub fn new(kv: Arc<dyn KvStore>, client_side_id: &str, kv_store_name: &str) -> Self {
        Self {
            kv,
            kv_store_name: kv_store_name.to_string(),
            record_key: env_key(client_side_id),
        }
    }

    pub fn builder() -> KvDataStoreBuilder {
        KvDataStoreBuilder::new()
    }

    /// The kv key this store reads from.
    pub fn record_key(&self) -> &str {
        &self.record_key
    }

    pub fn kv_store_name(&self) -> &str {
        &self.kv_store_name
    }

    fn unreachable(&self, source: crate::error::KvError) -> DataStoreError {
        DataStoreError::StoreUnreachable {
            store: self.kv_store_name.clone(),
            source,
        }
    }

    /// Fetch and parse the full environment record.
    fn load_record(&self) -> Result<EnvironmentRecord, DataStoreError> {
        self.kv
            .open(&self.kv_store_name)
            .map_err(|e| self.unreachable(e))?;
        let bytes = self
            .kv
            .lookup(&self.kv_store_name, &self.record_key)
            .map_err(|e| self.unreachable(e))?
            .ok_or_else(|| DataStoreError::RecordNotFound {
                store: self.kv_store_name.clone(),
                key: self.record_key.clone(),
            })?;
        EnvironmentRecord::from_slice(&self.record_key, &bytes)
    }

    fn reject(&self, operation: &'static str) -> DataStoreError {
        tracing::debug!(
            store = %self.kv_store_name,
            operation,
            "write rejected by read-only kv data store"
        );
        DataStoreError::Unsupported { operation }
    }
}

impl PersistentDataStore for KvDataStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadOnly
    }

    fn init(&self, _all_data: &[SerializedCollection]) -> Result<(), DataStoreError> {
        Err(self.reject("init"))
    }

    fn get(&self, kind: DataKind, key: &str) -> Result<Option<SerializedItem>, DataStoreError> {
        tracing::debug!(store = %self.kv_store_name, record = %self.record_key, %kind, key, "get item");
        let record = self.load_record().inspect_err(|e| {
            tracing::warn!(store = %self.kv_store_name, error = %e, "failed to load environment record");
        })?;
        match record.items(kind).get(key) {
            Some(definition) => serialize_item(key, definition).map(Some),
            None => Ok(None),
        }
    }

    fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedSerializedItem>, DataStoreError> {
        tracing::debug!(store = %self.kv_store_name, record = %self.record_key, %kind, "get all items");
        let record = self.load_record().inspect_err(|e| {
            tracing::warn!(store = %self.kv_store_name, error = %e, "failed to load environment record");
        })?;
        record
            .items(kind)
            .iter()
            .map(|(key, definition)| {
                Ok(KeyedSerializedItem {
                    key: key.clone(),
                    item: serialize_item(key, definition)?,
                })
            })
            .collect()
    }

    fn upsert(
        &self,
        _kind: DataKind,
        _key: &str,
        _item: SerializedItem,
    ) -> Result<bool, DataStoreError> {
        Err(self.reject("upsert"))
    }

    /// Reachability of the kv store, not whether this process wrote to it.
    fn is_initialized(&self) -> bool {
        self.is_store_available()
    }

    fn is_store_available(&self) -> bool {
        tracing::debug!(store = %self.kv_store_name, "checking kv store availability");
        self.kv.open(&self.kv_store_name).is_ok()
    }

    fn close(&self) -> Result<(), DataStoreError> {
        tracing::debug!(store = %self.kv_store_name, "closing kv data store, nothing to release");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvError;
    use crate::kv::MemoryKv;
    use serde_json::{json, Value};

    fn store_with(record: &str) -> KvDataStore {
        let kv = Arc::new(MemoryKv::new());
        kv.insert("launchdarkly", "LD-Env-abc", record).unwrap();
        KvDataStore::new(kv, "abc", "launchdarkly")
    }

    /// A kv client whose every call fails, like an unreachable backend.
    struct FailingKv;

    impl KvStore for FailingKv {
        fn open(&self, _store: &str) -> Result<(), KvError> {
            Err(KvError::Backend("connection refused".into()))
        }

        fn lookup(&self, _store: &str, _key: &str) -> Result<Option<Vec<u8>>, KvError> {
            Err(KvError::Backend("connection refused".into()))
        }
    }

    #[test]
    fn test_builder_requires_both_parameters() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let err = KvDataStoreBuilder::new()
            .kv_store_name("launchdarkly")
            .build(Arc::clone(&kv))
            .err()
            .unwrap();
        assert!(matches!(err, DataStoreError::MissingParameter("client_side_id")));

        let err = KvDataStoreBuilder::new()
            .client_side_id("abc")
            .kv_store_name("")
            .build(kv)
            .err()
            .unwrap();
        assert!(matches!(err, DataStoreError::MissingParameter("kv_store_name")));
    }

    #[test]
    fn test_get_found_and_not_found() {
        let store = store_with(r#"{"flags":{"animal":"cat"}}"#);
        let item = store.get(DataKind::Features, "animal").unwrap().unwrap();
        let value: Value = serde_json::from_slice(&item.bytes).unwrap();
        assert_eq!(value, json!("cat"));
        assert!(store.get(DataKind::Features, "color").unwrap().is_none());
    }

    #[test]
    fn test_get_all_returns_every_flag() {
        let store = store_with(r#"{"flags":{"animal":"cat","size":{"key":"size","version":2}}}"#);
        let mut items = store.get_all(DataKind::Features).unwrap();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "animal");
        assert_eq!(items[1].item.version, 2);
    }

    #[test]
    fn test_get_all_empty_flags_is_not_an_error() {
        let store = store_with(r#"{"flags":{}}"#);
        assert!(store.get_all(DataKind::Features).unwrap().is_empty());
    }

    #[test]
    fn test_segments_kind_reads_segments_mapping() {
        let store = store_with(r#"{"flags":{"animal":"cat"},"segments":{"beta":{"version":1}}}"#);
        assert!(store.get(DataKind::Segments, "animal").unwrap().is_none());
        assert!(store.get(DataKind::Segments, "beta").unwrap().is_some());
    }

    #[test]
    fn test_flag_reads_ignore_invalid_segments() {
        let store = store_with(r#"{"flags":{"animal":"cat"},"segments":[]}"#);
        let item = store.get(DataKind::Features, "animal").unwrap().unwrap();
        assert_eq!(item.bytes, b"\"cat\"");
        assert_eq!(store.get_all(DataKind::Features).unwrap().len(), 1);
        assert!(store.get_all(DataKind::Segments).unwrap().is_empty());
    }

    #[test]
    fn test_missing_record_is_a_fault() {
        let kv = Arc::new(MemoryKv::new());
        kv.create_store("launchdarkly").unwrap();
        let store = KvDataStore::new(kv, "abc", "launchdarkly");
        let err = store.get(DataKind::Features, "animal").unwrap_err();
        assert!(matches!(err, DataStoreError::RecordNotFound { ref key, .. } if key == "LD-Env-abc"));
        assert!(store.get_all(DataKind::Features).is_err());
        // the store itself is reachable
        assert!(store.is_store_available());
    }

    #[test]
    fn test_malformed_record_is_a_fault() {
        let store = store_with("{\"flags\":");
        assert!(matches!(
            store.get(DataKind::Features, "animal"),
            Err(DataStoreError::MalformedRecord { .. })
        ));
        assert!(matches!(
            store.get_all(DataKind::Features),
            Err(DataStoreError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_unreachable_store() {
        let store = KvDataStore::new(Arc::new(FailingKv), "abc", "launchdarkly");
        assert!(!store.is_store_available());
        assert!(!store.is_initialized());
        assert!(matches!(
            store.get(DataKind::Features, "animal"),
            Err(DataStoreError::StoreUnreachable { .. })
        ));
        assert!(matches!(
            store.get_all(DataKind::Features),
            Err(DataStoreError::StoreUnreachable { .. })
        ));
    }

    #[test]
    fn test_unknown_store_name_is_unreachable() {
        let store = KvDataStore::new(Arc::new(MemoryKv::new()), "abc", "launchdarkly");
        assert!(!store.is_store_available());
        let err = store.get(DataKind::Features, "animal").unwrap_err();
        assert!(matches!(
            err,
            DataStoreError::StoreUnreachable { source: KvError::StoreNotFound(_), .. }
        ));
    }

    #[test]
    fn test_writes_are_rejected_and_do_not_mutate() {
        let store = store_with(r#"{"flags":{"animal":"cat"}}"#);
        assert_eq!(store.capabilities(), Capabilities::ReadOnly);

        let err = store
            .upsert(DataKind::Features, "animal", SerializedItem::new(9, b"\"dog\"".to_vec()))
            .unwrap_err();
        assert!(err.is_unsupported());

        let err = store
            .init(&[SerializedCollection {
                kind: DataKind::Features,
                items: vec![],
            }])
            .unwrap_err();
        assert!(err.is_unsupported());

        let item = store.get(DataKind::Features, "animal").unwrap().unwrap();
        assert_eq!(item.bytes, b"\"cat\"");
        assert_eq!(store.get_all(DataKind::Features).unwrap().len(), 1);
    }

    #[test]
    fn test_reads_are_not_cached() {
        let kv = Arc::new(MemoryKv::new());
        kv.insert("launchdarkly", "LD-Env-abc", r#"{"flags":{"animal":"cat"}}"#)
            .unwrap();
        let store = KvDataStore::new(Arc::clone(&kv) as Arc<dyn KvStore>, "abc", "launchdarkly");
        assert!(store.get(DataKind::Features, "animal").unwrap().is_some());

        kv.insert("launchdarkly", "LD-Env-abc", r#"{"flags":{"color":"red"}}"#)
            .unwrap();
        assert!(store.get(DataKind::Features, "animal").unwrap().is_none());
        assert!(store.get(DataKind::Features, "color").unwrap().is_some());
    }

    #[test]
    fn test_close_is_a_no_op() {
        let store = store_with(r#"{"flags":{"animal":"cat"}}"#);
        store.close().unwrap();
        assert!(store.get(DataKind::Features, "animal").unwrap().is_some());
    }
}
