use std::collections::HashMap;
use std::sync::Arc;

use kvflags_lib::kv::MemoryKv;
use kvflags_lib::{
    Context, DataKind, DataStoreError, FlagClient, KvDataStore, KvError, KvStore,
    PersistentDataStore, SerializedCollection, SerializedItem,
};
use proptest::prelude::*;
use serde_json::{json, Value};

fn seeded(record: &str) -> (Arc<MemoryKv>, KvDataStore) {
    let kv = Arc::new(MemoryKv::new());
    kv.insert("launchdarkly", "LD-Env-abc", record).unwrap();
    let store = KvDataStore::builder()
        .client_side_id("abc")
        .kv_store_name("launchdarkly")
        .build(Arc::clone(&kv) as Arc<dyn KvStore>)
        .unwrap();
    (kv, store)
}

fn decode(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[test]
fn test_animal_scenario() {
    let (_kv, store) = seeded(r#"{"flags":{"animal":"cat"}}"#);

    let item = store.get(DataKind::Features, "animal").unwrap().unwrap();
    assert_eq!(decode(&item.bytes), json!("cat"));

    assert!(store.get(DataKind::Features, "color").unwrap().is_none());

    let all: HashMap<String, Value> = store
        .get_all(DataKind::Features)
        .unwrap()
        .into_iter()
        .map(|keyed| (keyed.key, decode(&keyed.item.bytes)))
        .collect();
    assert_eq!(all, HashMap::from([("animal".to_string(), json!("cat"))]));
}

#[test]
fn test_every_stored_flag_reads_back_equal() {
    let flags = json!({
        "animal": "cat",
        "limits": {"max": 10, "nested": [1, {"a": null}]},
        "enabled": true,
        "ratio": 0.25,
        "variations": {"key": "variations", "on": true, "variations": ["a", "b"], "fallthrough": {"variation": 0}}
    });
    let (_kv, store) = seeded(&json!({ "flags": flags }).to_string());

    for (key, expected) in flags.as_object().unwrap() {
        let item = store.get(DataKind::Features, key).unwrap().unwrap();
        assert_eq!(&decode(&item.bytes), expected, "flag {}", key);
    }
    assert_eq!(store.get_all(DataKind::Features).unwrap().len(), 5);
}

#[test]
fn test_key_prefix_is_case_sensitive() {
    let kv = Arc::new(MemoryKv::new());
    kv.insert("launchdarkly", "ld-env-abc", r#"{"flags":{"animal":"cat"}}"#)
        .unwrap();
    let store = KvDataStore::new(kv, "abc", "launchdarkly");
    assert!(matches!(
        store.get(DataKind::Features, "animal"),
        Err(DataStoreError::RecordNotFound { .. })
    ));
}

#[test]
fn test_environments_are_isolated() {
    let (kv, store) = seeded(r#"{"flags":{"animal":"cat"}}"#);
    kv.insert("launchdarkly", "LD-Env-local", r#"{"flags":{"animal":"dog"}}"#)
        .unwrap();
    let local = KvDataStore::new(kv, "local", "launchdarkly");

    let ours = store.get(DataKind::Features, "animal").unwrap().unwrap();
    let theirs = local.get(DataKind::Features, "animal").unwrap().unwrap();
    assert_eq!(decode(&ours.bytes), json!("cat"));
    assert_eq!(decode(&theirs.bytes), json!("dog"));
}

#[test]
fn test_unreachable_store_never_reports_not_found() {
    struct Down;
    impl KvStore for Down {
        fn open(&self, _store: &str) -> Result<(), KvError> {
            Err(KvError::Backend("timeout".into()))
        }
        fn lookup(&self, _store: &str, _key: &str) -> Result<Option<Vec<u8>>, KvError> {
            Err(KvError::Backend("timeout".into()))
        }
    }

    let store = KvDataStore::new(Arc::new(Down), "abc", "launchdarkly");
    assert!(!store.is_store_available());
    assert!(store.get(DataKind::Features, "animal").is_err());
    assert!(store.get_all(DataKind::Features).is_err());
}

#[test]
fn test_write_path_is_rejected() {
    let (_kv, store) = seeded(r#"{"flags":{"animal":"cat"}}"#);
    let before = store.get_all(DataKind::Features).unwrap();

    for _ in 0..3 {
        let err = store
            .upsert(DataKind::Features, "color", SerializedItem::new(1, b"\"red\"".to_vec()))
            .unwrap_err();
        assert!(matches!(err, DataStoreError::Unsupported { operation: "upsert" }));
        let err = store
            .init(&[SerializedCollection {
                kind: DataKind::Features,
                items: vec![],
            }])
            .unwrap_err();
        assert!(matches!(err, DataStoreError::Unsupported { operation: "init" }));
    }

    assert_eq!(store.get_all(DataKind::Features).unwrap(), before);
    assert!(store.get(DataKind::Features, "color").unwrap().is_none());
}

#[test]
fn test_client_serves_stored_value() {
    let (_kv, store) = seeded(r#"{"flags":{"animal":"cat"}}"#);
    let client = FlagClient::new(Arc::new(store));
    assert!(client.initialized());

    let ctx = Context::new("user-123").unwrap();
    let detail = client.string_variation_detail("animal", &ctx, "default").unwrap();
    assert_eq!(detail.value, "cat");
    assert!(!detail.reason.is_error());
    client.close();
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn stored_definitions_round_trip(definition in json_value(), key in "[a-z][a-z0-9-]{0,15}") {
        let record = json!({ "flags": { key.clone(): definition.clone() } });
        let (_kv, store) = seeded(&record.to_string());
        let item = store.get(DataKind::Features, &key).unwrap().unwrap();
        prop_assert_eq!(decode(&item.bytes), definition);
    }
}
