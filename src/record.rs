use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::DataStoreError;
use crate::store::{DataKind, SerializedItem};

/// Prefix of the kv key holding an environment record.
pub const ENV_KEY_PREFIX: &str = "LD-Env-";

/// The kv key for the environment identified by `client_side_id`.
pub fn env_key(client_side_id: &str) -> String {
    format!("{}{}", ENV_KEY_PREFIX, client_side_id)
}

/// All flag data for one environment, stored as a single JSON document.
///
/// Definitions are opaque to this crate's storage layer and are kept as raw
/// JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub flags: BTreeMap<String, Value>,
    /// Optional. A value that is not an object reads as empty so that flag
    /// reads never depend on it.
    #[serde(default, deserialize_with = "object_or_empty", skip_serializing_if = "BTreeMap::is_empty")]
    pub segments: BTreeMap<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn object_or_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Null => Ok(BTreeMap::new()),
        other => {
            tracing::warn!(found = %other, "ignoring environment record segments that are not an object");
            Ok(BTreeMap::new())
        }
    }
}

impl EnvironmentRecord {
    /// Parse a record read from the kv key `key`.
    pub fn from_slice(key: &str, bytes: &[u8]) -> Result<Self, DataStoreError> {
        let malformed = |source| DataStoreError::MalformedRecord {
            key: key.to_string(),
            source,
        };
        let document: Value = serde_json::from_slice(bytes).map_err(malformed)?;
        if !document.is_object() {
            return Err(malformed(serde::de::Error::custom(
                "environment record must be a JSON object",
            )));
        }
        serde_json::from_value(document).map_err(malformed)
    }

    /// The definitions of the given kind.
    pub fn items(&self, kind: DataKind) -> &BTreeMap<String, Value> {
        match kind {
            DataKind::Features => &self.flags,
            DataKind::Segments => &self.segments,
        }
    }
}

/// Re-marshal a definition into the item shape handed to the flag client.
pub fn serialize_item(key: &str, definition: &Value) -> Result<SerializedItem, DataStoreError> {
    let bytes = serde_json::to_vec(definition).map_err(|source| DataStoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    let version = definition
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Ok(SerializedItem::new(version, bytes))
}
