use std::collections::HashMap;
use std::sync::RwLock;

use super::KvStore;
use crate::error::KvError;

type Stores = HashMap<String, HashMap<String, Vec<u8>>>;

/// In-memory key-value stores backed by a `RwLock<HashMap>`.
///
/// Used for local runs and tests. The inherent write methods stand in for the
/// out-of-band process that populates a real edge store.
#[derive(Default)]
pub struct MemoryKv {
    stores: RwLock<Stores>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty named store. Existing stores are left untouched.
    pub fn create_store(&self, store: &str) -> Result<(), KvError> {
        let mut stores = self.write()?;
        stores.entry(store.to_string()).or_default();
        Ok(())
    }

    /// Store `value` under `key`, creating the named store on first use.
    pub fn insert(&self, store: &str, key: &str, value: impl Into<Vec<u8>>) -> Result<(), KvError> {
        let mut stores = self.write()?;
        stores
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        Ok(())
    }

    /// Remove `key` from a store, returning the previous value.
    pub fn remove(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut stores = self.write()?;
        Ok(stores.get_mut(store).and_then(|entries| entries.remove(key)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Stores>, KvError> {
        self.stores
            .write()
            .map_err(|_| KvError::Backend("memory kv lock poisoned".to_string()))
    }
}

impl KvStore for MemoryKv {
    fn open(&self, store: &str) -> Result<(), KvError> {
        let stores = self
            .stores
            .read()
            .map_err(|_| KvError::Backend("memory kv lock poisoned".to_string()))?;
        if stores.contains_key(store) {
            Ok(())
        } else {
            Err(KvError::StoreNotFound(store.to_string()))
        }
    }

    fn lookup(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let stores = self
            .stores
            .read()
            .map_err(|_| KvError::Backend("memory kv lock poisoned".to_string()))?;
        let entries = stores
            .get(store)
            .ok_or_else(|| KvError::StoreNotFound(store.to_string()))?;
        Ok(entries.get(key).cloned())
    }
}
