pub mod sled_store;

use std::sync::Arc;

use anyhow::{bail, Context as _};
use kvflags_lib::kv::{KvStore, MemoryKv};
use kvflags_lib::KvError;

use self::sled_store::SledKv;
use super::config::{KvSeedEntry, KvflagsConfig, StorageBackend};

/// Out-of-band write access to a local kv backend, used only to seed stores
/// before serving. The serving path sees the read-only [`KvStore`] view.
pub trait KvSeed {
    fn create_store(&self, store: &str) -> Result<(), KvError>;

    fn insert(&self, store: &str, key: &str, value: Vec<u8>) -> Result<(), KvError>;
}

impl KvSeed for MemoryKv {
    fn create_store(&self, store: &str) -> Result<(), KvError> {
        MemoryKv::create_store(self, store)
    }

    fn insert(&self, store: &str, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        MemoryKv::insert(self, store, key, value)
    }
}

/// Open the configured kv backend and load the `[local_server.kv_stores]`
/// entries into it.
pub fn open_backend(config: &KvflagsConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let kv = MemoryKv::new();
            seed(&kv, config)?;
            Ok(Arc::new(kv))
        }
        StorageBackend::Sled => {
            let kv = SledKv::open(&config.storage.data_dir)
                .with_context(|| format!("opening sled store at {}", config.storage.data_dir))?;
            seed(&kv, config)?;
            Ok(Arc::new(kv))
        }
    }
}

fn seed(kv: &dyn KvSeed, config: &KvflagsConfig) -> anyhow::Result<()> {
    for (store, entries) in &config.local_server.kv_stores {
        kv.create_store(store)?;
        for entry in entries {
            let value = seed_value(config, entry)
                .with_context(|| format!("seeding key '{}' of kv store '{}'", entry.key, store))?;
            kv.insert(store, &entry.key, value)?;
            tracing::info!(store = %store, key = %entry.key, "seeded kv entry");
        }
    }
    Ok(())
}

fn seed_value(config: &KvflagsConfig, entry: &KvSeedEntry) -> anyhow::Result<Vec<u8>> {
    match (&entry.file, &entry.data) {
        (Some(file), None) => {
            let path = config.resolve_seed_path(file);
            std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
        }
        (None, Some(data)) => Ok(data.clone().into_bytes()),
        (Some(_), Some(_)) => bail!("entry sets both `file` and `data`"),
        (None, None) => bail!("entry sets neither `file` nor `data`"),
    }
}
