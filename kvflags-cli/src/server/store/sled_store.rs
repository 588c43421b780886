use kvflags_lib::kv::KvStore;
use kvflags_lib::KvError;

use super::KvSeed;

/// On-disk kv stores backed by sled, one tree per store name.
pub struct SledKv {
    db: sled::Db,
}

fn backend(e: sled::Error) -> KvError {
    KvError::Backend(e.to_string())
}

impl SledKv {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: &str) -> Result<Self, KvError> {
        let db = sled::open(data_dir).map_err(backend)?;
        Ok(Self::new(db))
    }

    fn has_store(&self, store: &str) -> bool {
        self.db
            .tree_names()
            .iter()
            .any(|name| &name[..] == store.as_bytes())
    }

    /// The tree for an existing store. Never creates one.
    fn tree(&self, store: &str) -> Result<sled::Tree, KvError> {
        if !self.has_store(store) {
            return Err(KvError::StoreNotFound(store.to_string()));
        }
        self.db.open_tree(store).map_err(backend)
    }
}

impl KvStore for SledKv {
    fn open(&self, store: &str) -> Result<(), KvError> {
        self.tree(store).map(|_| ())
    }

    fn lookup(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let tree = self.tree(store)?;
        Ok(tree.get(key).map_err(backend)?.map(|ivec| ivec.to_vec()))
    }
}

impl KvSeed for SledKv {
    fn create_store(&self, store: &str) -> Result<(), KvError> {
        self.db.open_tree(store).map_err(backend)?;
        Ok(())
    }

    fn insert(&self, store: &str, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        let tree = self.db.open_tree(store).map_err(backend)?;
        tree.insert(key, value).map_err(backend)?;
        tree.flush().map_err(backend)?;
        Ok(())
    }
}
