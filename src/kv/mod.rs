pub mod memory;

pub use memory::MemoryKv;

use crate::error::KvError;

/// Read-only client for an external key-value store that holds several
/// named stores. Implementations must be thread-safe.
///
/// Values are written out-of-band by whatever synchronizes flag data.
pub trait KvStore: Send + Sync {
    /// Confirm that the named store exists and can be read.
    fn open(&self, store: &str) -> Result<(), KvError>;

    /// Read the value stored under `key`. `Ok(None)` when the key is absent.
    fn lookup(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, KvError>;
}
