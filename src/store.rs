//! The persistent data store contract consumed by the flag client.
//!
//! A store hands out flag definitions as serialized bytes; decoding them is
//! the client's job. Stores advertise whether they accept writes through
//! [`PersistentDataStore::capabilities`].

use std::fmt;

use crate::error::DataStoreError;

/// The kind of item being requested from a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Features,
    Segments,
}

impl DataKind {
    /// Namespace name used for this kind in stored documents.
    pub fn namespace(&self) -> &'static str {
        match self {
            DataKind::Features => "features",
            DataKind::Segments => "segments",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace())
    }
}

/// What a store is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capabilities {
    ReadWrite,
    /// Data is maintained out-of-band; `init` and `upsert` are rejected.
    ReadOnly,
}

impl Capabilities {
    pub fn supports_writes(&self) -> bool {
        matches!(self, Capabilities::ReadWrite)
    }
}

/// A single item in serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedItem {
    pub version: u64,
    pub deleted: bool,
    pub bytes: Vec<u8>,
}

impl SerializedItem {
    pub fn new(version: u64, bytes: Vec<u8>) -> Self {
        Self {
            version,
            deleted: false,
            bytes,
        }
    }
}

/// A serialized item paired with its key, as returned by `get_all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedSerializedItem {
    pub key: String,
    pub item: SerializedItem,
}

/// All items of one kind, as passed to `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedCollection {
    pub kind: DataKind,
    pub items: Vec<KeyedSerializedItem>,
}

/// Storage backend contract for flag data.
///
/// `get` distinguishes a missing key (`Ok(None)`) from a fault (`Err`).
/// Implementations never retry; the caller decides what to do on failure.
pub trait PersistentDataStore: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Replace the store's contents with `all_data`.
    fn init(&self, all_data: &[SerializedCollection]) -> Result<(), DataStoreError>;

    fn get(&self, kind: DataKind, key: &str) -> Result<Option<SerializedItem>, DataStoreError>;

    fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedSerializedItem>, DataStoreError>;

    /// Insert or update one item. Returns whether the store was changed.
    fn upsert(
        &self,
        kind: DataKind,
        key: &str,
        item: SerializedItem,
    ) -> Result<bool, DataStoreError>;

    fn is_initialized(&self) -> bool;

    fn is_store_available(&self) -> bool;

    fn close(&self) -> Result<(), DataStoreError>;
}
