use thiserror::Error;

/// Failures reported by a [`KvStore`](crate::kv::KvStore) client.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store '{0}' does not exist")]
    StoreNotFound(String),

    #[error("kv store backend error: {0}")]
    Backend(String),
}

/// Faults raised by a persistent data store.
///
/// A flag key that is absent from an otherwise valid environment record is
/// not an error: `get` returns `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// The store is read-only; `init` and `upsert` always fail with this.
    #[error("{operation} is not supported: the kv data store is read-only")]
    Unsupported { operation: &'static str },

    #[error("kv store '{store}' is unreachable: {source}")]
    StoreUnreachable {
        store: String,
        #[source]
        source: KvError,
    },

    #[error("environment record '{key}' not found in kv store '{store}'")]
    RecordNotFound { store: String, key: String },

    #[error("environment record '{key}' is malformed: {source}")]
    MalformedRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize item '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing required data store parameter: {0}")]
    MissingParameter(&'static str),
}

impl DataStoreError {
    /// True for the write-path rejection, as opposed to a read fault.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, DataStoreError::Unsupported { .. })
    }
}

/// Errors from a flag evaluation. The caller owns the fallback policy.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown feature key: {0}")]
    FlagNotFound(String),

    #[error("flag '{key}' has a value of the wrong type, expected {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("flag '{key}' is malformed: {reason}")]
    MalformedFlag { key: String, reason: String },

    #[error("invalid evaluation context: {0}")]
    InvalidContext(#[from] ContextError),

    #[error(transparent)]
    Store(#[from] DataStoreError),
}

impl EvalError {
    /// The `errorKind` reported in an `ERROR` evaluation reason.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            EvalError::FlagNotFound(_) => ErrorKind::FlagNotFound,
            EvalError::WrongType { .. } => ErrorKind::WrongType,
            EvalError::MalformedFlag { .. } => ErrorKind::MalformedFlag,
            EvalError::InvalidContext(_) => ErrorKind::UserNotSpecified,
            EvalError::Store(_) => ErrorKind::Exception,
        }
    }
}

/// Error categories carried by an `ERROR` evaluation reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    FlagNotFound,
    MalformedFlag,
    WrongType,
    UserNotSpecified,
    Exception,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FlagNotFound => "FLAG_NOT_FOUND",
            ErrorKind::MalformedFlag => "MALFORMED_FLAG",
            ErrorKind::WrongType => "WRONG_TYPE",
            ErrorKind::UserNotSpecified => "USER_NOT_SPECIFIED",
            ErrorKind::Exception => "EXCEPTION",
        }
    }
}

/// Invalid evaluation context input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("context key must not be empty")]
    EmptyKey,

    #[error("invalid context kind '{0}'")]
    InvalidKind(String),

    #[error("multi-context must contain at least one context")]
    EmptyMulti,

    #[error("multi-context contains kind '{0}' more than once")]
    DuplicateKind(String),

    #[error("multi-context cannot be nested in another multi-context")]
    NestedMulti,
}
