use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level kvflags.toml configuration
#[derive(Debug, Deserialize, Default)]
pub struct KvflagsConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub launchdarkly: LaunchDarklyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub local_server: LocalServerConfig,
    /// Directory relative seed files are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

#[derive(Debug, Deserialize)]
pub struct LaunchDarklyConfig {
    /// Environment whose record is read. Required; no default.
    pub client_side_id: Option<String>,
    #[serde(default = "default_kv_store_name")]
    pub kv_store_name: String,
    #[serde(default = "default_flag_key")]
    pub flag_key: String,
    #[serde(default = "default_value")]
    pub default_value: String,
    #[serde(default = "default_user_key")]
    pub user_key: String,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

/// Values loaded into the kv stores at startup, keyed by store name.
#[derive(Debug, Deserialize, Default)]
pub struct LocalServerConfig {
    #[serde(default)]
    pub kv_stores: HashMap<String, Vec<KvSeedEntry>>,
}

/// One seeded key: its value comes from `file` or from inline `data`.
#[derive(Debug, Deserialize, Clone)]
pub struct KvSeedEntry {
    pub key: String,
    pub file: Option<String>,
    pub data: Option<String>,
}

// ── Default value functions ──────────────────────────

fn default_port() -> u16 {
    8080
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_kv_store_name() -> String {
    "launchdarkly".to_string()
}

fn default_flag_key() -> String {
    "animal".to_string()
}

fn default_value() -> String {
    "default".to_string()
}

fn default_user_key() -> String {
    "user-123".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_data_dir() -> String {
    "./data/sled".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            hostname: default_hostname(),
        }
    }
}

impl Default for LaunchDarklyConfig {
    fn default() -> Self {
        Self {
            client_side_id: None,
            kv_store_name: default_kv_store_name(),
            flag_key: default_flag_key(),
            default_value: default_value(),
            user_key: default_user_key(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
        }
    }
}

impl KvflagsConfig {
    /// Load configuration from a TOML file, falling back to defaults if the file
    /// doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        let base_dir = Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!(path, error = %e, "failed to parse config, using defaults");
                Self::default()
            }),
            Err(_) => {
                tracing::debug!(path, "no config file, using defaults");
                Self::default()
            }
        };
        config.base_dir = base_dir;
        config
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("KVF_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid KVF_PORT"),
            }
        }

        if let Some(val) = var("KVF_HOSTNAME") {
            self.server.hostname = val;
        }

        if let Some(val) = var("KVF_CLIENT_SIDE_ID") {
            self.launchdarkly.client_side_id = Some(val);
        }

        if let Some(val) = var("KVF_KV_STORE_NAME") {
            self.launchdarkly.kv_store_name = val;
        }

        if let Some(val) = var("KVF_FLAG_KEY") {
            self.launchdarkly.flag_key = val;
        }

        if let Some(val) = var("KVF_STORAGE") {
            match val.to_lowercase().as_str() {
                "sled" => self.storage.backend = StorageBackend::Sled,
                "memory" => self.storage.backend = StorageBackend::Memory,
                other => tracing::warn!(value = other, "unknown KVF_STORAGE value"),
            }
        }

        if let Some(val) = var("KVF_DATA_DIR") {
            self.storage.data_dir = val;
        }
    }

    /// The environment to read: `local` when running on a local host,
    /// otherwise the configured client-side id.
    pub fn client_side_id(&self, is_local: bool) -> Option<String> {
        if is_local {
            return Some("local".to_string());
        }
        self.launchdarkly
            .client_side_id
            .clone()
            .filter(|id| !id.is_empty())
    }

    pub fn resolve_seed_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}
