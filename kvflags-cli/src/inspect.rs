//! One-shot commands reading the environment record through the same data
//! store the edge service uses.

use std::sync::Arc;

use anyhow::{bail, Context as _};
use kvflags_lib::{
    Context, DataKind, FlagClient, KvDataStore, PersistentDataStore, SerializedItem,
};
use serde_json::Value;

use crate::server::config::KvflagsConfig;
use crate::server::open_data_store;
use crate::server::request_context::RuntimeInfo;

fn data_store(config: &KvflagsConfig) -> anyhow::Result<KvDataStore> {
    open_data_store(config, RuntimeInfo::from_env().is_local())
}

fn decode(key: &str, item: &SerializedItem) -> anyhow::Result<Value> {
    serde_json::from_slice(&item.bytes).with_context(|| format!("flag '{}' is not valid JSON", key))
}

pub fn run_get(config: &KvflagsConfig, flag: &str) -> anyhow::Result<()> {
    let store = data_store(config)?;
    println!("{}", flag_definition(&store, flag)?);
    Ok(())
}

fn flag_definition(store: &dyn PersistentDataStore, flag: &str) -> anyhow::Result<String> {
    let Some(item) = store.get(DataKind::Features, flag)? else {
        bail!("flag '{}' not found", flag);
    };
    let definition = decode(flag, &item)?;
    Ok(serde_json::to_string_pretty(&definition)?)
}

pub fn run_list(config: &KvflagsConfig) -> anyhow::Result<()> {
    let store = data_store(config)?;
    for key in flag_keys(&store)? {
        println!("{}", key);
    }
    Ok(())
}

fn flag_keys(store: &dyn PersistentDataStore) -> anyhow::Result<Vec<String>> {
    let mut keys: Vec<String> = store
        .get_all(DataKind::Features)?
        .into_iter()
        .filter(|keyed| !keyed.item.deleted)
        .map(|keyed| keyed.key)
        .collect();
    keys.sort();
    Ok(keys)
}

pub fn run_eval(config: &KvflagsConfig, flag: &str, default: &str, user: &str) -> anyhow::Result<()> {
    let client = FlagClient::new(Arc::new(data_store(config)?));
    println!("{}", evaluate(&client, flag, default, user)?);
    Ok(())
}

fn evaluate(client: &FlagClient, flag: &str, default: &str, user: &str) -> anyhow::Result<String> {
    let context = Context::new(user)?;
    let detail = client
        .string_variation_detail(flag, &context, default)
        .with_context(|| format!("error getting {}", flag))?;
    Ok(serde_json::to_string(&detail)?)
}

pub fn run_check(config: &KvflagsConfig) -> anyhow::Result<()> {
    let store = data_store(config)?;
    for line in check(&store)? {
        println!("{}", line);
    }
    Ok(())
}

fn check(store: &KvDataStore) -> anyhow::Result<Vec<String>> {
    if !store.is_store_available() {
        bail!("kv store '{}' is not reachable", store.kv_store_name());
    }
    let flags = store.get_all(DataKind::Features)?;
    let segments = store.get_all(DataKind::Segments)?;
    for keyed in &flags {
        decode(&keyed.key, &keyed.item)?;
    }
    Ok(vec![
        format!("kv store '{}': reachable", store.kv_store_name()),
        format!(
            "record '{}': {} flags, {} segments",
            store.record_key(),
            flags.len(),
            segments.len()
        ),
    ])
}
