mod inspect;
mod server;

use std::process;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::server::config::{KvflagsConfig, StorageBackend};

#[derive(Parser, Debug)]
#[command(name = "kvflags")]
#[command(version)]
#[command(about = "Feature flags served from a read-only key-value store", long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Where flag data is read from. Overrides `kvflags.toml` and `KVF_*`.
#[derive(ClapArgs, Debug)]
struct StoreArgs {
    /// Path to config file
    #[arg(short = 'c', long = "config", env = "KVF_CONFIG", default_value = "kvflags.toml")]
    config: String,

    /// Environment whose record is read
    #[arg(long = "client-side-id")]
    client_side_id: Option<String>,

    /// Name of the kv store holding environment records
    #[arg(long = "kv-store-name")]
    kv_store_name: Option<String>,

    /// Storage backend (memory or sled)
    #[arg(long = "storage", value_parser = parse_backend)]
    storage: Option<StorageBackend>,

    /// Directory of the sled database
    #[arg(long = "data-dir")]
    data_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the edge service
    Serve {
        #[command(flatten)]
        store: StoreArgs,

        /// Port to listen on
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long = "hostname")]
        hostname: Option<String>,
    },
    /// Print a stored flag definition
    Get {
        #[command(flatten)]
        store: StoreArgs,

        /// Flag key
        flag: String,
    },
    /// List the flag keys of the environment record
    List {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Evaluate a string flag for a user
    Eval {
        #[command(flatten)]
        store: StoreArgs,

        /// Flag key
        flag: String,

        /// Value served when the flag is off without an off variation
        #[arg(short = 'd', long = "default", default_value = "default")]
        default: String,

        /// User context key
        #[arg(short = 'u', long = "user", default_value = "user-123")]
        user: String,
    },
    /// Verify the store is reachable and the environment record is valid
    Check {
        #[command(flatten)]
        store: StoreArgs,
    },
}

fn parse_backend(value: &str) -> Result<StorageBackend, String> {
    match value.to_lowercase().as_str() {
        "memory" => Ok(StorageBackend::Memory),
        "sled" => Ok(StorageBackend::Sled),
        other => Err(format!("unknown storage backend '{}', expected memory or sled", other)),
    }
}

impl StoreArgs {
    /// Config file, then environment, then command line.
    fn load_config(&self) -> KvflagsConfig {
        let mut config = KvflagsConfig::load(&self.config);
        config.apply_env_overrides();
        if let Some(ref id) = self.client_side_id {
            config.launchdarkly.client_side_id = Some(id.clone());
        }
        if let Some(ref name) = self.kv_store_name {
            config.launchdarkly.kv_store_name = name.clone();
        }
        if let Some(backend) = self.storage {
            config.storage.backend = backend;
        }
        if let Some(ref dir) = self.data_dir {
            config.storage.data_dir = dir.clone();
        }
        config
    }
}

async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Serve {
            store,
            port,
            hostname,
        } => {
            let mut config = store.load_config();
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(hostname) = hostname {
                config.server.hostname = hostname;
            }
            server::run_serve(config).await
        }
        Command::Get { store, flag } => inspect::run_get(&store.load_config(), &flag),
        Command::List { store } => inspect::run_list(&store.load_config()),
        Command::Eval {
            store,
            flag,
            default,
            user,
        } => inspect::run_eval(&store.load_config(), &flag, &default, &user),
        Command::Check { store } => inspect::run_check(&store.load_config()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Args::parse();
    if let Err(e) = run(cli.cmd).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
