use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dictionary::transport::{AppState, serve};
use dictstore::DictionaryStore;
use tracing_subscriber::EnvFilter;

/// Global dictionary service: deduplicates template/variable/filename
/// strings observed by all workers and hands back stable global ids.
#[derive(Debug, Parser)]
#[command(name = "dictionary")]
struct Args {
    /// Listen port.
    #[arg(long, env = "LOGFLEET_DICTIONARY_PORT", default_value_t = 8083)]
    port: u16,

    /// Interface to listen on. Workers upload from other hosts, so the
    /// default accepts connections from any host.
    #[arg(long, env = "LOGFLEET_DICTIONARY_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// SQLite database file backing the dictionary tables.
    #[arg(long, env = "LOGFLEET_DICTIONARY_DB", default_value = "logdata.db")]
    db_path: PathBuf,

    /// Side file receiving the full snapshot after every upload or read.
    #[arg(
        long,
        env = "LOGFLEET_DICTIONARY_SNAPSHOT",
        default_value = "global_dictionary.json"
    )]
    snapshot_path: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let store = match DictionaryStore::open(&args.db_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!(
                "dictionary failed opening database '{}': {err}",
                args.db_path.display()
            );
            std::process::exit(1);
        }
    };

    let state = AppState::new(store, args.snapshot_path);
    let bind_addr = format!("{}:{}", args.bind, args.port);
    if let Err(err) = serve(state, &bind_addr).await {
        eprintln!("dictionary transport failed: {err}");
        std::process::exit(1);
    }
}
