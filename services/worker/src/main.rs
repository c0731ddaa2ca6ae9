use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use codec::Codec;
use tracing_subscriber::EnvFilter;
use worker::compress::CompressContext;
use worker::shard::ShardState;
use worker::transport::{WorkerRuntime, serve};

/// Worker node: receives chunks into its shard directory and serves the
/// compress / decompress / search lifecycle for that shard.
#[derive(Debug, Parser)]
#[command(name = "worker")]
struct Args {
    /// Listen port; also identifies this worker's shard on disk.
    #[arg(long, env = "LOGFLEET_WORKER_PORT", default_value_t = 8080)]
    port: u16,

    /// Interface to listen on. Workers receive chunks from a remote
    /// dispatcher, so the default accepts connections from any host.
    #[arg(long, env = "LOGFLEET_WORKER_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Path to the external codec binary.
    #[arg(long, env = "LOGFLEET_CODEC", default_value = "./logpress")]
    codec: PathBuf,

    /// Base URL of the dictionary service.
    #[arg(
        long,
        env = "LOGFLEET_DICTIONARY_URL",
        default_value = "http://127.0.0.1:8083"
    )]
    dictionary_url: String,

    /// Directory holding the shard, archive, and interchange side files.
    #[arg(long, env = "LOGFLEET_WORKER_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let shard_dir = args.data_dir.join(format!("chunks-{}", args.port));
    let archive_path = args.data_dir.join(format!("archive-{}.mylp", args.port));
    let candidate_path = args.data_dir.join("variables.json");
    let snapshot_path = args.data_dir.join("dictionaries.json");
    let reconstruction_dir = args.data_dir.join(format!("output-{}", args.port));
    let label = format!("output_from_{}", args.port);

    let shard = match ShardState::new(shard_dir) {
        Ok(shard) => shard,
        Err(err) => {
            eprintln!("worker failed preparing shard directory: {err}");
            std::process::exit(1);
        }
    };
    // The codec writes its side files relative to its working directory;
    // pinning it to the data dir keeps it in agreement with the paths
    // DictSync reads.
    let compress = CompressContext::new(
        Codec::new(args.codec, archive_path).with_work_dir(&args.data_dir),
        candidate_path,
        snapshot_path,
        args.dictionary_url,
    );
    let runtime = Arc::new(WorkerRuntime::new(
        shard,
        compress,
        reconstruction_dir,
        label,
    ));

    let bind_addr = format!("{}:{}", args.bind, args.port);
    if let Err(err) = serve(runtime, &bind_addr).await {
        eprintln!("worker transport failed: {err}");
        std::process::exit(1);
    }
}
