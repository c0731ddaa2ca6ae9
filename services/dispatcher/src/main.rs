use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dispatcher::distribute::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_IN_FLIGHT, Distributor};
use dispatcher::reassemble::decompress_all;
use dispatcher::search::search_all;
use dispatcher::settings::{DEFAULT_SETTINGS_PATH, resolve_workers};
use dispatcher::{DeliveryReport, DispatchError};
use tracing_subscriber::EnvFilter;

/// Fleet controller: splits log files across workers, drives the
/// compress lifecycle, and collects decompress / search results.
#[derive(Debug, Parser)]
#[command(name = "dispatcher")]
struct Args {
    /// Worker base url; repeat for each worker. Overrides the settings
    /// file when given.
    #[arg(long = "worker")]
    workers: Vec<String>,

    /// JSON settings file mapping worker names to base urls.
    #[arg(long, env = "LOGFLEET_SETTINGS", default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split a log file across the fleet and trigger compression.
    Compress {
        /// Source log file.
        file: PathBuf,

        /// Lines per chunk.
        #[arg(long, env = "LOGFLEET_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Maximum chunk sends in flight at once.
        #[arg(long, env = "LOGFLEET_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
        max_in_flight: usize,
    },
    /// Collect every worker's reconstructed chunks and reassemble the
    /// original files.
    Decompress {
        /// Directory receiving the reassembled files.
        #[arg(long, env = "LOGFLEET_OUTPUT_DIR", default_value = "decompressed")]
        output_dir: PathBuf,

        /// Scratch directory for unpacked worker bundles.
        #[arg(long, env = "LOGFLEET_WORK_DIR", default_value = "bundles")]
        work_dir: PathBuf,
    },
    /// Run a query on every worker's archive and aggregate the hits.
    Search {
        /// Query string passed to each worker verbatim.
        query: String,

        /// File receiving the aggregated results, appended.
        #[arg(long, env = "LOGFLEET_SEARCH_OUTPUT", default_value = "search_result.txt")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    if let Err(err) = run(args).await {
        eprintln!("dispatcher failed: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), DispatchError> {
    let workers = resolve_workers(&args.workers, &args.settings)?;
    match args.command {
        Command::Compress {
            file,
            chunk_size,
            max_in_flight,
        } => {
            let distributor = Distributor::new(workers, chunk_size, max_in_flight);
            let report = distributor.distribute_file(&file).await?;
            print_report("chunk delivery", report);
            let triggers = distributor.trigger_compress().await;
            print_report("compress triggers", triggers);
        }
        Command::Decompress {
            output_dir,
            work_dir,
        } => {
            let client = reqwest::Client::new();
            let (report, bases) =
                decompress_all(&client, &workers, &work_dir, &output_dir).await?;
            print_report("worker bundles", report);
            for base in bases {
                println!("reassembled {}", output_dir.join(base).display());
            }
        }
        Command::Search { query, output } => {
            let client = reqwest::Client::new();
            let report = search_all(&client, &workers, &query, &output).await?;
            print_report("search legs", report);
            println!("results appended to {}", output.display());
        }
    }
    Ok(())
}

fn print_report(phase: &str, report: DeliveryReport) {
    println!(
        "{phase}: {} delivered, {} failed",
        report.delivered, report.failed
    );
}
