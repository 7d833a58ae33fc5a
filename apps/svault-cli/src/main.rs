// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use streamvault_client::client;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server URI (ws://, wss://, http:// or https://)
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/audio")]
    server: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file as a new stream
    Upload {
        /// File to upload
        #[arg(short, long)]
        input: PathBuf,
        /// Stream id; derived from the input file name and a timestamp when omitted
        #[arg(long)]
        stream_id: Option<String>,
        /// Binary frame size in bytes
        #[arg(long, default_value_t = client::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Download a stream with sequential random-access reads
    Download {
        /// Stream id to fetch
        #[arg(long)]
        stream_id: String,
        /// Output file; defaulted by timestamp when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// GET request size in bytes
        #[arg(long, default_value_t = client::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn derived_stream_id(input: &Path) -> String {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("stream");
    format!("{stem}-{}", unix_timestamp())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Upload { input, stream_id, chunk_size } => {
            let stream_id = stream_id.unwrap_or_else(|| derived_stream_id(&input));
            client::upload_stream(&cli.server, &input, &stream_id, chunk_size).await.map(
                |total| {
                    println!("uploaded {total} bytes as stream {stream_id}");
                },
            )
        },
        Commands::Download { stream_id, output, chunk_size } => {
            let output = output
                .unwrap_or_else(|| PathBuf::from(format!("stream-{}.bin", unix_timestamp())));
            client::download_stream(&cli.server, &stream_id, &output, chunk_size).await.map(
                |total| {
                    println!("downloaded {total} bytes to {}", output.display());
                },
            )
        },
    };

    if let Err(e) = result {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
