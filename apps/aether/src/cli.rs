use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aether", about = "Convert LLM API payloads between provider formats")]
pub(crate) struct Cli {
    /// JSON configuration file.
    #[arg(long, env = "AETHER_CONFIG")]
    pub(crate) config: Option<PathBuf>,
    #[arg(long, env = "AETHER_REQUEST_ID")]
    pub(crate) request_id: Option<String>,
    #[arg(long, env = "AETHER_DEFAULT_MODEL")]
    pub(crate) default_model: Option<String>,
    #[arg(long, env = "AETHER_CHANNEL_CAPACITY")]
    pub(crate) channel_capacity: Option<usize>,
    #[arg(long, env = "AETHER_EMIT_DONE_SENTINEL")]
    pub(crate) emit_done_sentinel: Option<bool>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// List registered conversions and what each supports.
    Formats,
    /// Convert a request body, applying configured body rules first.
    ConvertRequest {
        #[command(flatten)]
        pair: FormatPair,
        /// File to read, `-` for stdin.
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Convert a complete (non-streaming) upstream response.
    ConvertResponse {
        #[command(flatten)]
        pair: FormatPair,
        #[arg(long, default_value_t = 200)]
        status: u16,
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Replay a captured upstream SSE body and print the client-side stream.
    ConvertStream {
        #[command(flatten)]
        pair: FormatPair,
        #[arg(long)]
        model: Option<String>,
        /// Feed the capture in chunks of this many bytes (0 = one chunk).
        #[arg(long, default_value_t = 0)]
        chunk_size: usize,
        #[arg(default_value = "-")]
        input: PathBuf,
    },
}

#[derive(clap::Args)]
pub(crate) struct FormatPair {
    /// Format the payload is in (e.g. `claude:chat`).
    #[arg(long)]
    pub(crate) from: String,
    /// Format to produce (e.g. `openai:chat`).
    #[arg(long)]
    pub(crate) to: String,
}
