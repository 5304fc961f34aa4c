use std::sync::Arc;

use aether_core::StreamProcessor;
use aether_transform::{ConverterRegistry, SharedRegistry, register_builtin_converters};
use clap::Parser;
use tracing::info;

mod cli;
mod commands;
mod config;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("aether failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::resolve(&cli)?;
    info!(
        default_model = %config.default_model,
        channel_capacity = config.processor.channel_capacity,
        emit_done_sentinel = config.processor.emit_done_sentinel,
        body_rules = config.body_rules.len(),
        "config loaded"
    );

    let mut registry = ConverterRegistry::new();
    register_builtin_converters(&mut registry)?;
    let registry = SharedRegistry::new(registry);
    let snapshot: Arc<ConverterRegistry> = registry.load();
    let processor = StreamProcessor::new(snapshot.clone()).with_options(config.processor.clone());
    let request_id = cli.request_id.as_deref();

    match &cli.command {
        Command::Formats => commands::list_formats(&snapshot),
        Command::ConvertRequest { pair, input } => {
            commands::convert_request(&snapshot, &config, pair, input)
        }
        Command::ConvertResponse {
            pair,
            status,
            input,
        } => commands::convert_response(&processor, &config, request_id, pair, *status, input),
        Command::ConvertStream {
            pair,
            model,
            chunk_size,
            input,
        } => {
            commands::convert_stream(
                &processor,
                &config,
                request_id,
                pair,
                model.as_deref(),
                *chunk_size,
                input,
            )
            .await
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aether=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
