use std::io::{Read, Write};
use std::path::Path;
use std::time::Instant;

use aether_core::{StreamContext, StreamProcessor, UpstreamResponse};
use aether_protocol::{ApiFormat, FormatFamily};
use aether_transform::{
    ConverterRegistry, adapt_request_for_image_gen, apply_body_rules, is_image_gen_model,
};
use anyhow::{Context, bail};
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::FormatPair;
use crate::config::GatewayConfig;

pub(crate) fn list_formats(registry: &ConverterRegistry) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    for (source, target) in registry.list_converters() {
        let mut capabilities = Vec::new();
        if registry.can_convert_request(&source, &target) {
            capabilities.push("request");
        }
        if registry.can_convert_response(&source, &target) {
            capabilities.push("response");
        }
        if registry.can_convert_stream(&source, &target) {
            capabilities.push("stream");
        }
        writeln!(out, "{source} -> {target}: {}", capabilities.join(", "))?;
    }
    Ok(())
}

pub(crate) fn convert_request(
    registry: &ConverterRegistry,
    config: &GatewayConfig,
    pair: &FormatPair,
    input: &Path,
) -> anyhow::Result<()> {
    let body: Value = serde_json::from_slice(&read_input(input)?)
        .with_context(|| format!("parsing {}", input.display()))?;

    let mut shaped = apply_body_rules(&body, &config.body_rules);
    let target = ApiFormat::new(&pair.to);
    let model = shaped.get("model").and_then(Value::as_str);
    if target.family() == Some(FormatFamily::Gemini) && is_image_gen_model(model) {
        shaped = adapt_request_for_image_gen(&shaped);
    }

    let converted = registry.convert_request_strict(shaped, &pair.from, &pair.to)?;
    print_json(&converted)
}

pub(crate) fn convert_response(
    processor: &StreamProcessor,
    config: &GatewayConfig,
    request_id: Option<&str>,
    pair: &FormatPair,
    status: u16,
    input: &Path,
) -> anyhow::Result<()> {
    let body = read_input(input)?;
    let mut ctx = context(config, request_id, None, pair);
    let converted = processor.process_full_response(&mut ctx, &body, status)?;
    info!(
        request_id = %ctx.request_id,
        status = ctx.status_code,
        input_tokens = ctx.input_tokens,
        output_tokens = ctx.output_tokens,
        "response converted"
    );
    print_json(&converted)
}

pub(crate) async fn convert_stream(
    processor: &StreamProcessor,
    config: &GatewayConfig,
    request_id: Option<&str>,
    pair: &FormatPair,
    model: Option<&str>,
    chunk_size: usize,
    input: &Path,
) -> anyhow::Result<()> {
    let capture = Bytes::from(read_input(input)?);
    let chunks: Vec<_> = if chunk_size == 0 {
        vec![Ok(capture)]
    } else {
        (0..capture.len())
            .step_by(chunk_size)
            .map(|at| Ok(capture.slice(at..capture.len().min(at + chunk_size))))
            .collect()
    };

    let ctx = context(config, request_id, model, pair);
    let stream = processor.create_response_stream(
        ctx,
        UpstreamResponse::from_chunks(chunks),
        Instant::now(),
    );
    let (mut body, outcome) = stream.into_parts();
    write_frames(&mut body, &mut std::io::stdout()).await?;

    let Some(ctx) = outcome.wait().await else {
        bail!("stream driver stopped without a result");
    };
    if !ctx.is_success() {
        bail!(
            "stream ended with status {}: {}",
            ctx.status_code,
            ctx.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

/// Copies frames to `out` as they arrive.
async fn write_frames<W: Write>(
    body: &mut mpsc::Receiver<Bytes>,
    out: &mut W,
) -> std::io::Result<()> {
    while let Some(frame) = body.recv().await {
        out.write_all(&frame)?;
        out.flush()?;
    }
    Ok(())
}

fn context(
    config: &GatewayConfig,
    request_id: Option<&str>,
    model: Option<&str>,
    pair: &FormatPair,
) -> StreamContext {
    let model = model.unwrap_or(config.default_model.as_str());
    let ctx = StreamContext::new(model, &pair.to).with_provider_format(&pair.from);
    match request_id {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    }
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut raw = Vec::new();
        std::io::stdin()
            .read_to_end(&mut raw)
            .context("reading stdin")?;
        return Ok(raw);
    }
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_are_written_in_arrival_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let producer = tokio::spawn(async move {
            for frame in ["data: 1\n\n", "data: 2\n\n"] {
                tx.send(Bytes::from_static(frame.as_bytes())).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut out = Vec::new();
        write_frames(&mut rx, &mut out).await.unwrap();
        producer.await.unwrap();

        assert_eq!(out, b"data: 1\n\ndata: 2\n\n");
    }
}
