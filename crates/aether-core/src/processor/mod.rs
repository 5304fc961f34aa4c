//! Upstream response handling: SSE line processing, the streaming driver and
//! the full-response path.

mod stream;


use std::sync::Arc;
use std::time::Instant;

use aether_protocol::{SseEvent, SseParser};
use aether_transform::ConverterRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::context::{STATUS_CONVERSION_FAILED, STATUS_UPSTREAM_FAILED, StreamContext};
use crate::error::ProcessError;
use crate::parser::{ParsedChunk, parser_for};
use crate::upstream::UpstreamResponse;

pub use stream::{ResponseStream, StreamOutcome, frame_event};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorOptions {
    /// Frames buffered between the driver task and the client.
    pub channel_capacity: usize,
    /// End converted streams towards OpenAI clients with `data: [DONE]`.
    pub emit_done_sentinel: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            emit_done_sentinel: true,
        }
    }
}

/// Drives upstream responses into client-facing output.
///
/// Cheap to clone; every stream gets its own [`StreamContext`] and conversion
/// state, only the registry snapshot is shared.
#[derive(Clone)]
pub struct StreamProcessor {
    registry: Arc<ConverterRegistry>,
    options: ProcessorOptions,
}

impl StreamProcessor {
    pub fn new(registry: Arc<ConverterRegistry>) -> Self {
        Self {
            registry,
            options: ProcessorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Feeds one raw upstream line and returns the events it completed.
    ///
    /// Usage is folded into `ctx` as events complete; a repeated report
    /// overwrites rather than adds, so completion signals can arrive more
    /// than once.
    pub fn process_line(
        &self,
        ctx: &mut StreamContext,
        sse: &mut SseParser,
        line: &str,
    ) -> Vec<ParsedChunk> {
        let events = sse.feed_line(line);
        self.absorb_events(ctx, events)
    }

    /// Feeds a raw upstream chunk. A trailing partial line stays buffered in
    /// `sse` until the next chunk or [`finish_lines`](Self::finish_lines).
    pub fn process_bytes(
        &self,
        ctx: &mut StreamContext,
        sse: &mut SseParser,
        bytes: &[u8],
    ) -> Vec<ParsedChunk> {
        let events = sse.push_bytes(bytes);
        self.absorb_events(ctx, events)
    }

    /// Closes an event the upstream left open at end of body.
    pub fn finish_lines(&self, ctx: &mut StreamContext, sse: &mut SseParser) -> Vec<ParsedChunk> {
        let events = sse.finish();
        self.absorb_events(ctx, events)
    }

    fn absorb_events(&self, ctx: &mut StreamContext, events: Vec<SseEvent>) -> Vec<ParsedChunk> {
        let parser = parser_for(&ctx.provider_api_format);
        let mut chunks = Vec::with_capacity(events.len());
        for event in events {
            let Some(chunk) = parser.parse_sse_event(&event, &mut ctx.stats) else {
                continue;
            };
            if let Some(message) = &chunk.error_message {
                warn!(request_id = %ctx.request_id, error = %message, "upstream error event");
                ctx.fail(STATUS_UPSTREAM_FAILED, format!("upstream_error: {message}"));
            }
            ctx.record_usage(chunk.usage.input_tokens, chunk.usage.output_tokens);
            ctx.mark_completed();
            chunks.push(chunk);
        }
        chunks
    }

    /// Spawns the driver task for one streaming response.
    ///
    /// Prefetched bytes are replayed before the live body. The returned
    /// stream yields SSE frames in the client's format; the final context
    /// is available from [`ResponseStream::into_parts`] once the body ends.
    /// Must be called inside a tokio runtime.
    pub fn create_response_stream(
        &self,
        ctx: StreamContext,
        upstream: UpstreamResponse,
        start: Instant,
    ) -> ResponseStream {
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let driver = stream::StreamDriver::new(self.clone(), ctx, tx, start);
        tokio::spawn(async move {
            let ctx = driver.run(upstream).await;
            let _ = outcome_tx.send(ctx);
        });
        ResponseStream::new(rx, outcome_rx)
    }

    /// Non-streaming path: records usage from `body` and converts it for the
    /// client when the formats differ. Error responses are returned as is.
    pub fn process_full_response(
        &self,
        ctx: &mut StreamContext,
        body: &[u8],
        status_code: u16,
    ) -> Result<Value, ProcessError> {
        ctx.status_code = status_code;
        let response: Value = serde_json::from_slice(body)?;
        let parsed = parser_for(&ctx.provider_api_format).parse_response(&response, status_code);

        ctx.record_usage(parsed.usage.input_tokens, parsed.usage.output_tokens);
        ctx.stats.collected_text = parsed.text.clone();
        ctx.stats.response_id = parsed.response_id.clone();
        let is_error = parsed.is_error();
        if let Some(message) = parsed.error_message {
            ctx.error_message = Some(message);
        }
        if is_error {
            return Ok(response);
        }
        ctx.mark_completed();

        if !ctx.needs_conversion() {
            return Ok(response);
        }
        self.registry
            .convert_response_strict(response, &ctx.provider_api_format, &ctx.api_format)
            .map_err(|err| {
                warn!(request_id = %ctx.request_id, error = %err, "response conversion failed");
                ctx.fail(
                    STATUS_CONVERSION_FAILED,
                    format!("response_conversion_error: {err}"),
                );
                ProcessError::from(err)
            })
    }
}
