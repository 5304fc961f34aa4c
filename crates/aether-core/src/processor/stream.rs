use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use aether_protocol::{ApiFormat, FormatFamily, SseParser, encode_done, encode_sse};
use aether_transform::{ConversionError, StreamConversionState};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::StreamProcessor;
use crate::context::{
    STATUS_CLIENT_CLOSED, STATUS_CONVERSION_FAILED, STATUS_UPSTREAM_FAILED, StreamContext,
};
use crate::parser::ParsedChunk;
use crate::upstream::{TransportError, UpstreamResponse};

/// Client side of a running stream.
pub struct ResponseStream {
    body: mpsc::Receiver<Bytes>,
    outcome: StreamOutcome,
}

impl ResponseStream {
    pub(super) fn new(body: mpsc::Receiver<Bytes>, outcome: oneshot::Receiver<StreamContext>) -> Self {
        Self {
            body,
            outcome: StreamOutcome(outcome),
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.body.recv().await
    }

    /// Dropping the receiver half cancels the upstream read.
    pub fn into_parts(self) -> (mpsc::Receiver<Bytes>, StreamOutcome) {
        (self.body, self.outcome)
    }

    /// Reads the whole body, then the final context.
    pub async fn collect_all(mut self) -> (Vec<Bytes>, Option<StreamContext>) {
        let mut frames = Vec::new();
        while let Some(frame) = self.body.recv().await {
            frames.push(frame);
        }
        (frames, self.outcome.wait().await)
    }
}

impl Stream for ResponseStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.body.poll_recv(cx)
    }
}

/// Final [`StreamContext`] of a stream, sent once the driver is done.
pub struct StreamOutcome(oneshot::Receiver<StreamContext>);

impl StreamOutcome {
    /// `None` only if the driver task panicked.
    pub async fn wait(self) -> Option<StreamContext> {
        self.0.await.ok()
    }
}

/// Frames one converted event for a client speaking `format`.
///
/// Claude clients expect the event type on an `event:` line.
pub fn frame_event(format: &ApiFormat, event: &Value) -> Bytes {
    let name = match format.family() {
        Some(FormatFamily::Claude) => event.get("type").and_then(Value::as_str),
        _ => None,
    };
    encode_sse(name, &event.to_string())
}

enum Step {
    Chunk(Result<Bytes, TransportError>),
    End,
    ClientGone,
}

pub(super) struct StreamDriver {
    processor: StreamProcessor,
    ctx: StreamContext,
    sse: SseParser,
    conversion: Option<StreamConversionState>,
    tx: mpsc::Sender<Bytes>,
    start: Instant,
}

impl StreamDriver {
    pub(super) fn new(
        processor: StreamProcessor,
        ctx: StreamContext,
        tx: mpsc::Sender<Bytes>,
        start: Instant,
    ) -> Self {
        let conversion = ctx.needs_conversion().then(|| {
            StreamConversionState::with_generated_id(
                ctx.model.clone(),
                message_id_prefix(&ctx.api_format),
            )
        });
        Self {
            processor,
            ctx,
            sse: SseParser::new(),
            conversion,
            tx,
            start,
        }
    }

    pub(super) async fn run(mut self, upstream: UpstreamResponse) -> StreamContext {
        let (mut body, prefetched, guard) = upstream.into_parts();

        let mut flow = ControlFlow::Continue(());
        for chunk in prefetched {
            flow = self.push_bytes(&chunk).await;
            if flow.is_break() {
                break;
            }
        }

        while flow.is_continue() {
            let step = tokio::select! {
                biased;
                _ = self.tx.closed() => Step::ClientGone,
                next = body.next() => match next {
                    Some(item) => Step::Chunk(item),
                    None => Step::End,
                },
            };
            flow = match step {
                Step::Chunk(Ok(bytes)) => self.push_bytes(&bytes).await,
                Step::Chunk(Err(err)) => {
                    self.upstream_failed(err);
                    ControlFlow::Break(())
                }
                Step::End => {
                    let _ = self.finish().await;
                    ControlFlow::Break(())
                }
                Step::ClientGone => {
                    self.client_gone();
                    ControlFlow::Break(())
                }
            };
        }

        drop(body);
        drop(guard);

        let ctx = &mut self.ctx;
        ctx.elapsed_ms = Some(elapsed_ms(self.start));
        info!(
            request_id = %ctx.request_id,
            model = %ctx.model,
            source = %ctx.provider_api_format,
            target = %ctx.api_format,
            status = ctx.status_code,
            input_tokens = ctx.input_tokens,
            output_tokens = ctx.output_tokens,
            first_byte_ms = ctx.first_byte_ms,
            elapsed_ms = ctx.elapsed_ms,
            "stream finished"
        );
        self.ctx
    }

    async fn push_bytes(&mut self, bytes: &Bytes) -> ControlFlow<()> {
        if self.ctx.first_byte_ms.is_none() {
            self.ctx.first_byte_ms = Some(elapsed_ms(self.start));
        }
        let chunks = self
            .processor
            .process_bytes(&mut self.ctx, &mut self.sse, bytes);
        for chunk in chunks {
            self.forward(chunk).await?;
        }
        ControlFlow::Continue(())
    }

    async fn forward(&mut self, chunk: ParsedChunk) -> ControlFlow<()> {
        let Some(state) = self.conversion.as_mut() else {
            return self.send(encode_sse(chunk.event.as_deref(), &chunk.raw)).await;
        };
        // The client gets its own terminator, if any.
        let Some(data) = chunk.data else {
            return ControlFlow::Continue(());
        };
        let converted = self.processor.registry.convert_stream_chunk_strict(
            data,
            &self.ctx.provider_api_format,
            &self.ctx.api_format,
            state,
        );
        self.emit_converted(converted).await
    }

    async fn emit_converted(
        &mut self,
        converted: Result<Vec<Value>, ConversionError>,
    ) -> ControlFlow<()> {
        let events = match converted {
            Ok(events) => events,
            Err(err) => {
                warn!(request_id = %self.ctx.request_id, error = %err, "stream conversion failed");
                self.ctx.fail(
                    STATUS_CONVERSION_FAILED,
                    format!("stream_conversion_error: {err}"),
                );
                return ControlFlow::Break(());
            }
        };
        for event in &events {
            self.send(frame_event(&self.ctx.api_format, event)).await?;
        }
        ControlFlow::Continue(())
    }

    async fn send(&mut self, frame: Bytes) -> ControlFlow<()> {
        if self.tx.send(frame).await.is_err() {
            self.client_gone();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Clean end of body: flush what is buffered, let the converter close the
    /// message, then terminate OpenAI-style when converting.
    async fn finish(&mut self) -> ControlFlow<()> {
        let chunks = self.processor.finish_lines(&mut self.ctx, &mut self.sse);
        for chunk in chunks {
            self.forward(chunk).await?;
        }

        let Some(state) = self.conversion.as_mut() else {
            return ControlFlow::Continue(());
        };
        let tail = self.processor.registry.finish_stream_strict(
            &self.ctx.provider_api_format,
            &self.ctx.api_format,
            state,
        );
        self.emit_converted(tail).await?;

        if self.processor.options.emit_done_sentinel
            && self.ctx.api_format.family() == Some(FormatFamily::OpenAI)
        {
            self.send(encode_done()).await?;
        }
        ControlFlow::Continue(())
    }

    /// Keeps the usage seen so far; buffered partial lines are accounted but
    /// never sent.
    fn upstream_failed(&mut self, err: TransportError) {
        self.processor.finish_lines(&mut self.ctx, &mut self.sse);
        warn!(
            request_id = %self.ctx.request_id,
            kind = %err.kind,
            error = %err.message,
            input_tokens = self.ctx.input_tokens,
            output_tokens = self.ctx.output_tokens,
            "upstream stream failed"
        );
        self.ctx
            .fail(STATUS_UPSTREAM_FAILED, format!("upstream_stream_error: {err}"));
    }

    fn client_gone(&mut self) {
        debug!(request_id = %self.ctx.request_id, "client disconnected, cancelling upstream read");
        self.ctx.fail(STATUS_CLIENT_CLOSED, "client_disconnected");
    }
}

fn message_id_prefix(client: &ApiFormat) -> &'static str {
    match client.family() {
        Some(FormatFamily::OpenAI) => "chatcmpl-",
        Some(FormatFamily::Claude) => "msg_",
        _ => "resp_",
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
