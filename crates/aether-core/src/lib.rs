//! Upstream response processing: per-format parsers, the per-request
//! [`StreamContext`], and the [`StreamProcessor`] that reframes upstream SSE
//! for the client, converting between formats on the way.

pub mod context;
pub mod error;
pub mod parser;
pub mod processor;
pub mod upstream;

pub use context::{
    STATUS_CLIENT_CLOSED, STATUS_CONVERSION_FAILED, STATUS_OK, STATUS_UPSTREAM_FAILED,
    StreamContext,
};
pub use error::ProcessError;
pub use parser::{
    ParsedChunk, ParsedResponse, ResponseParser, StreamStats, TokenUsage, parser_for,
};
pub use processor::{
    ProcessorOptions, ResponseStream, StreamOutcome, StreamProcessor, frame_event,
};
pub use upstream::{
    TransportError, TransportErrorKind, UpstreamBody, UpstreamResource, UpstreamResponse,
};
