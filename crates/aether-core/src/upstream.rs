use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    /// Connection reset while the body was still being read.
    Reset,
    /// Body framing broke (chunked encoding, truncated TLS record, ...).
    Protocol,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ReadTimeout => "read_timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Reset => "reset",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::Other => "other",
        })
    }
}

/// Failure of the upstream byte source after the response started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn reset(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Reset, message)
    }
}

pub type UpstreamBody = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Something the upstream exchange holds open: the response, a pooled
/// client, a permit. Released exactly once when the processor is done.
pub trait UpstreamResource: Send {
    fn release(&mut self);
}

/// Streaming upstream response handed to the processor, which owns it from
/// then on.
pub struct UpstreamResponse {
    pub(crate) body: UpstreamBody,
    pub(crate) prefetched: Vec<Bytes>,
    pub(crate) resources: Vec<Box<dyn UpstreamResource>>,
}

impl UpstreamResponse {
    pub fn new<S>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            body: Box::pin(body),
            prefetched: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Body built from an already known list of chunks and failures.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Bytes, TransportError>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures_util::stream::iter(chunks))
    }

    /// Bytes read ahead of the body, e.g. while sniffing the format. They
    /// are replayed first, in order.
    pub fn with_prefetched(mut self, chunks: Vec<Bytes>) -> Self {
        self.prefetched = chunks;
        self
    }

    pub fn with_resource(mut self, resource: impl UpstreamResource + 'static) -> Self {
        self.resources.push(Box::new(resource));
        self
    }

    pub(crate) fn into_parts(self) -> (UpstreamBody, Vec<Bytes>, ResourceGuard) {
        (self.body, self.prefetched, ResourceGuard(self.resources))
    }
}

/// Releases held resources on drop, last acquired first.
pub(crate) struct ResourceGuard(Vec<Box<dyn UpstreamResource>>);

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        while let Some(mut resource) = self.0.pop() {
            resource.release();
        }
    }
}
