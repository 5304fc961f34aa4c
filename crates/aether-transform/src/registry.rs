use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use aether_protocol::{ApiFormat, is_same_format};
use arc_swap::ArcSwap;
use serde_json::Value;
use tracing::warn;

use crate::converter::FormatConverter;
use crate::error::{ConversionError, ConversionOp, ConvertError};
use crate::state::StreamConversionState;

type PairKey = (ApiFormat, ApiFormat);

/// Directed `(source, target)` lookup table of format converters.
///
/// Built once at startup; afterwards it is only read. Use [`SharedRegistry`]
/// when converters must be swapped while requests are in flight.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<PairKey, Arc<dyn FormatConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `converter` for `source -> target`, replacing any previous one.
    ///
    /// CLI formats are passthrough only and are refused.
    pub fn register(
        &mut self,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
        converter: Arc<dyn FormatConverter>,
    ) -> Result<(), ConversionError> {
        let source = ApiFormat::new(source);
        let target = ApiFormat::new(target);
        if source.is_cli() {
            return Err(ConversionError::CliFormat(source));
        }
        if target.is_cli() {
            return Err(ConversionError::CliFormat(target));
        }
        self.converters.insert((source, target), converter);
        Ok(())
    }

    pub fn get_converter(
        &self,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
    ) -> Option<Arc<dyn FormatConverter>> {
        self.converters
            .get(&(ApiFormat::new(source), ApiFormat::new(target)))
            .cloned()
    }

    pub fn has_converter(&self, source: impl AsRef<str>, target: impl AsRef<str>) -> bool {
        self.get_converter(source, target).is_some()
    }

    pub fn can_convert_request(&self, source: impl AsRef<str>, target: impl AsRef<str>) -> bool {
        self.get_converter(source, target)
            .is_some_and(|converter| converter.as_request().is_some())
    }

    pub fn can_convert_response(&self, source: impl AsRef<str>, target: impl AsRef<str>) -> bool {
        self.get_converter(source, target)
            .is_some_and(|converter| converter.as_response().is_some())
    }

    pub fn can_convert_stream(&self, source: impl AsRef<str>, target: impl AsRef<str>) -> bool {
        self.get_converter(source, target)
            .is_some_and(|converter| converter.as_stream().is_some())
    }

    /// Whether `source` and `target` can be bridged in both directions.
    ///
    /// Each direction needs request and response conversion, plus stream
    /// conversion when `require_stream` is set.
    pub fn can_convert_full(
        &self,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
        require_stream: bool,
    ) -> bool {
        let source = source.as_ref();
        let target = target.as_ref();
        let supports = |from: &str, to: &str| {
            self.can_convert_request(from, to)
                && self.can_convert_response(from, to)
                && (!require_stream || self.can_convert_stream(from, to))
        };
        supports(source, target) && supports(target, source)
    }

    pub fn get_supported_targets(&self, source: impl AsRef<str>) -> BTreeSet<ApiFormat> {
        let source = ApiFormat::new(source);
        self.converters
            .keys()
            .filter(|(from, _)| *from == source)
            .map(|(_, to)| to.clone())
            .collect()
    }

    pub fn list_converters(&self) -> Vec<(ApiFormat, ApiFormat)> {
        let mut pairs: Vec<_> = self.converters.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    fn lookup(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Arc<dyn FormatConverter>, ConversionError> {
        self.get_converter(source, target)
            .ok_or_else(|| ConversionError::NoConverter {
                from: ApiFormat::new(source),
                to: ApiFormat::new(target),
            })
    }

    pub fn convert_request_strict(
        &self,
        request: Value,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
    ) -> Result<Value, ConversionError> {
        let (source, target) = (source.as_ref(), target.as_ref());
        if is_same_format(source, target) {
            return Ok(request);
        }
        let converter = self.lookup(source, target)?;
        let capability = converter
            .as_request()
            .ok_or_else(|| unsupported(ConversionOp::Request, source, target))?;
        capability
            .convert_request(&request)
            .map_err(|cause| failed(ConversionOp::Request, source, target, cause))
    }

    pub fn convert_response_strict(
        &self,
        response: Value,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
    ) -> Result<Value, ConversionError> {
        let (source, target) = (source.as_ref(), target.as_ref());
        if is_same_format(source, target) {
            return Ok(response);
        }
        let converter = self.lookup(source, target)?;
        let capability = converter
            .as_response()
            .ok_or_else(|| unsupported(ConversionOp::Response, source, target))?;
        capability
            .convert_response(&response)
            .map_err(|cause| failed(ConversionOp::Response, source, target, cause))
    }

    pub fn convert_stream_chunk_strict(
        &self,
        chunk: Value,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
        state: &mut StreamConversionState,
    ) -> Result<Vec<Value>, ConversionError> {
        let (source, target) = (source.as_ref(), target.as_ref());
        if is_same_format(source, target) {
            return Ok(vec![chunk]);
        }
        let converter = self.lookup(source, target)?;
        let capability = converter
            .as_stream()
            .ok_or_else(|| unsupported(ConversionOp::Stream, source, target))?;
        capability
            .convert_stream_chunk(&chunk, state)
            .map_err(|cause| failed(ConversionOp::Stream, source, target, cause))
    }

    /// Drains events a stream converter buffered until the end of the stream.
    pub fn finish_stream_strict(
        &self,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
        state: &mut StreamConversionState,
    ) -> Result<Vec<Value>, ConversionError> {
        let (source, target) = (source.as_ref(), target.as_ref());
        if is_same_format(source, target) {
            return Ok(Vec::new());
        }
        let converter = self.lookup(source, target)?;
        let capability = converter
            .as_stream()
            .ok_or_else(|| unsupported(ConversionOp::Stream, source, target))?;
        capability
            .finish_stream(state)
            .map_err(|cause| failed(ConversionOp::Stream, source, target, cause))
    }

    /// Best-effort request conversion: any failure returns `request` as is.
    pub fn convert_request(
        &self,
        request: Value,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
    ) -> Value {
        let (source, target) = (source.as_ref(), target.as_ref());
        if is_same_format(source, target) {
            return request;
        }
        let converted = self.lookup(source, target).and_then(|converter| {
            let capability = converter
                .as_request()
                .ok_or_else(|| unsupported(ConversionOp::Request, source, target))?;
            capability
                .convert_request(&request)
                .map_err(|cause| failed(ConversionOp::Request, source, target, cause))
        });
        match converted {
            Ok(value) => value,
            Err(err) => {
                log_passthrough(&err);
                request
            }
        }
    }

    /// Best-effort response conversion: any failure returns `response` as is.
    pub fn convert_response(
        &self,
        response: Value,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
    ) -> Value {
        let (source, target) = (source.as_ref(), target.as_ref());
        if is_same_format(source, target) {
            return response;
        }
        let converted = self.lookup(source, target).and_then(|converter| {
            let capability = converter
                .as_response()
                .ok_or_else(|| unsupported(ConversionOp::Response, source, target))?;
            capability
                .convert_response(&response)
                .map_err(|cause| failed(ConversionOp::Response, source, target, cause))
        });
        match converted {
            Ok(value) => value,
            Err(err) => {
                log_passthrough(&err);
                response
            }
        }
    }

    /// Best-effort chunk conversion: any failure yields the unconverted chunk.
    pub fn convert_stream_chunk(
        &self,
        chunk: Value,
        source: impl AsRef<str>,
        target: impl AsRef<str>,
        state: &mut StreamConversionState,
    ) -> Vec<Value> {
        let (source, target) = (source.as_ref(), target.as_ref());
        if is_same_format(source, target) {
            return vec![chunk];
        }
        let converted = self.lookup(source, target).and_then(|converter| {
            let capability = converter
                .as_stream()
                .ok_or_else(|| unsupported(ConversionOp::Stream, source, target))?;
            capability
                .convert_stream_chunk(&chunk, state)
                .map_err(|cause| failed(ConversionOp::Stream, source, target, cause))
        });
        match converted {
            Ok(events) => events,
            Err(err) => {
                log_passthrough(&err);
                vec![chunk]
            }
        }
    }
}

fn unsupported(operation: ConversionOp, source: &str, target: &str) -> ConversionError {
    ConversionError::Unsupported {
        operation,
        from: ApiFormat::new(source),
        to: ApiFormat::new(target),
    }
}

fn failed(
    operation: ConversionOp,
    source: &str,
    target: &str,
    cause: ConvertError,
) -> ConversionError {
    ConversionError::Failed {
        operation,
        from: ApiFormat::new(source),
        to: ApiFormat::new(target),
        cause,
    }
}

fn log_passthrough(err: &ConversionError) {
    let operation = err
        .operation()
        .map(|op| op.to_string())
        .unwrap_or_default();
    warn!(
        operation = %operation,
        error = %err,
        "conversion failed, passing original payload through"
    );
}

/// Registry handle that can be hot-swapped without blocking readers.
///
/// Readers take a snapshot with [`SharedRegistry::load`]; updates clone the
/// current table, modify the copy and publish it atomically.
pub struct SharedRegistry {
    inner: ArcSwap<ConverterRegistry>,
}

impl SharedRegistry {
    pub fn new(registry: ConverterRegistry) -> Self {
        Self {
            inner: ArcSwap::from_pointee(registry),
        }
    }

    pub fn load(&self) -> Arc<ConverterRegistry> {
        self.inner.load_full()
    }

    pub fn replace(&self, registry: ConverterRegistry) {
        self.inner.store(Arc::new(registry));
    }

    pub fn update<F>(&self, mut apply: F)
    where
        F: FnMut(&mut ConverterRegistry),
    {
        self.inner.rcu(|current| {
            let mut next = ConverterRegistry::clone(current);
            apply(&mut next);
            next
        });
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(ConverterRegistry::new())
    }
}
