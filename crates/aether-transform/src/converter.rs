use serde_json::Value;

use crate::error::ConvertError;
use crate::state::StreamConversionState;

/// Base capability every registered converter implements.
///
/// The optional capabilities are discovered through the `as_*` accessors; a
/// converter that returns `None` simply does not support that operation.
pub trait FormatConverter: Send + Sync {
    fn as_request(&self) -> Option<&dyn RequestConverter> {
        None
    }

    fn as_response(&self) -> Option<&dyn ResponseConverter> {
        None
    }

    fn as_stream(&self) -> Option<&dyn StreamChunkConverter> {
        None
    }
}

pub trait RequestConverter: Send + Sync {
    fn convert_request(&self, request: &Value) -> Result<Value, ConvertError>;
}

pub trait ResponseConverter: Send + Sync {
    fn convert_response(&self, response: &Value) -> Result<Value, ConvertError>;
}

pub trait StreamChunkConverter: Send + Sync {
    /// Converts one upstream chunk into zero or more target events.
    ///
    /// Must not touch anything but `state`. The returned order is the order
    /// the events are written to the client.
    fn convert_stream_chunk(
        &self,
        chunk: &Value,
        state: &mut StreamConversionState,
    ) -> Result<Vec<Value>, ConvertError>;

    /// Flushes whatever the converter still buffers once the upstream closed.
    fn finish_stream(
        &self,
        state: &mut StreamConversionState,
    ) -> Result<Vec<Value>, ConvertError> {
        let _ = state;
        Ok(Vec::new())
    }
}
