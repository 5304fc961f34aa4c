use std::fmt;

use aether_protocol::ApiFormat;

/// Failure raised inside a single converter operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionOp {
    Request,
    Response,
    Stream,
}

impl fmt::Display for ConversionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConversionOp::Request => "request",
            ConversionOp::Response => "response",
            ConversionOp::Stream => "stream chunk",
        })
    }
}

/// Error surfaced by the registry's strict API.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("no converter found for {from} -> {to}")]
    NoConverter { from: ApiFormat, to: ApiFormat },
    #[error("{operation} conversion is not supported for {from} -> {to}")]
    Unsupported {
        operation: ConversionOp,
        from: ApiFormat,
        to: ApiFormat,
    },
    #[error("{operation} conversion failed ({from} -> {to}): {cause}")]
    Failed {
        operation: ConversionOp,
        from: ApiFormat,
        to: ApiFormat,
        #[source]
        cause: ConvertError,
    },
    #[error("cli format {0} cannot be registered for conversion")]
    CliFormat(ApiFormat),
}

impl ConversionError {
    pub fn operation(&self) -> Option<ConversionOp> {
        match self {
            ConversionError::Unsupported { operation, .. }
            | ConversionError::Failed { operation, .. } => Some(*operation),
            ConversionError::NoConverter { .. } | ConversionError::CliFormat(_) => None,
        }
    }
}

/// Malformed request shaping configuration.
#[derive(Debug, thiserror::Error)]
pub enum ShapingError {
    #[error("invalid body rule: {0}")]
    InvalidRule(#[from] serde_json::Error),
    #[error("body rules must be a JSON array")]
    NotAList,
}
