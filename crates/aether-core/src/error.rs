use aether_transform::ConversionError;

/// Failure of the non-streaming response path.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("upstream body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}
