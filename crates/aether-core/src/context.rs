use aether_protocol::{ApiFormat, needs_conversion};

use crate::parser::StreamStats;

pub const STATUS_OK: u16 = 200;
pub const STATUS_CLIENT_CLOSED: u16 = 499;
pub const STATUS_CONVERSION_FAILED: u16 = 500;
pub const STATUS_UPSTREAM_FAILED: u16 = 502;

/// Everything one request/response cycle learns while it runs.
///
/// The processor is the only writer; billing and logging read the finished
/// context once the output stream has closed.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub request_id: String,
    pub model: String,
    /// Format the client speaks.
    pub api_format: ApiFormat,
    /// Format the upstream answers in.
    pub provider_api_format: ApiFormat,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub has_completion: bool,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub first_byte_ms: Option<u64>,
    pub elapsed_ms: Option<u64>,
    pub stats: StreamStats,
}

impl StreamContext {
    /// Context for a client whose upstream speaks the same format.
    pub fn new(model: impl Into<String>, api_format: impl AsRef<str>) -> Self {
        let api_format = ApiFormat::new(api_format);
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            model: model.into(),
            provider_api_format: api_format.clone(),
            api_format,
            input_tokens: 0,
            output_tokens: 0,
            has_completion: false,
            status_code: STATUS_OK,
            error_message: None,
            first_byte_ms: None,
            elapsed_ms: None,
            stats: StreamStats::default(),
        }
    }

    pub fn with_provider_format(mut self, provider_api_format: impl AsRef<str>) -> Self {
        self.provider_api_format = ApiFormat::new(provider_api_format);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn needs_conversion(&self) -> bool {
        needs_conversion(&self.api_format, &self.provider_api_format)
    }

    /// Takes the latest non-zero counts; repeated reports never add up.
    pub fn record_usage(&mut self, input_tokens: Option<u64>, output_tokens: Option<u64>) {
        if let Some(input) = input_tokens.filter(|value| *value > 0) {
            self.input_tokens = input;
        }
        if let Some(output) = output_tokens.filter(|value| *value > 0) {
            self.output_tokens = output;
        }
    }

    pub fn mark_completed(&mut self) {
        self.has_completion = true;
    }

    /// Records a terminal failure. The first failure wins.
    pub fn fail(&mut self, status_code: u16, message: impl Into<String>) {
        if self.error_message.is_some() {
            return;
        }
        self.status_code = status_code;
        self.error_message = Some(message.into());
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code) && self.error_message.is_none()
    }
}
