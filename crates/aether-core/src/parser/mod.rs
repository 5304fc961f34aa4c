//! Per-format readers for upstream payloads.
//!
//! Parsers never fail: anything they cannot make sense of contributes no
//! text and no usage.

mod claude;
mod gemini;
mod openai;
mod openai_cli;

use aether_protocol::{ApiFormat, FormatFamily, SseEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use claude::ClaudeParser;
pub use gemini::GeminiParser;
pub use openai::OpenAIParser;
pub use openai_cli::OpenAICliParser;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none()
    }
}

/// One decoded SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedChunk {
    pub event: Option<String>,
    /// `data:` payload exactly as received.
    pub raw: String,
    /// `None` for the `[DONE]` sentinel.
    pub data: Option<Value>,
    pub text_delta: String,
    pub usage: TokenUsage,
    pub is_done: bool,
    pub error_message: Option<String>,
}

impl ParsedChunk {
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub raw: Value,
    pub status_code: u16,
    pub text: String,
    pub usage: TokenUsage,
    pub response_id: Option<String>,
    pub error_message: Option<String>,
}

impl ParsedResponse {
    pub fn is_error(&self) -> bool {
        self.error_message.is_some() || !(200..300).contains(&self.status_code)
    }
}

/// Running totals over one SSE parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunk_count: u64,
    pub data_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub collected_text: String,
    pub has_completion: bool,
    pub response_id: Option<String>,
}

impl StreamStats {
    fn absorb(&mut self, chunk: &ParsedChunk) {
        self.data_count += 1;
        if let Some(input) = chunk.usage.input_tokens.filter(|v| *v > 0) {
            self.input_tokens = input;
        }
        if let Some(output) = chunk.usage.output_tokens.filter(|v| *v > 0) {
            self.output_tokens = output;
        }
        self.collected_text.push_str(&chunk.text_delta);
        if chunk.is_done {
            self.has_completion = true;
        }
        if self.response_id.is_none()
            && let Some(id) = chunk.data.as_ref().and_then(response_id)
        {
            self.response_id = Some(id.to_string());
        }
    }
}

pub trait ResponseParser: Send + Sync {
    /// Fills text, usage and completion from one decoded JSON chunk.
    fn inspect_chunk(&self, data: &Value, chunk: &mut ParsedChunk);

    fn extract_usage_from_response(&self, response: &Value) -> TokenUsage;

    fn extract_text_content(&self, response: &Value) -> String;

    fn extract_error(&self, payload: &Value) -> Option<String> {
        let error = payload.get("error").filter(|e| !e.is_null())?;
        Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        )
    }

    /// Parses one complete SSE event and folds it into `stats`.
    ///
    /// Returns `None` for events without a usable payload.
    fn parse_sse_event(&self, event: &SseEvent, stats: &mut StreamStats) -> Option<ParsedChunk> {
        stats.chunk_count += 1;
        let raw = event.data.trim();
        if raw.is_empty() {
            return None;
        }

        let mut chunk = ParsedChunk {
            event: event.event.clone(),
            raw: raw.to_string(),
            ..ParsedChunk::default()
        };
        if event.is_done() {
            chunk.is_done = true;
        } else {
            let data: Value = match serde_json::from_str(raw) {
                Ok(data) => data,
                Err(err) => {
                    debug!(error = %err, "skipping undecodable sse payload");
                    return None;
                }
            };
            self.inspect_chunk(&data, &mut chunk);
            chunk.error_message = self.extract_error(&data);
            chunk.data = Some(data);
        }

        stats.absorb(&chunk);
        Some(chunk)
    }

    fn parse_response(&self, response: &Value, status_code: u16) -> ParsedResponse {
        ParsedResponse {
            raw: response.clone(),
            status_code,
            text: self.extract_text_content(response),
            usage: self.extract_usage_from_response(response),
            response_id: response_id(response).map(str::to_string),
            error_message: self.extract_error(response),
        }
    }
}

/// Parser for payloads an upstream of `format` produces.
///
/// Unknown families are read as OpenAI Chat Completions.
pub fn parser_for(format: &ApiFormat) -> &'static dyn ResponseParser {
    match (format.family(), format.is_cli()) {
        (Some(FormatFamily::OpenAI), true) => &OpenAICliParser,
        (Some(FormatFamily::Claude), _) => &ClaudeParser,
        (Some(FormatFamily::Gemini), _) => &GeminiParser,
        _ => &OpenAIParser,
    }
}

/// Chat/Messages `id`, Gemini `responseId`, or either nested in a Claude
/// `message` or a `response` envelope.
fn response_id(payload: &Value) -> Option<&str> {
    fn own(value: &Value) -> Option<&str> {
        value
            .get("id")
            .or_else(|| value.get("responseId"))
            .and_then(Value::as_str)
    }
    own(payload)
        .or_else(|| payload.get("message").and_then(own))
        .or_else(|| payload.get("response").and_then(own))
}

fn u64_at(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn picks_parser_by_family() {
        let text = |format: &str, payload: Value| {
            parser_for(&ApiFormat::new(format)).extract_text_content(&payload)
        };
        assert_eq!(
            text("openai:chat", json!({"choices": [{"message": {"content": "a"}}]})),
            "a"
        );
        assert_eq!(
            text("CLAUDE_CLI", json!({"content": [{"type": "text", "text": "b"}]})),
            "b"
        );
        assert_eq!(
            text(
                "gemini:cli",
                json!({"response": {"candidates": [{"content": {"parts": [{"text": "c"}]}}]}})
            ),
            "c"
        );
        assert_eq!(
            text("openai:cli", json!({"output_text": "d"})),
            "d"
        );
        assert_eq!(
            text("mystery", json!({"choices": [{"message": {"content": "e"}}]})),
            "e"
        );
    }

    #[test]
    fn done_sentinel_completes_without_payload() {
        let mut stats = StreamStats::default();
        let chunk = OpenAIParser
            .parse_sse_event(&event("[DONE]"), &mut stats)
            .unwrap();
        assert!(chunk.is_done);
        assert!(chunk.data.is_none());
        assert!(stats.has_completion);
    }

    #[test]
    fn undecodable_payload_is_skipped() {
        let mut stats = StreamStats::default();
        assert!(
            OpenAIParser
                .parse_sse_event(&event("{not json"), &mut stats)
                .is_none()
        );
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.data_count, 0);
    }

    #[test]
    fn error_payloads_are_flagged() {
        let mut stats = StreamStats::default();
        let chunk = OpenAIParser
            .parse_sse_event(
                &event(r#"{"error":{"message":"overloaded","type":"server_error"}}"#),
                &mut stats,
            )
            .unwrap();
        assert_eq!(chunk.error_message.as_deref(), Some("overloaded"));

        let parsed = ClaudeParser.parse_response(&json!({"type": "error", "error": "nope"}), 400);
        assert!(parsed.is_error());
        assert_eq!(parsed.error_message.as_deref(), Some("nope"));
    }
}
