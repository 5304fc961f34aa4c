use serde_json::Value;

use super::{ParsedChunk, ResponseParser, TokenUsage, u64_at};

/// Claude Messages, also used for the CLI variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeParser;

impl ResponseParser for ClaudeParser {
    fn inspect_chunk(&self, data: &Value, chunk: &mut ParsedChunk) {
        match data.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(usage) = data.get("message").and_then(|m| m.get("usage")) {
                    chunk.usage = usage_of(usage);
                }
            }
            Some("content_block_delta") => {
                let delta = data.get("delta");
                if let Some(text) = delta
                    .filter(|d| d.get("type").and_then(Value::as_str) == Some("text_delta"))
                    .and_then(|d| d.get("text"))
                    .and_then(Value::as_str)
                {
                    chunk.text_delta.push_str(text);
                }
            }
            Some("message_delta") => {
                if let Some(usage) = data.get("usage") {
                    chunk.usage = usage_of(usage);
                }
            }
            Some("message_stop") => chunk.is_done = true,
            _ => {}
        }
    }

    fn extract_usage_from_response(&self, response: &Value) -> TokenUsage {
        response.get("usage").map(usage_of).unwrap_or_default()
    }

    fn extract_text_content(&self, response: &Value) -> String {
        response
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Cache reads and writes are billed as input.
fn usage_of(usage: &Value) -> TokenUsage {
    let input = u64_at(usage, "input_tokens");
    let cached = u64_at(usage, "cache_creation_input_tokens").unwrap_or(0)
        + u64_at(usage, "cache_read_input_tokens").unwrap_or(0);
    let input = match input {
        Some(input) => Some(input + cached),
        None if cached > 0 => Some(cached),
        None => None,
    };
    TokenUsage {
        input_tokens: input,
        output_tokens: u64_at(usage, "output_tokens"),
    }
}
