use serde_json::Value;

use super::{ParsedChunk, ResponseParser, TokenUsage, u64_at};

/// OpenAI Responses API event stream, as spoken by the CLI passthrough.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAICliParser;

impl ResponseParser for OpenAICliParser {
    fn inspect_chunk(&self, data: &Value, chunk: &mut ParsedChunk) {
        match data.get("type").and_then(Value::as_str) {
            Some("response.output_text.delta" | "response.refusal.delta") => {
                if let Some(delta) = data.get("delta").and_then(Value::as_str) {
                    chunk.text_delta.push_str(delta);
                }
            }
            Some("response.completed" | "response.incomplete") => {
                if let Some(usage) = data.get("response").and_then(|r| r.get("usage")) {
                    chunk.usage = usage_of(usage);
                }
                chunk.is_done = true;
            }
            Some("response.failed") => chunk.is_done = true,
            _ => {}
        }
    }

    fn extract_error(&self, payload: &Value) -> Option<String> {
        if payload.get("type").and_then(Value::as_str) == Some("response.failed") {
            return payload
                .get("response")
                .and_then(|r| r.get("error"))
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some("response failed".to_string()));
        }
        let error = payload.get("error").filter(|e| !e.is_null())?;
        Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        )
    }

    fn extract_usage_from_response(&self, response: &Value) -> TokenUsage {
        response.get("usage").map(usage_of).unwrap_or_default()
    }

    fn extract_text_content(&self, response: &Value) -> String {
        if let Some(text) = response.get("output_text").and_then(Value::as_str) {
            return text.to_string();
        }
        let Some(output) = response.get("output").and_then(Value::as_array) else {
            return String::new();
        };
        output
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
            .filter_map(|item| item.get("content").and_then(Value::as_array))
            .flatten()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect()
    }
}

fn usage_of(usage: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: u64_at(usage, "input_tokens"),
        output_tokens: u64_at(usage, "output_tokens"),
    }
}
