use serde_json::Value;

use super::{ParsedChunk, ResponseParser, TokenUsage, u64_at};

/// OpenAI Chat Completions (`chat.completion` / `chat.completion.chunk`).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIParser;

impl ResponseParser for OpenAIParser {
    fn inspect_chunk(&self, data: &Value, chunk: &mut ParsedChunk) {
        // Usage-only chunks arrive with an empty choice list.
        if let Some(usage) = data.get("usage") {
            chunk.usage = usage_of(usage);
        }
        let choices = data
            .get("choices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for choice in choices {
            if let Some(delta) = choice.get("delta") {
                if let Some(text) = delta.get("content").and_then(Value::as_str) {
                    chunk.text_delta.push_str(text);
                }
                if let Some(text) = delta.get("refusal").and_then(Value::as_str) {
                    chunk.text_delta.push_str(text);
                }
            }
        }
    }

    fn extract_usage_from_response(&self, response: &Value) -> TokenUsage {
        response.get("usage").map(usage_of).unwrap_or_default()
    }

    fn extract_text_content(&self, response: &Value) -> String {
        let Some(message) = response
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
        else {
            return String::new();
        };
        match message.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect(),
            _ => String::new(),
        }
    }
}

fn usage_of(usage: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: u64_at(usage, "prompt_tokens"),
        output_tokens: u64_at(usage, "completion_tokens"),
    }
}
