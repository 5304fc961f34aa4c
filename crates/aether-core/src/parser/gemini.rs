use serde_json::Value;

use super::{ParsedChunk, ResponseParser, TokenUsage, u64_at};

/// Gemini generateContent, with or without the CLI `{"response": ..}` envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiParser;

impl ResponseParser for GeminiParser {
    fn inspect_chunk(&self, data: &Value, chunk: &mut ParsedChunk) {
        let data = unwrap_envelope(data);
        if let Some(usage) = data.get("usageMetadata") {
            chunk.usage = usage_of(usage);
        }
        chunk.text_delta.push_str(&candidate_text(data));
        if first_candidate(data)
            .and_then(|c| c.get("finishReason"))
            .is_some_and(|reason| !reason.is_null())
        {
            chunk.is_done = true;
        }
    }

    fn extract_usage_from_response(&self, response: &Value) -> TokenUsage {
        unwrap_envelope(response)
            .get("usageMetadata")
            .map(usage_of)
            .unwrap_or_default()
    }

    fn extract_text_content(&self, response: &Value) -> String {
        candidate_text(unwrap_envelope(response))
    }
}

fn unwrap_envelope(payload: &Value) -> &Value {
    match payload.get("response") {
        Some(inner) if inner.is_object() => inner,
        _ => payload,
    }
}

fn first_candidate(payload: &Value) -> Option<&Value> {
    payload.get("candidates").and_then(|c| c.get(0))
}

fn candidate_text(payload: &Value) -> String {
    first_candidate(payload)
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("thought").and_then(Value::as_bool) != Some(true))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Thinking tokens are billed as output.
fn usage_of(usage: &Value) -> TokenUsage {
    let candidates = u64_at(usage, "candidatesTokenCount");
    let thoughts = u64_at(usage, "thoughtsTokenCount");
    let output = match (candidates, thoughts) {
        (None, None) => None,
        (c, t) => Some(c.unwrap_or(0) + t.unwrap_or(0)),
    };
    TokenUsage {
        input_tokens: u64_at(usage, "promptTokenCount"),
        output_tokens: output,
    }
}

#[cfg(test)]
mod tests {
    use aether_protocol::SseEvent;
    use serde_json::json;

    use super::*;
    use crate::parser::StreamStats;

    #[test]
    fn unwraps_cli_envelope_in_stream() {
        let mut stats = StreamStats::default();
        let data = json!({"response": {
            "responseId": "r-1",
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "draft", "thought": true},
                {"text": "final"}
            ]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4, "thoughtsTokenCount": 2}
        }});
        let chunk = GeminiParser
            .parse_sse_event(
                &SseEvent {
                    event: None,
                    data: data.to_string(),
                },
                &mut stats,
            )
            .unwrap();
        assert!(chunk.is_done);
        assert_eq!(stats.collected_text, "final");
        assert_eq!((stats.input_tokens, stats.output_tokens), (12, 6));
        assert_eq!(stats.response_id.as_deref(), Some("r-1"));
    }

    #[test]
    fn missing_usage_is_empty() {
        assert!(
            GeminiParser
                .extract_usage_from_response(&json!({"candidates": []}))
                .is_empty()
        );
    }
}
