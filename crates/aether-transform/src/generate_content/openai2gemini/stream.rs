use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, ensure_object, gemini_finish_from_openai, gemini_usage, parse_arguments,
    str_field, usage_from_openai,
};
use crate::state::StreamConversionState;

#[derive(Debug, Default)]
struct PendingCall {
    name: String,
    arguments: String,
}

/// Gemini emits whole function calls, so streamed arguments are buffered
/// until the choice finishes.
#[derive(Debug, Default)]
struct OpenAIToGeminiStream {
    model: Option<String>,
    tool_calls: BTreeMap<i64, PendingCall>,
    pending_finish: Option<&'static str>,
    finished: bool,
}

pub fn transform_chunk(
    chunk: &Value,
    state: &mut StreamConversionState,
) -> Result<Vec<Value>, ConvertError> {
    ensure_object(chunk, "chat completion chunk")?;
    Ok(state.with_scratch(
        |stream: &mut OpenAIToGeminiStream, state: &mut StreamConversionState| {
            stream.transform_chunk(chunk, state)
        },
    ))
}

pub fn finish(state: &mut StreamConversionState) -> Result<Vec<Value>, ConvertError> {
    Ok(state.with_scratch(
        |stream: &mut OpenAIToGeminiStream, state: &mut StreamConversionState| {
            if !state.message_started() || stream.finished {
                return Vec::new();
            }
            let mut events = stream.flush_tool_calls(state).into_iter().collect::<Vec<_>>();
            let reason = stream.pending_finish.take().unwrap_or("STOP");
            events.push(stream.final_chunk(reason, state));
            events
        },
    ))
}

impl OpenAIToGeminiStream {
    fn transform_chunk(&mut self, chunk: &Value, state: &mut StreamConversionState) -> Vec<Value> {
        if !state.message_started() {
            state.mark_message_started();
        }
        if self.model.is_none()
            && let Some(model) = str_field(chunk, "model").filter(|model| !model.is_empty())
        {
            self.model = Some(model.to_string());
        }

        let usage = chunk.get("usage").filter(|usage| usage.is_object());
        if let Some(usage) = usage {
            let (input, output) = usage_from_openai(usage);
            state.record_usage(input, output);
        }

        let mut events = Vec::new();
        let choice = array_field(chunk, "choices").first();
        if let Some(delta) = choice.and_then(|choice| choice.get("delta")) {
            let mut parts = Vec::new();
            if let Some(reasoning) = str_field(delta, "reasoning_content").filter(|r| !r.is_empty()) {
                parts.push(json!({ "text": reasoning, "thought": true }));
            }
            if let Some(text) = str_field(delta, "content").filter(|t| !t.is_empty()) {
                parts.push(json!({ "text": text }));
            }
            if !parts.is_empty() {
                events.push(self.chunk(parts, None, state));
            }
            for call in array_field(delta, "tool_calls") {
                let index = call.get("index").and_then(Value::as_i64).unwrap_or(0);
                let pending = self.tool_calls.entry(index).or_default();
                if let Some(function) = call.get("function") {
                    if let Some(name) = str_field(function, "name") {
                        pending.name.push_str(name);
                    }
                    if let Some(arguments) = str_field(function, "arguments") {
                        pending.arguments.push_str(arguments);
                    }
                }
            }
        }

        if let Some(reason) = choice.and_then(|choice| str_field(choice, "finish_reason"))
            && !self.finished
        {
            events.extend(self.flush_tool_calls(state));
            self.pending_finish = Some(gemini_finish_from_openai(reason));
        }

        if usage.is_some()
            && !self.finished
            && let Some(reason) = self.pending_finish.take()
        {
            events.push(self.final_chunk(reason, state));
        }

        events
    }

    fn flush_tool_calls(&mut self, state: &StreamConversionState) -> Option<Value> {
        if self.tool_calls.is_empty() {
            return None;
        }
        let parts = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|call| {
                let name = if call.name.is_empty() { "tool".to_string() } else { call.name };
                json!({ "functionCall": {
                    "name": name,
                    "args": parse_arguments(&call.arguments),
                }})
            })
            .collect();
        Some(self.chunk(parts, None, state))
    }

    fn final_chunk(&mut self, reason: &str, state: &StreamConversionState) -> Value {
        self.finished = true;
        let mut chunk = self.chunk(Vec::new(), Some(reason), state);
        if let Some(object) = chunk.as_object_mut() {
            object.insert(
                "usageMetadata".to_string(),
                gemini_usage(state.input_tokens, state.output_tokens),
            );
        }
        chunk
    }

    fn chunk(&self, parts: Vec<Value>, finish_reason: Option<&str>, state: &StreamConversionState) -> Value {
        let mut candidate = Map::new();
        candidate.insert(
            "content".to_string(),
            json!({ "role": "model", "parts": parts }),
        );
        if let Some(reason) = finish_reason {
            candidate.insert("finishReason".to_string(), json!(reason));
        }
        candidate.insert("index".to_string(), json!(0));
        json!({
            "candidates": [candidate],
            "modelVersion": self.model.as_deref().unwrap_or(state.model()),
            "responseId": state.message_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": "c1", "model": "gpt-4o",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
        })
    }

    #[test]
    fn text_then_finish_then_usage() {
        let mut state = StreamConversionState::new("gemini", "resp_1");
        let text = transform_chunk(&chunk(json!({"role": "assistant", "content": "hey"}), None), &mut state).unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(text[0]["candidates"][0]["content"]["parts"][0]["text"], "hey");
        assert_eq!(text[0]["modelVersion"], "gpt-4o");

        let finish_chunk = transform_chunk(&chunk(json!({}), Some("stop")), &mut state).unwrap();
        assert!(finish_chunk.is_empty());

        let usage = json!({"id": "c1", "model": "gpt-4o", "choices": [],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}});
        let tail = transform_chunk(&usage, &mut state).unwrap();
        assert_eq!(tail[0]["candidates"][0]["finishReason"], "STOP");
        assert_eq!(tail[0]["usageMetadata"]["promptTokenCount"], 3);
        assert!(finish(&mut state).unwrap().is_empty());
    }

    #[test]
    fn tool_arguments_are_buffered_until_finish() {
        let mut state = StreamConversionState::new("gemini", "resp_2");
        let first = transform_chunk(
            &chunk(json!({"tool_calls": [{"index": 0, "id": "c", "function": {"name": "f", "arguments": "{\"a\":"}}]}), None),
            &mut state,
        )
        .unwrap();
        assert!(first.is_empty());
        transform_chunk(
            &chunk(json!({"tool_calls": [{"index": 0, "function": {"arguments": "2}"}}]}), None),
            &mut state,
        )
        .unwrap();
        let flushed = transform_chunk(&chunk(json!({}), Some("tool_calls")), &mut state).unwrap();
        assert_eq!(
            flushed[0]["candidates"][0]["content"]["parts"][0]["functionCall"],
            json!({"name": "f", "args": {"a": 2}})
        );

        let tail = finish(&mut state).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0]["candidates"][0]["finishReason"], "STOP");
    }
}
