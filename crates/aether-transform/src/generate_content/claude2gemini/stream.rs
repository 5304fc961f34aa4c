use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    ensure_object, gemini_finish_from_claude, gemini_usage, parse_arguments, str_field,
    u64_field, usage_from_claude,
};
use crate::state::StreamConversionState;

#[derive(Debug, Default)]
struct ToolInfo {
    id: String,
    name: String,
    arguments: String,
}

/// Claude streams tool input as JSON fragments; Gemini wants each call whole,
/// so tool blocks are held until their `content_block_stop`.
#[derive(Debug, Default)]
struct ClaudeToGeminiStream {
    model: Option<String>,
    stop_reason: Option<&'static str>,
    tool_blocks: BTreeMap<u64, ToolInfo>,
    finished: bool,
}

pub fn transform_chunk(
    chunk: &Value,
    state: &mut StreamConversionState,
) -> Result<Vec<Value>, ConvertError> {
    ensure_object(chunk, "message stream event")?;
    Ok(state.with_scratch(
        |stream: &mut ClaudeToGeminiStream, state: &mut StreamConversionState| {
            stream.transform_event(chunk, state)
        },
    ))
}

pub fn finish(state: &mut StreamConversionState) -> Result<Vec<Value>, ConvertError> {
    Ok(state.with_scratch(
        |stream: &mut ClaudeToGeminiStream, state: &mut StreamConversionState| {
            if !state.message_started() || stream.finished {
                return Vec::new();
            }
            stream.finish_response(state)
        },
    ))
}

impl ClaudeToGeminiStream {
    fn transform_event(&mut self, event: &Value, state: &mut StreamConversionState) -> Vec<Value> {
        if !state.message_started() {
            state.mark_message_started();
        }

        match str_field(event, "type").unwrap_or_default() {
            "message_start" => {
                let message = event.get("message").unwrap_or(&Value::Null);
                if let Some(model) = str_field(message, "model") {
                    self.model = Some(model.to_string());
                }
                if let Some(usage) = message.get("usage") {
                    let (input, output) = usage_from_claude(usage);
                    state.record_usage(input, output);
                }
                Vec::new()
            }
            "content_block_start" => {
                let index = u64_field(event, "index").unwrap_or(0);
                let block = event.get("content_block").unwrap_or(&Value::Null);
                match str_field(block, "type") {
                    Some("text") => match str_field(block, "text").filter(|t| !t.is_empty()) {
                        Some(text) => vec![self.chunk(vec![json!({ "text": text })], None, state)],
                        None => Vec::new(),
                    },
                    Some("tool_use" | "server_tool_use") => {
                        let input = block
                            .get("input")
                            .filter(|input| input.as_object().is_some_and(|o| !o.is_empty()));
                        self.tool_blocks.insert(
                            index,
                            ToolInfo {
                                id: str_field(block, "id").unwrap_or_default().to_string(),
                                name: str_field(block, "name").unwrap_or("tool").to_string(),
                                arguments: input.map(Value::to_string).unwrap_or_default(),
                            },
                        );
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_delta" => {
                let index = u64_field(event, "index").unwrap_or(0);
                let delta = event.get("delta").unwrap_or(&Value::Null);
                match str_field(delta, "type") {
                    Some("text_delta") => match str_field(delta, "text").filter(|t| !t.is_empty()) {
                        Some(text) => vec![self.chunk(vec![json!({ "text": text })], None, state)],
                        None => Vec::new(),
                    },
                    Some("thinking_delta") => {
                        match str_field(delta, "thinking").filter(|t| !t.is_empty()) {
                            Some(thinking) => vec![self.chunk(
                                vec![json!({ "text": thinking, "thought": true })],
                                None,
                                state,
                            )],
                            None => Vec::new(),
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(tool), Some(partial)) = (
                            self.tool_blocks.get_mut(&index),
                            str_field(delta, "partial_json"),
                        ) {
                            tool.arguments.push_str(partial);
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => {
                let index = u64_field(event, "index").unwrap_or(0);
                match self.tool_blocks.remove(&index) {
                    Some(tool) => vec![self.chunk(vec![function_call_part(tool)], None, state)],
                    None => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(reason) = event
                    .get("delta")
                    .and_then(|delta| str_field(delta, "stop_reason"))
                {
                    self.stop_reason = Some(gemini_finish_from_claude(reason));
                }
                if let Some(usage) = event.get("usage") {
                    let (input, output) = usage_from_claude(usage);
                    state.record_usage(input, output);
                }
                Vec::new()
            }
            "message_stop" if !self.finished => self.finish_response(state),
            _ => Vec::new(),
        }
    }

    fn finish_response(&mut self, state: &StreamConversionState) -> Vec<Value> {
        self.finished = true;
        let mut events = Vec::new();
        let pending: Vec<Value> = std::mem::take(&mut self.tool_blocks)
            .into_values()
            .map(function_call_part)
            .collect();
        if !pending.is_empty() {
            events.push(self.chunk(pending, None, state));
        }
        let reason = self.stop_reason.unwrap_or("STOP");
        let mut last = self.chunk(Vec::new(), Some(reason), state);
        if let Some(object) = last.as_object_mut() {
            object.insert(
                "usageMetadata".to_string(),
                gemini_usage(state.input_tokens, state.output_tokens),
            );
        }
        events.push(last);
        events
    }

    fn chunk(&self, parts: Vec<Value>, finish_reason: Option<&str>, state: &StreamConversionState) -> Value {
        let mut candidate = json!({
            "content": { "role": "model", "parts": parts },
            "index": 0,
        });
        if let Some(reason) = finish_reason {
            candidate["finishReason"] = json!(reason);
        }
        json!({
            "candidates": [candidate],
            "modelVersion": self.model.as_deref().unwrap_or(state.model()),
            "responseId": state.message_id(),
        })
    }
}

fn function_call_part(tool: ToolInfo) -> Value {
    json!({ "functionCall": {
        "id": tool.id,
        "name": tool.name,
        "args": parse_arguments(&tool.arguments),
    }})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut StreamConversionState, event: Value) -> Vec<Value> {
        transform_chunk(&event, state).unwrap()
    }

    #[test]
    fn full_event_sequence() {
        let mut state = StreamConversionState::new("gemini", "resp");
        assert!(
            feed(&mut state, json!({"type": "message_start", "message": {
                "model": "claude-sonnet", "usage": {"input_tokens": 30, "output_tokens": 0}
            }}))
            .is_empty()
        );
        feed(&mut state, json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}));
        let text = feed(&mut state, json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "yo"}}));
        assert_eq!(text[0]["candidates"][0]["content"]["parts"][0]["text"], "yo");
        assert_eq!(text[0]["modelVersion"], "claude-sonnet");

        feed(&mut state, json!({"type": "content_block_start", "index": 1,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {}}}));
        assert!(feed(&mut state, json!({"type": "content_block_delta", "index": 1,
            "delta": {"type": "input_json_delta", "partial_json": "{\"x\":"}})).is_empty());
        feed(&mut state, json!({"type": "content_block_delta", "index": 1,
            "delta": {"type": "input_json_delta", "partial_json": "1}"}}));
        let call = feed(&mut state, json!({"type": "content_block_stop", "index": 1}));
        assert_eq!(
            call[0]["candidates"][0]["content"]["parts"][0]["functionCall"]["args"],
            json!({"x": 1})
        );

        feed(&mut state, json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 12}}));
        let last = feed(&mut state, json!({"type": "message_stop"}));
        assert_eq!(last.len(), 1);
        assert_eq!(last[0]["candidates"][0]["finishReason"], "STOP");
        assert_eq!(last[0]["usageMetadata"]["promptTokenCount"], 30);
        assert_eq!(last[0]["usageMetadata"]["candidatesTokenCount"], 12);
        assert!(finish(&mut state).unwrap().is_empty());
    }

    #[test]
    fn finish_emits_final_chunk_after_cut_stream() {
        let mut state = StreamConversionState::new("gemini", "resp");
        feed(&mut state, json!({"type": "message_start", "message": {}}));
        let tail = finish(&mut state).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0]["candidates"][0]["finishReason"], "STOP");
    }
}
