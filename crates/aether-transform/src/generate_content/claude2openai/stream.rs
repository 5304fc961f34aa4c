use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    arguments_string, ensure_object, openai_chunk, openai_finish_from_claude, openai_usage,
    str_field, u64_field, usage_from_claude,
};
use crate::state::StreamConversionState;

#[derive(Debug, Default)]
struct ClaudeToOpenAIStream {
    model: Option<String>,
    /// Claude content block index -> OpenAI tool call index.
    tool_calls: BTreeMap<u64, u64>,
    finish_emitted: bool,
}

pub fn transform_chunk(
    chunk: &Value,
    state: &mut StreamConversionState,
) -> Result<Vec<Value>, ConvertError> {
    ensure_object(chunk, "message stream event")?;
    Ok(state.with_scratch(
        |stream: &mut ClaudeToOpenAIStream, state: &mut StreamConversionState| {
            stream.transform_event(chunk, state)
        },
    ))
}

/// A Claude stream cut before `message_delta` still gets a finish chunk.
pub fn finish(state: &mut StreamConversionState) -> Result<Vec<Value>, ConvertError> {
    Ok(state.with_scratch(
        |stream: &mut ClaudeToOpenAIStream, state: &mut StreamConversionState| {
            if !state.message_started() || stream.finish_emitted {
                return Vec::new();
            }
            vec![stream.finish_chunk("stop", state)]
        },
    ))
}

impl ClaudeToOpenAIStream {
    fn transform_event(&mut self, event: &Value, state: &mut StreamConversionState) -> Vec<Value> {
        let mut events = Vec::new();
        let kind = str_field(event, "type").unwrap_or_default();

        if kind == "message_start" {
            let message = event.get("message").unwrap_or(&Value::Null);
            if let Some(model) = str_field(message, "model") {
                self.model = Some(model.to_string());
            }
            if let Some(usage) = message.get("usage") {
                let (input, output) = usage_from_claude(usage);
                state.record_usage(input, output);
            }
        }

        if !state.message_started() && !matches!(kind, "ping" | "error") {
            state.mark_message_started();
            events.push(self.chunk(json!({ "role": "assistant", "content": "" }), None, state));
        }

        match kind {
            "content_block_start" => {
                let index = u64_field(event, "index").unwrap_or(0);
                let block = event.get("content_block").unwrap_or(&Value::Null);
                match str_field(block, "type") {
                    Some("text") => {
                        if let Some(text) = str_field(block, "text").filter(|t| !t.is_empty()) {
                            events.push(self.chunk(json!({ "content": text }), None, state));
                        }
                    }
                    Some("tool_use" | "server_tool_use") => {
                        let position = self.tool_calls.len() as u64;
                        self.tool_calls.insert(index, position);
                        let input = block.get("input").filter(|input| {
                            input.as_object().is_some_and(|object| !object.is_empty())
                        });
                        let arguments = input
                            .map(|input| arguments_string(Some(input)))
                            .unwrap_or_default();
                        events.push(self.chunk(
                            json!({ "tool_calls": [{
                                "index": position,
                                "id": str_field(block, "id").unwrap_or_default(),
                                "type": "function",
                                "function": {
                                    "name": str_field(block, "name").unwrap_or("tool"),
                                    "arguments": arguments,
                                },
                            }] }),
                            None,
                            state,
                        ));
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let index = u64_field(event, "index").unwrap_or(0);
                let delta = event.get("delta").unwrap_or(&Value::Null);
                match str_field(delta, "type") {
                    Some("text_delta") => {
                        if let Some(text) = str_field(delta, "text") {
                            events.push(self.chunk(json!({ "content": text }), None, state));
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(thinking) = str_field(delta, "thinking") {
                            events.push(self.chunk(
                                json!({ "reasoning_content": thinking }),
                                None,
                                state,
                            ));
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(position), Some(partial)) = (
                            self.tool_calls.get(&index).copied(),
                            str_field(delta, "partial_json"),
                        ) {
                            events.push(self.chunk(
                                json!({ "tool_calls": [{
                                    "index": position,
                                    "function": { "arguments": partial },
                                }] }),
                                None,
                                state,
                            ));
                        }
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(usage) = event.get("usage") {
                    let (input, output) = usage_from_claude(usage);
                    state.record_usage(input, output);
                }
                let reason = event
                    .get("delta")
                    .and_then(|delta| str_field(delta, "stop_reason"))
                    .map(openai_finish_from_claude);
                if let Some(reason) = reason
                    && !self.finish_emitted
                {
                    events.push(self.finish_chunk(reason, state));
                }
            }
            "error" => {
                events.push(json!({ "error": event.get("error").cloned().unwrap_or(Value::Null) }));
            }
            _ => {}
        }

        events
    }

    fn finish_chunk(&mut self, reason: &str, state: &StreamConversionState) -> Value {
        self.finish_emitted = true;
        let mut chunk = self.chunk(json!({}), Some(reason), state);
        if let Some(object) = chunk.as_object_mut() {
            object.insert(
                "usage".to_string(),
                openai_usage(state.input_tokens, state.output_tokens),
            );
        }
        chunk
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, state: &StreamConversionState) -> Value {
        let model = self.model.as_deref().unwrap_or(state.model());
        openai_chunk(state.message_id(), model, state.created(), delta, finish_reason)
    }
}
