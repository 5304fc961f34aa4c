use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, claude_stop_from_openai, ensure_object, str_field, usage_from_openai,
};
use crate::state::StreamConversionState;

/// Block bookkeeping for one OpenAI chunk stream rendered as Claude events.
#[derive(Debug, Default)]
struct OpenAIToClaudeStream {
    finish_emitted: bool,
    pending_finish: Option<&'static str>,
    next_block_index: u64,
    text_block_index: Option<u64>,
    thinking_block_index: Option<u64>,
    /// OpenAI tool call index -> Claude content block index.
    tool_blocks: BTreeMap<i64, u64>,
}

pub fn transform_chunk(
    chunk: &Value,
    state: &mut StreamConversionState,
) -> Result<Vec<Value>, ConvertError> {
    ensure_object(chunk, "chat completion chunk")?;
    Ok(state.with_scratch(
        |stream: &mut OpenAIToClaudeStream, state: &mut StreamConversionState| {
            stream.transform_chunk(chunk, state)
        },
    ))
}

/// Closes the message when the upstream ended without a usage chunk.
pub fn finish(state: &mut StreamConversionState) -> Result<Vec<Value>, ConvertError> {
    Ok(state.with_scratch(
        |stream: &mut OpenAIToClaudeStream, state: &mut StreamConversionState| {
            if !state.message_started() || stream.finish_emitted {
                return Vec::new();
            }
            let mut events = stream.close_open_blocks();
            let reason = stream.pending_finish.take().unwrap_or("end_turn");
            events.extend(stream.finish_message(reason, state));
            events
        },
    ))
}

impl OpenAIToClaudeStream {
    fn transform_chunk(&mut self, chunk: &Value, state: &mut StreamConversionState) -> Vec<Value> {
        let mut events = Vec::new();

        let usage = chunk.get("usage").filter(|usage| usage.is_object());
        if let Some(usage) = usage {
            let (input, output) = usage_from_openai(usage);
            state.record_usage(input, output);
        }

        if !state.message_started() {
            state.mark_message_started();
            events.push(message_start(chunk, state));
        }

        let choice = array_field(chunk, "choices").first();
        if let Some(delta) = choice.and_then(|choice| choice.get("delta")) {
            if let Some(reasoning) = str_field(delta, "reasoning_content") {
                events.extend(self.emit_thinking(reasoning));
            }
            if let Some(content) = str_field(delta, "content") {
                events.extend(self.emit_text(content));
            }
            if let Some(refusal) = str_field(delta, "refusal") {
                events.extend(self.emit_text(refusal));
            }
            for call in array_field(delta, "tool_calls") {
                let index = call.get("index").and_then(Value::as_i64).unwrap_or(0);
                events.extend(self.emit_tool_call(index, call));
            }
            if let Some(function_call) = delta.get("function_call") {
                events.extend(self.emit_tool_call(-1, &json!({ "function": function_call })));
            }
        }

        let finish_reason = choice
            .and_then(|choice| str_field(choice, "finish_reason"))
            .map(claude_stop_from_openai);
        if let Some(reason) = finish_reason
            && !self.finish_emitted
        {
            events.extend(self.close_open_blocks());
            self.pending_finish = Some(reason);
        }

        if usage.is_some() && !self.finish_emitted {
            match self.pending_finish.take() {
                Some(reason) => events.extend(self.finish_message(reason, state)),
                None => events.push(message_delta(None, state)),
            }
        }

        events
    }

    fn emit_text(&mut self, text: &str) -> Vec<Value> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut events = stop_blocks(
            self.thinking_block_index
                .take()
                .into_iter()
                .chain(std::mem::take(&mut self.tool_blocks).into_values())
                .collect(),
        );
        let index = match self.text_block_index {
            Some(index) => index,
            None => {
                let index = self.allocate_block();
                self.text_block_index = Some(index);
                events.push(json!({
                    "type": "content_block_start",
                    "index": index,
                    "content_block": { "type": "text", "text": "" },
                }));
                index
            }
        };
        events.push(json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "text_delta", "text": text },
        }));
        events
    }

    fn emit_thinking(&mut self, thinking: &str) -> Vec<Value> {
        if thinking.is_empty() {
            return Vec::new();
        }
        let mut events = Vec::new();
        let index = match self.thinking_block_index {
            Some(index) => index,
            None => {
                let index = self.allocate_block();
                self.thinking_block_index = Some(index);
                events.push(json!({
                    "type": "content_block_start",
                    "index": index,
                    "content_block": { "type": "thinking", "thinking": "", "signature": "" },
                }));
                index
            }
        };
        events.push(json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "thinking_delta", "thinking": thinking },
        }));
        events
    }

    fn emit_tool_call(&mut self, index: i64, call: &Value) -> Vec<Value> {
        let mut events = Vec::new();
        let function = call.get("function").unwrap_or(&Value::Null);

        let block_index = match self.tool_blocks.get(&index) {
            Some(block_index) => *block_index,
            None => {
                events.extend(stop_blocks(
                    self.thinking_block_index
                        .take()
                        .into_iter()
                        .chain(self.text_block_index.take())
                        .collect(),
                ));
                let block_index = self.allocate_block();
                self.tool_blocks.insert(index, block_index);
                let id = str_field(call, "id")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("toolcall-{index}"));
                let name = str_field(function, "name").unwrap_or("tool");
                events.push(json!({
                    "type": "content_block_start",
                    "index": block_index,
                    "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} },
                }));
                block_index
            }
        };

        if let Some(arguments) = str_field(function, "arguments").filter(|a| !a.is_empty()) {
            events.push(json!({
                "type": "content_block_delta",
                "index": block_index,
                "delta": { "type": "input_json_delta", "partial_json": arguments },
            }));
        }
        events
    }

    fn close_open_blocks(&mut self) -> Vec<Value> {
        stop_blocks(
            self.thinking_block_index
                .take()
                .into_iter()
                .chain(self.text_block_index.take())
                .chain(std::mem::take(&mut self.tool_blocks).into_values())
                .collect(),
        )
    }

    fn finish_message(&mut self, reason: &str, state: &StreamConversionState) -> Vec<Value> {
        self.finish_emitted = true;
        vec![message_delta(Some(reason), state), json!({ "type": "message_stop" })]
    }

    fn allocate_block(&mut self) -> u64 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }
}

fn message_start(chunk: &Value, state: &StreamConversionState) -> Value {
    let model = str_field(chunk, "model")
        .filter(|model| !model.is_empty())
        .unwrap_or(state.model());
    json!({
        "type": "message_start",
        "message": {
            "id": state.message_id(),
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": [],
            "stop_reason": null,
            "stop_sequence": null,
            "usage": { "input_tokens": state.input_tokens, "output_tokens": 0 },
        },
    })
}

fn message_delta(reason: Option<&str>, state: &StreamConversionState) -> Value {
    json!({
        "type": "message_delta",
        "delta": { "stop_reason": reason, "stop_sequence": null },
        "usage": {
            "input_tokens": state.input_tokens,
            "output_tokens": state.output_tokens,
        },
    })
}

fn block_stop(index: u64) -> Value {
    json!({ "type": "content_block_stop", "index": index })
}

fn stop_blocks(mut indices: Vec<u64>) -> Vec<Value> {
    indices.sort_unstable();
    indices.into_iter().map(block_stop).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
        })
    }

    fn types(events: &[Value]) -> Vec<&str> {
        events
            .iter()
            .map(|event| event["type"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn text_stream_with_trailing_usage_chunk() {
        let mut state = StreamConversionState::new("claude-x", "msg_1");

        let first = transform_chunk(&chunk(json!({"role": "assistant", "content": "Hel"}), None), &mut state).unwrap();
        assert_eq!(
            types(&first),
            ["message_start", "content_block_start", "content_block_delta"]
        );
        assert_eq!(first[0]["message"]["id"], "msg_1");

        let second = transform_chunk(&chunk(json!({"content": "lo"}), None), &mut state).unwrap();
        assert_eq!(types(&second), ["content_block_delta"]);

        let finish = transform_chunk(&chunk(json!({}), Some("stop")), &mut state).unwrap();
        assert_eq!(types(&finish), ["content_block_stop"]);

        let usage = json!({
            "id": "chatcmpl-1", "model": "gpt-4o", "choices": [],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2}
        });
        let tail = transform_chunk(&usage, &mut state).unwrap();
        assert_eq!(types(&tail), ["message_delta", "message_stop"]);
        assert_eq!(tail[0]["delta"]["stop_reason"], "end_turn");
        assert_eq!(tail[0]["usage"]["output_tokens"], 2);
        assert_eq!((state.input_tokens, state.output_tokens), (9, 2));

        assert!(finish_stream_events(&mut state).is_empty());
    }

    #[test]
    fn finish_closes_message_without_usage_chunk() {
        let mut state = StreamConversionState::new("m", "msg_2");
        transform_chunk(&chunk(json!({"content": "x"}), Some("length")), &mut state).unwrap();
        let tail = finish_stream_events(&mut state);
        assert_eq!(types(&tail), ["message_delta", "message_stop"]);
        assert_eq!(tail[0]["delta"]["stop_reason"], "max_tokens");
    }

    #[test]
    fn tool_call_arguments_stream_into_one_block() {
        let mut state = StreamConversionState::new("m", "msg_3");
        let start = transform_chunk(
            &chunk(
                json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                    "function": {"name": "f", "arguments": ""}}]}),
                None,
            ),
            &mut state,
        )
        .unwrap();
        assert_eq!(types(&start), ["message_start", "content_block_start"]);
        assert_eq!(start[1]["content_block"]["id"], "call_1");

        let args = transform_chunk(
            &chunk(json!({"tool_calls": [{"index": 0, "function": {"arguments": "{}"}}]}), None),
            &mut state,
        )
        .unwrap();
        assert_eq!(args[0]["delta"]["partial_json"], "{}");
        assert_eq!(args[0]["index"], 0);
    }

    #[test]
    fn text_after_tool_call_closes_the_tool_block() {
        let mut state = StreamConversionState::new("m", "msg_4");
        transform_chunk(
            &chunk(
                json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                    "function": {"name": "f", "arguments": "{}"}}]}),
                None,
            ),
            &mut state,
        )
        .unwrap();

        let text = transform_chunk(&chunk(json!({"content": "done"}), None), &mut state).unwrap();
        assert_eq!(
            types(&text),
            ["content_block_stop", "content_block_start", "content_block_delta"]
        );
        assert_eq!(text[0]["index"], 0);
        assert_eq!(text[1]["index"], 1);
        assert_eq!(text[1]["content_block"]["type"], "text");

        let tail = transform_chunk(&chunk(json!({}), Some("stop")), &mut state).unwrap();
        assert_eq!(types(&tail), ["content_block_stop"]);
        assert_eq!(tail[0]["index"], 1);
    }

    #[test]
    fn tool_call_after_text_closes_the_text_block() {
        let mut state = StreamConversionState::new("m", "msg_5");
        transform_chunk(&chunk(json!({"content": "calling"}), None), &mut state).unwrap();

        let call = transform_chunk(
            &chunk(
                json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                    "function": {"name": "f", "arguments": ""}}]}),
                None,
            ),
            &mut state,
        )
        .unwrap();
        assert_eq!(types(&call), ["content_block_stop", "content_block_start"]);
        assert_eq!(call[0]["index"], 0);
        assert_eq!(call[1]["index"], 1);
    }

    fn finish_stream_events(state: &mut StreamConversionState) -> Vec<Value> {
        finish(state).unwrap()
    }
}
