use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, claude_stop_from_gemini, ensure_object, gemini_payload, str_field,
    usage_from_gemini,
};
use crate::state::StreamConversionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(u64),
    Thinking(u64),
}

#[derive(Debug, Default)]
struct GeminiToClaudeStream {
    next_block_index: u64,
    open_block: Option<OpenBlock>,
    saw_tool_call: bool,
    finished: bool,
}

pub fn transform_chunk(
    chunk: &Value,
    state: &mut StreamConversionState,
) -> Result<Vec<Value>, ConvertError> {
    ensure_object(chunk, "generateContent chunk")?;
    let chunk = gemini_payload(chunk);
    Ok(state.with_scratch(
        |stream: &mut GeminiToClaudeStream, state: &mut StreamConversionState| {
            stream.transform_chunk(chunk, state)
        },
    ))
}

pub fn finish(state: &mut StreamConversionState) -> Result<Vec<Value>, ConvertError> {
    Ok(state.with_scratch(
        |stream: &mut GeminiToClaudeStream, state: &mut StreamConversionState| {
            if !state.message_started() || stream.finished {
                return Vec::new();
            }
            let reason = if stream.saw_tool_call { "tool_use" } else { "end_turn" };
            stream.finish_message(reason, state)
        },
    ))
}

impl GeminiToClaudeStream {
    fn transform_chunk(&mut self, chunk: &Value, state: &mut StreamConversionState) -> Vec<Value> {
        if let Some(usage) = chunk.get("usageMetadata") {
            let (input, output) = usage_from_gemini(usage);
            state.record_usage(input, output);
        }

        let mut events = Vec::new();
        if !state.message_started() {
            state.mark_message_started();
            let model = str_field(chunk, "modelVersion").unwrap_or(state.model());
            events.push(json!({
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
            }));
        }

        let Some(candidate) = array_field(chunk, "candidates").first() else {
            return events;
        };
        let parts = candidate
            .get("content")
            .map(|content| array_field(content, "parts"))
            .unwrap_or_default();

        for part in parts {
            if let Some(call) = part.get("functionCall") {
                self.saw_tool_call = true;
                events.extend(self.emit_function_call(call, state));
            } else if let Some(text) = str_field(part, "text").filter(|t| !t.is_empty()) {
                let thought = part.get("thought").and_then(Value::as_bool) == Some(true);
                events.extend(self.emit_text(text, thought));
            }
        }

        if let Some(reason) = str_field(candidate, "finishReason")
            && !self.finished
        {
            let reason = claude_stop_from_gemini(reason, self.saw_tool_call);
            events.extend(self.finish_message(reason, state));
        }

        events
    }

    fn emit_text(&mut self, text: &str, thought: bool) -> Vec<Value> {
        let mut events = Vec::new();
        let index = match (self.open_block, thought) {
            (Some(OpenBlock::Text(index)), false) | (Some(OpenBlock::Thinking(index)), true) => {
                index
            }
            _ => {
                events.extend(self.close_open_block());
                let index = self.allocate_block();
                let (block, open) = if thought {
                    (
                        json!({ "type": "thinking", "thinking": "", "signature": "" }),
                        OpenBlock::Thinking(index),
                    )
                } else {
                    (json!({ "type": "text", "text": "" }), OpenBlock::Text(index))
                };
                self.open_block = Some(open);
                events.push(json!({
                    "type": "content_block_start",
                    "index": index,
                    "content_block": block,
                }));
                index
            }
        };
        let delta = if thought {
            json!({ "type": "thinking_delta", "thinking": text })
        } else {
            json!({ "type": "text_delta", "text": text })
        };
        events.push(json!({ "type": "content_block_delta", "index": index, "delta": delta }));
        events
    }

    fn emit_function_call(&mut self, call: &Value, state: &StreamConversionState) -> Vec<Value> {
        let mut events = self.close_open_block();
        let index = self.allocate_block();
        let id = str_field(call, "id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("toolu_{}_{index}", state.message_id()));
        let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
        events.push(json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "tool_use",
                "id": id,
                "name": str_field(call, "name").unwrap_or("tool"),
                "input": {},
            },
        }));
        events.push(json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "input_json_delta", "partial_json": args.to_string() },
        }));
        events.push(json!({ "type": "content_block_stop", "index": index }));
        events
    }

    fn finish_message(&mut self, reason: &str, state: &StreamConversionState) -> Vec<Value> {
        self.finished = true;
        let mut events = self.close_open_block();
        events.push(json!({
            "type": "message_delta",
            "delta": { "stop_reason": reason, "stop_sequence": null },
            "usage": {
                "input_tokens": state.input_tokens,
                "output_tokens": state.output_tokens,
            },
        }));
        events.push(json!({ "type": "message_stop" }));
        events
    }

    fn close_open_block(&mut self) -> Vec<Value> {
        match self.open_block.take() {
            Some(OpenBlock::Text(index) | OpenBlock::Thinking(index)) => {
                vec![json!({ "type": "content_block_stop", "index": index })]
            }
            None => Vec::new(),
        }
    }

    fn allocate_block(&mut self) -> u64 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(events: &[Value]) -> Vec<&str> {
        events
            .iter()
            .map(|event| event["type"].as_str().unwrap())
            .collect()
    }

    fn text_chunk(text: &str) -> Value {
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}],
            "modelVersion": "gemini-2.5-flash"})
    }

    #[test]
    fn message_start_is_emitted_once() {
        let mut state = StreamConversionState::new("claude", "msg_g");
        let first = transform_chunk(&text_chunk("a"), &mut state).unwrap();
        assert_eq!(
            types(&first),
            ["message_start", "content_block_start", "content_block_delta"]
        );
        assert_eq!(first[0]["message"]["model"], "gemini-2.5-flash");

        let second = transform_chunk(&text_chunk("b"), &mut state).unwrap();
        assert_eq!(types(&second), ["content_block_delta"]);

        let last = transform_chunk(
            &json!({"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}}),
            &mut state,
        )
        .unwrap();
        assert_eq!(types(&last), ["content_block_stop", "message_delta", "message_stop"]);
        assert_eq!(last[1]["delta"]["stop_reason"], "end_turn");
        assert_eq!(last[1]["usage"]["output_tokens"], 2);
        assert!(finish(&mut state).unwrap().is_empty());
    }

    #[test]
    fn thinking_then_text_switches_blocks() {
        let mut state = StreamConversionState::new("claude", "msg");
        let events = transform_chunk(
            &json!({"candidates": [{"content": {"parts": [
                {"text": "plan", "thought": true},
                {"text": "answer"}
            ]}}]}),
            &mut state,
        )
        .unwrap();
        assert_eq!(
            types(&events),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta"
            ]
        );
        assert_eq!(events[1]["content_block"]["type"], "thinking");
        assert_eq!(events[4]["index"], 1);
    }

    #[test]
    fn function_call_is_a_complete_block() {
        let mut state = StreamConversionState::new("claude", "msg");
        let events = transform_chunk(
            &json!({"candidates": [{"content": {"parts": [
                {"functionCall": {"name": "f", "args": {"a": 1}}}
            ]}, "finishReason": "STOP"}]}),
            &mut state,
        )
        .unwrap();
        assert_eq!(
            types(&events),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert_eq!(events[2]["delta"]["partial_json"], "{\"a\":1}");
        assert_eq!(events[4]["delta"]["stop_reason"], "tool_use");
    }
}
