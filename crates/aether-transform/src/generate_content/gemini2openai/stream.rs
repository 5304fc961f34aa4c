use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    arguments_string, array_field, ensure_object, gemini_payload, openai_chunk,
    openai_finish_from_gemini, openai_usage, str_field, usage_from_gemini,
};
use crate::state::StreamConversionState;

#[derive(Debug, Default)]
struct GeminiToOpenAIStream {
    model: Option<String>,
    next_tool_index: u64,
    finish_emitted: bool,
}

pub fn transform_chunk(
    chunk: &Value,
    state: &mut StreamConversionState,
) -> Result<Vec<Value>, ConvertError> {
    ensure_object(chunk, "generateContent chunk")?;
    let chunk = gemini_payload(chunk);
    Ok(state.with_scratch(
        |stream: &mut GeminiToOpenAIStream, state: &mut StreamConversionState| {
            stream.transform_chunk(chunk, state)
        },
    ))
}

pub fn finish(state: &mut StreamConversionState) -> Result<Vec<Value>, ConvertError> {
    Ok(state.with_scratch(
        |stream: &mut GeminiToOpenAIStream, state: &mut StreamConversionState| {
            if !state.message_started() || stream.finish_emitted {
                return Vec::new();
            }
            vec![stream.finish_chunk("stop", state)]
        },
    ))
}

impl GeminiToOpenAIStream {
    fn transform_chunk(&mut self, chunk: &Value, state: &mut StreamConversionState) -> Vec<Value> {
        if let Some(model) = str_field(chunk, "modelVersion") {
            self.model = Some(model.to_string());
        }
        if let Some(usage) = chunk.get("usageMetadata") {
            let (input, output) = usage_from_gemini(usage);
            state.record_usage(input, output);
        }

        let mut events = Vec::new();
        if !state.message_started() {
            state.mark_message_started();
            events.push(self.chunk(json!({ "role": "assistant", "content": "" }), None, state));
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
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                let id = str_field(call, "id")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}_{index}", state.message_id()));
                events.push(self.chunk(
                    json!({ "tool_calls": [{
                        "index": index,
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": str_field(call, "name").unwrap_or("tool"),
                            "arguments": arguments_string(call.get("args")),
                        },
                    }] }),
                    None,
                    state,
                ));
                continue;
            }
            let Some(text) = str_field(part, "text").filter(|text| !text.is_empty()) else {
                continue;
            };
            let delta = if part.get("thought").and_then(Value::as_bool) == Some(true) {
                json!({ "reasoning_content": text })
            } else {
                json!({ "content": text })
            };
            events.push(self.chunk(delta, None, state));
        }

        if let Some(reason) = str_field(candidate, "finishReason")
            && !self.finish_emitted
        {
            let reason = openai_finish_from_gemini(reason, self.next_tool_index > 0);
            events.push(self.finish_chunk(reason, state));
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

#[cfg(test)]
mod tests {
    use super::*;

    fn gemini_chunk(parts: Value, finish_reason: Option<&str>, usage: Option<Value>) -> Value {
        let mut chunk = json!({
            "candidates": [{"content": {"role": "model", "parts": parts}, "index": 0}],
            "modelVersion": "gemini-2.5-pro"
        });
        if let Some(reason) = finish_reason {
            chunk["candidates"][0]["finishReason"] = json!(reason);
        }
        if let Some(usage) = usage {
            chunk["usageMetadata"] = usage;
        }
        chunk
    }

    #[test]
    fn role_chunk_emitted_once() {
        let mut state = StreamConversionState::new("gpt", "chatcmpl-x");
        let first = transform_chunk(&gemini_chunk(json!([{"text": "a"}]), None, None), &mut state).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first[1]["choices"][0]["delta"]["content"], "a");

        let second = transform_chunk(&gemini_chunk(json!([{"text": "b"}]), None, None), &mut state).unwrap();
        assert_eq!(second.len(), 1);

        let last = transform_chunk(
            &gemini_chunk(
                json!([]),
                Some("MAX_TOKENS"),
                Some(json!({"promptTokenCount": 5, "candidatesTokenCount": 7})),
            ),
            &mut state,
        )
        .unwrap();
        assert_eq!(last[0]["choices"][0]["finish_reason"], "length");
        assert_eq!(last[0]["usage"]["total_tokens"], 12);
        assert_eq!((state.input_tokens, state.output_tokens), (5, 7));
        assert!(finish(&mut state).unwrap().is_empty());
    }

    #[test]
    fn function_calls_arrive_whole() {
        let mut state = StreamConversionState::new("gpt", "id");
        let events = transform_chunk(
            &json!({"response": {"candidates": [{
                "content": {"parts": [{"functionCall": {"name": "f", "args": {"k": "v"}}}]},
                "finishReason": "STOP"
            }]}}),
            &mut state,
        )
        .unwrap();
        assert_eq!(events.len(), 3);
        let call = &events[1]["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["function"]["arguments"], "{\"k\":\"v\"}");
        assert_eq!(events[2]["choices"][0]["finish_reason"], "tool_calls");
    }
}
