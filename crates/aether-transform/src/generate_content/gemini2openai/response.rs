use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    arguments_string, array_field, ensure_object, gemini_parts_text, gemini_payload,
    generated_id, now_unix, openai_finish_from_gemini, openai_usage, str_field,
    usage_from_gemini,
};

/// Convert a Gemini generateContent response into an OpenAI chat-completions response.
pub fn transform_response(response: &Value) -> Result<Value, ConvertError> {
    ensure_object(response, "generateContent response")?;
    let response = gemini_payload(response);

    let choices: Vec<Value> = array_field(response, "candidates")
        .iter()
        .enumerate()
        .map(|(position, candidate)| map_candidate(position, candidate))
        .collect();

    let (input_tokens, output_tokens) = response
        .get("usageMetadata")
        .map(usage_from_gemini)
        .unwrap_or_default();

    Ok(json!({
        "id": str_field(response, "responseId")
            .map(|id| format!("chatcmpl-{id}"))
            .unwrap_or_else(|| generated_id("chatcmpl-")),
        "object": "chat.completion",
        "created": now_unix(),
        "model": str_field(response, "modelVersion").unwrap_or("unknown"),
        "choices": choices,
        "usage": openai_usage(input_tokens.unwrap_or(0), output_tokens.unwrap_or(0)),
    }))
}

fn map_candidate(position: usize, candidate: &Value) -> Value {
    let parts = candidate
        .get("content")
        .map(|content| array_field(content, "parts"))
        .unwrap_or_default();

    let text = gemini_parts_text(parts);
    let reasoning: String = parts
        .iter()
        .filter(|part| part.get("thought").and_then(Value::as_bool) == Some(true))
        .filter_map(|part| str_field(part, "text"))
        .collect();
    let tool_calls: Vec<Value> = parts
        .iter()
        .filter_map(|part| part.get("functionCall"))
        .enumerate()
        .map(|(call_index, call)| {
            json!({
                "id": str_field(call, "id")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{call_index}")),
                "type": "function",
                "function": {
                    "name": str_field(call, "name").unwrap_or("tool"),
                    "arguments": arguments_string(call.get("args")),
                },
            })
        })
        .collect();

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert(
        "content".to_string(),
        if text.is_empty() && !tool_calls.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        },
    );
    if !reasoning.is_empty() {
        message.insert("reasoning_content".to_string(), Value::String(reasoning));
    }
    let has_tool_calls = !tool_calls.is_empty();
    if has_tool_calls {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }

    let finish_reason = str_field(candidate, "finishReason")
        .map(|reason| openai_finish_from_gemini(reason, has_tool_calls));
    json!({
        "index": candidate.get("index").and_then(Value::as_u64).unwrap_or(position as u64),
        "message": message,
        "finish_reason": finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_cli_envelope_and_maps_usage() {
        let response = json!({"response": {
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "plan", "thought": true},
                    {"text": "answer"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 2, "thoughtsTokenCount": 1},
            "modelVersion": "gemini-2.5-flash",
            "responseId": "abc"
        }});

        let out = transform_response(&response).unwrap();
        assert_eq!(out["id"], "chatcmpl-abc");
        assert_eq!(out["model"], "gemini-2.5-flash");
        let message = &out["choices"][0]["message"];
        assert_eq!(message["content"], "answer");
        assert_eq!(message["reasoning_content"], "plan");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["prompt_tokens"], 8);
        assert_eq!(out["usage"]["completion_tokens"], 3);
    }

    #[test]
    fn function_calls_force_tool_calls_finish() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "f", "args": {"x": true}}}]},
                "finishReason": "STOP"
            }]
        });
        let out = transform_response(&response).unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(out["choices"][0]["message"]["content"], Value::Null);
        assert_eq!(
            out["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"],
            "{\"x\":true}"
        );
    }
}
