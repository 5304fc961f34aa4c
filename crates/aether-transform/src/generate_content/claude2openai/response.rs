use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    arguments_string, array_field, ensure_object, generated_id, now_unix,
    openai_finish_from_claude, openai_usage, str_field, usage_from_claude,
};

/// Convert a Claude message response into an OpenAI chat-completions response.
pub fn transform_response(response: &Value) -> Result<Value, ConvertError> {
    ensure_object(response, "message response")?;

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    for block in array_field(response, "content") {
        match str_field(block, "type") {
            Some("text") => text.push_str(str_field(block, "text").unwrap_or_default()),
            Some("thinking") => reasoning.push_str(str_field(block, "thinking").unwrap_or_default()),
            Some("tool_use" | "server_tool_use") => tool_calls.push(json!({
                "id": str_field(block, "id").unwrap_or_default(),
                "type": "function",
                "function": {
                    "name": str_field(block, "name").unwrap_or("tool"),
                    "arguments": arguments_string(block.get("input")),
                },
            })),
            _ => {}
        }
    }

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
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }

    let finish_reason = str_field(response, "stop_reason").map(openai_finish_from_claude);
    let (input_tokens, output_tokens) = response
        .get("usage")
        .map(usage_from_claude)
        .unwrap_or_default();

    Ok(json!({
        "id": str_field(response, "id").map(str::to_string).unwrap_or_else(|| generated_id("chatcmpl-")),
        "object": "chat.completion",
        "created": now_unix(),
        "model": str_field(response, "model").unwrap_or("unknown"),
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": openai_usage(input_tokens.unwrap_or(0), output_tokens.unwrap_or(0)),
    }))
}
