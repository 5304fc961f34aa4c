use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, claude_stop_from_openai, content_text, ensure_object, generated_id,
    parse_arguments, str_field, usage_from_openai,
};

/// Convert an OpenAI chat-completions response into a Claude message response.
pub fn transform_response(response: &Value) -> Result<Value, ConvertError> {
    ensure_object(response, "chat completions response")?;

    let choice = array_field(response, "choices").first();
    let message = choice
        .and_then(|choice| choice.get("message"))
        .unwrap_or(&Value::Null);

    let mut content = Vec::new();
    if let Some(reasoning) = str_field(message, "reasoning_content").filter(|r| !r.is_empty()) {
        content.push(json!({ "type": "thinking", "thinking": reasoning, "signature": "" }));
    }
    let text = content_text(message.get("content").unwrap_or(&Value::Null));
    if !text.is_empty() {
        content.push(json!({ "type": "text", "text": text }));
    }
    if let Some(refusal) = str_field(message, "refusal").filter(|r| !r.is_empty()) {
        content.push(json!({ "type": "text", "text": refusal }));
    }
    for call in array_field(message, "tool_calls") {
        let function = call.get("function").unwrap_or(&Value::Null);
        content.push(json!({
            "type": "tool_use",
            "id": str_field(call, "id").map(str::to_string).unwrap_or_else(|| generated_id("toolu_")),
            "name": str_field(function, "name").unwrap_or("tool"),
            "input": parse_arguments(str_field(function, "arguments").unwrap_or_default()),
        }));
    }

    let stop_reason = choice
        .and_then(|choice| str_field(choice, "finish_reason"))
        .map(claude_stop_from_openai);
    let (input_tokens, output_tokens) = response
        .get("usage")
        .map(usage_from_openai)
        .unwrap_or_default();

    Ok(json!({
        "id": str_field(response, "id").map(str::to_string).unwrap_or_else(|| generated_id("msg_")),
        "type": "message",
        "role": "assistant",
        "model": str_field(response, "model").unwrap_or("unknown"),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens.unwrap_or(0),
            "output_tokens": output_tokens.unwrap_or(0),
        },
    }))
}
