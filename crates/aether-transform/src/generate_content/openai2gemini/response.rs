use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, content_text, ensure_object, gemini_finish_from_openai, gemini_usage,
    parse_arguments, str_field, usage_from_openai,
};

/// Convert an OpenAI chat-completions response into a Gemini generateContent response.
pub fn transform_response(response: &Value) -> Result<Value, ConvertError> {
    ensure_object(response, "chat completions response")?;

    let candidates: Vec<Value> = array_field(response, "choices")
        .iter()
        .enumerate()
        .map(|(position, choice)| {
            let message = choice.get("message").unwrap_or(&Value::Null);
            let mut parts = Vec::new();
            if let Some(reasoning) = str_field(message, "reasoning_content").filter(|r| !r.is_empty())
            {
                parts.push(json!({ "text": reasoning, "thought": true }));
            }
            let text = content_text(message.get("content").unwrap_or(&Value::Null));
            if !text.is_empty() {
                parts.push(json!({ "text": text }));
            }
            for call in array_field(message, "tool_calls") {
                let function = call.get("function").unwrap_or(&Value::Null);
                parts.push(json!({ "functionCall": {
                    "name": str_field(function, "name").unwrap_or("tool"),
                    "args": parse_arguments(str_field(function, "arguments").unwrap_or_default()),
                }}));
            }
            let index = choice
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(position as u64);
            json!({
                "content": { "role": "model", "parts": parts },
                "finishReason": str_field(choice, "finish_reason").map(gemini_finish_from_openai),
                "index": index,
            })
        })
        .collect();

    let (input_tokens, output_tokens) = response
        .get("usage")
        .map(usage_from_openai)
        .unwrap_or_default();

    Ok(json!({
        "candidates": candidates,
        "usageMetadata": gemini_usage(input_tokens.unwrap_or(0), output_tokens.unwrap_or(0)),
        "modelVersion": str_field(response, "model").unwrap_or("unknown"),
        "responseId": str_field(response, "id").unwrap_or_default(),
    }))
}
