use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, claude_stop_from_gemini, ensure_object, gemini_payload, generated_id,
    str_field, usage_from_gemini,
};

/// Convert a Gemini generateContent response into a Claude message response.
pub fn transform_response(response: &Value) -> Result<Value, ConvertError> {
    ensure_object(response, "generateContent response")?;
    let response = gemini_payload(response);

    let candidate = array_field(response, "candidates").first();
    let parts = candidate
        .and_then(|candidate| candidate.get("content"))
        .map(|content| array_field(content, "parts"))
        .unwrap_or_default();

    let mut content = Vec::new();
    for part in parts {
        if let Some(call) = part.get("functionCall") {
            content.push(json!({
                "type": "tool_use",
                "id": str_field(call, "id")
                    .map(str::to_string)
                    .unwrap_or_else(|| generated_id("toolu_")),
                "name": str_field(call, "name").unwrap_or("tool"),
                "input": call.get("args").cloned().unwrap_or_else(|| json!({})),
            }));
        } else if let Some(text) = str_field(part, "text") {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                content.push(json!({
                    "type": "thinking",
                    "thinking": text,
                    "signature": str_field(part, "thoughtSignature").unwrap_or_default(),
                }));
            } else {
                content.push(json!({ "type": "text", "text": text }));
            }
        }
    }

    let has_tool_calls = content.iter().any(|block| block["type"] == "tool_use");
    let stop_reason = candidate
        .and_then(|candidate| str_field(candidate, "finishReason"))
        .map(|reason| claude_stop_from_gemini(reason, has_tool_calls));
    let (input_tokens, output_tokens) = response
        .get("usageMetadata")
        .map(usage_from_gemini)
        .unwrap_or_default();

    Ok(json!({
        "id": str_field(response, "responseId")
            .map(|id| format!("msg_{id}"))
            .unwrap_or_else(|| generated_id("msg_")),
        "type": "message",
        "role": "assistant",
        "model": str_field(response, "modelVersion").unwrap_or("unknown"),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens.unwrap_or(0),
            "output_tokens": output_tokens.unwrap_or(0),
        },
    }))
}
