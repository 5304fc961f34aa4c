use serde_json::{Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, ensure_object, gemini_finish_from_claude, gemini_usage, str_field,
    usage_from_claude,
};

/// Convert a Claude message response into a Gemini generateContent response.
pub fn transform_response(response: &Value) -> Result<Value, ConvertError> {
    ensure_object(response, "message response")?;

    let parts: Vec<Value> = array_field(response, "content")
        .iter()
        .filter_map(|block| match str_field(block, "type") {
            Some("text") => str_field(block, "text").map(|text| json!({ "text": text })),
            Some("thinking") => str_field(block, "thinking")
                .map(|thinking| json!({ "text": thinking, "thought": true })),
            Some("tool_use" | "server_tool_use") => Some(json!({ "functionCall": {
                "id": str_field(block, "id"),
                "name": str_field(block, "name").unwrap_or("tool"),
                "args": block.get("input").cloned().unwrap_or_else(|| json!({})),
            }})),
            _ => None,
        })
        .collect();

    let finish_reason = str_field(response, "stop_reason")
        .map(gemini_finish_from_claude)
        .unwrap_or("STOP");
    let (input_tokens, output_tokens) = response
        .get("usage")
        .map(usage_from_claude)
        .unwrap_or_default();

    Ok(json!({
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": finish_reason,
            "index": 0,
        }],
        "usageMetadata": gemini_usage(input_tokens.unwrap_or(0), output_tokens.unwrap_or(0)),
        "modelVersion": str_field(response, "model").unwrap_or("unknown"),
        "responseId": str_field(response, "id").unwrap_or_default(),
    }))
}
