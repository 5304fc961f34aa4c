use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, copy_field, ensure_object, gemini_parts_text, str_field,
};
use crate::generate_content::openai2claude::request::DEFAULT_MAX_TOKENS;

/// Convert a Gemini generateContent request into a Claude create-message request.
pub fn transform_request(request: &Value) -> Result<Value, ConvertError> {
    ensure_object(request, "generateContent request")?;
    let contents = request
        .get("contents")
        .and_then(Value::as_array)
        .ok_or(ConvertError::MissingField("contents"))?;

    let mut open_calls: HashMap<String, VecDeque<String>> = HashMap::new();
    let mut next_call = 0usize;
    let mut messages: Vec<Value> = Vec::new();

    for content in contents {
        let role = match str_field(content, "role") {
            Some("model") => "assistant",
            _ => "user",
        };
        let mut blocks = Vec::new();
        for part in array_field(content, "parts") {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(text) = str_field(part, "text").filter(|text| !text.is_empty()) {
                blocks.push(json!({ "type": "text", "text": text }));
            } else if let Some(call) = part.get("functionCall") {
                let name = str_field(call, "name").unwrap_or("tool").to_string();
                let id = str_field(call, "id")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("toolu_{next_call}"));
                next_call += 1;
                open_calls.entry(name.clone()).or_default().push_back(id.clone());
                blocks.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": call.get("args").cloned().unwrap_or_else(|| json!({})),
                }));
            } else if let Some(result) = part.get("functionResponse") {
                let name = str_field(result, "name").unwrap_or("tool");
                let id = str_field(result, "id")
                    .map(str::to_string)
                    .or_else(|| open_calls.get_mut(name).and_then(VecDeque::pop_front))
                    .unwrap_or_else(|| format!("toolu_{name}"));
                let response = result.get("response").unwrap_or(&Value::Null);
                let text = match response.get("content") {
                    Some(Value::String(text)) => text.clone(),
                    _ => response.to_string(),
                };
                blocks.push(json!({ "type": "tool_result", "tool_use_id": id, "content": text }));
            } else if let Some(inline) = part.get("inlineData") {
                blocks.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": str_field(inline, "mimeType").unwrap_or("image/png"),
                        "data": str_field(inline, "data").unwrap_or_default(),
                    },
                }));
            }
        }
        if blocks.is_empty() {
            continue;
        }
        if let Some(last) = messages.last_mut()
            && str_field(last, "role") == Some(role)
            && let Some(existing) = last.get_mut("content").and_then(Value::as_array_mut)
        {
            existing.extend(blocks);
            continue;
        }
        messages.push(json!({ "role": role, "content": blocks }));
    }

    let mut out = Map::new();
    out.insert(
        "model".to_string(),
        json!(str_field(request, "model").unwrap_or("unknown")),
    );
    if let Some(system) = request
        .get("systemInstruction")
        .or_else(|| request.get("system_instruction"))
    {
        let text = gemini_parts_text(array_field(system, "parts"));
        if !text.is_empty() {
            out.insert("system".to_string(), Value::String(text));
        }
    }
    out.insert("messages".to_string(), Value::Array(messages));

    let config = request
        .get("generationConfig")
        .or_else(|| request.get("generation_config"))
        .unwrap_or(&Value::Null);
    let max_tokens = config
        .get("maxOutputTokens")
        .or_else(|| config.get("max_output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_TOKENS);
    out.insert("max_tokens".to_string(), json!(max_tokens));
    copy_field(config, &mut out, "temperature", "temperature");
    copy_field(config, &mut out, "topP", "top_p");
    copy_field(config, &mut out, "topK", "top_k");
    copy_field(config, &mut out, "stopSequences", "stop_sequences");
    if let Some(budget) = config
        .get("thinkingConfig")
        .and_then(|thinking| thinking.get("thinkingBudget"))
        .and_then(Value::as_u64)
        .filter(|budget| *budget > 0)
    {
        out.insert(
            "thinking".to_string(),
            json!({ "type": "enabled", "budget_tokens": budget }),
        );
    }
    copy_field(request, &mut out, "stream", "stream");

    let tools: Vec<Value> = array_field(request, "tools")
        .iter()
        .flat_map(|tool| array_field(tool, "functionDeclarations"))
        .filter_map(|declaration| {
            let name = str_field(declaration, "name")?;
            let mut tool = Map::new();
            tool.insert("name".to_string(), json!(name));
            copy_field(declaration, &mut tool, "description", "description");
            tool.insert(
                "input_schema".to_string(),
                declaration
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            );
            Some(Value::Object(tool))
        })
        .collect();
    if !tools.is_empty() {
        out.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(choice) = request
        .get("toolConfig")
        .and_then(|config| config.get("functionCallingConfig"))
        .and_then(map_calling_config)
    {
        out.insert("tool_choice".to_string(), choice);
    }

    Ok(Value::Object(out))
}

fn map_calling_config(calling: &Value) -> Option<Value> {
    match str_field(calling, "mode")? {
        "ANY" => match array_field(calling, "allowedFunctionNames") {
            [only] => only
                .as_str()
                .map(|name| json!({ "type": "tool", "name": name })),
            _ => Some(json!({ "type": "any" })),
        },
        "NONE" => Some(json!({ "type": "none" })),
        "AUTO" | "VALIDATED" => Some(json!({ "type": "auto" })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_contents_and_generation_config() {
        let request = json!({
            "systemInstruction": {"parts": [{"text": "a"}, {"text": "b"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "go"}]},
                {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"functionCall": {"name": "run", "args": {}}}
                ]},
                {"role": "user", "parts": [{"functionResponse": {"name": "run", "response": {"ok": true}}}]},
                {"role": "user", "parts": [{"text": "next"}]}
            ],
            "generationConfig": {"temperature": 0.1, "thinkingConfig": {"thinkingBudget": 512}},
            "toolConfig": {"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["run"]}}
        });

        let out = transform_request(&request).unwrap();
        assert_eq!(out["system"], "ab");
        assert_eq!(out["model"], "unknown");
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(out["thinking"], json!({"type": "enabled", "budget_tokens": 512}));
        assert_eq!(out["tool_choice"], json!({"type": "tool", "name": "run"}));

        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["id"], "toolu_0");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_0");
        assert_eq!(messages[2]["content"][0]["content"], "{\"ok\":true}");
        assert_eq!(messages[2]["content"][1]["text"], "next");
    }
}
