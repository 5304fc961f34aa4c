use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, content_text, copy_field, ensure_object, gemini_schema, str_field,
};

/// Convert a Claude create-message request into a Gemini generateContent request.
pub fn transform_request(request: &Value) -> Result<Value, ConvertError> {
    ensure_object(request, "create message request")?;
    let messages = request
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(ConvertError::MissingField("messages"))?;

    let mut tool_names: HashMap<&str, &str> = HashMap::new();
    let mut contents = Vec::new();
    for message in messages {
        let role = match str_field(message, "role") {
            Some("assistant") => "model",
            _ => "user",
        };
        let parts = match message.get("content") {
            Some(Value::String(text)) if !text.is_empty() => vec![json!({ "text": text })],
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter_map(|block| map_block(block, &mut tool_names))
                .collect(),
            _ => Vec::new(),
        };
        if !parts.is_empty() {
            contents.push(json!({ "role": role, "parts": parts }));
        }
    }

    let mut out = Map::new();
    out.insert("contents".to_string(), Value::Array(contents));
    if let Some(system) = request.get("system") {
        let text = content_text(system);
        if !text.is_empty() {
            out.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": text }] }),
            );
        }
    }

    let mut config = Map::new();
    copy_field(request, &mut config, "max_tokens", "maxOutputTokens");
    copy_field(request, &mut config, "temperature", "temperature");
    copy_field(request, &mut config, "top_p", "topP");
    copy_field(request, &mut config, "top_k", "topK");
    copy_field(request, &mut config, "stop_sequences", "stopSequences");
    if let Some(budget) = request
        .get("thinking")
        .filter(|thinking| str_field(thinking, "type") == Some("enabled"))
        .and_then(|thinking| thinking.get("budget_tokens"))
    {
        config.insert(
            "thinkingConfig".to_string(),
            json!({ "thinkingBudget": budget, "includeThoughts": true }),
        );
    }
    if !config.is_empty() {
        out.insert("generationConfig".to_string(), Value::Object(config));
    }

    let declarations: Vec<Value> = array_field(request, "tools")
        .iter()
        .filter_map(|tool| {
            let name = str_field(tool, "name")?;
            let mut declaration = Map::new();
            declaration.insert("name".to_string(), json!(name));
            copy_field(tool, &mut declaration, "description", "description");
            if let Some(schema) = tool.get("input_schema").filter(|schema| schema.is_object()) {
                declaration.insert("parameters".to_string(), gemini_schema(schema));
            }
            Some(Value::Object(declaration))
        })
        .collect();
    if !declarations.is_empty() {
        out.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": declarations }]),
        );
    }
    if let Some(config) = request.get("tool_choice").and_then(map_tool_choice) {
        out.insert("toolConfig".to_string(), config);
    }

    Ok(Value::Object(out))
}

fn map_block<'a>(block: &'a Value, tool_names: &mut HashMap<&'a str, &'a str>) -> Option<Value> {
    match str_field(block, "type") {
        Some("text") => str_field(block, "text")
            .filter(|text| !text.is_empty())
            .map(|text| json!({ "text": text })),
        Some("image") => {
            let source = block.get("source")?;
            match str_field(source, "type") {
                Some("base64") => Some(json!({ "inlineData": {
                    "mimeType": str_field(source, "media_type").unwrap_or("image/png"),
                    "data": str_field(source, "data")?,
                }})),
                Some("url") => Some(json!({ "fileData": { "fileUri": str_field(source, "url")? } })),
                _ => None,
            }
        }
        Some("tool_use" | "server_tool_use") => {
            let name = str_field(block, "name").unwrap_or("tool");
            if let Some(id) = str_field(block, "id") {
                tool_names.insert(id, name);
            }
            Some(json!({ "functionCall": {
                "name": name,
                "args": block.get("input").cloned().unwrap_or_else(|| json!({})),
            }}))
        }
        Some("tool_result") => {
            let name = str_field(block, "tool_use_id")
                .and_then(|id| tool_names.get(id).copied())
                .unwrap_or("tool");
            let text = content_text(block.get("content").unwrap_or(&Value::Null));
            Some(json!({ "functionResponse": {
                "name": name,
                "response": { "content": text },
            }}))
        }
        _ => None,
    }
}

fn map_tool_choice(choice: &Value) -> Option<Value> {
    let config = match str_field(choice, "type")? {
        "auto" => json!({ "mode": "AUTO" }),
        "any" => json!({ "mode": "ANY" }),
        "none" => json!({ "mode": "NONE" }),
        "tool" => json!({ "mode": "ANY", "allowedFunctionNames": [str_field(choice, "name")?] }),
        _ => return None,
    };
    Some(json!({ "functionCallingConfig": config }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_messages_thinking_and_tools() {
        let request = json!({
            "model": "gemini-2.5-pro",
            "system": "sys",
            "max_tokens": 256,
            "top_k": 40,
            "thinking": {"type": "enabled", "budget_tokens": 1024},
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "...", "signature": "s"},
                    {"type": "tool_use", "id": "toolu_1", "name": "calc", "input": {"n": 2}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": [{"type": "text", "text": "4"}]}
                ]}
            ],
            "tools": [{"name": "calc", "input_schema": {"type": "object", "$schema": "x"}}],
            "tool_choice": {"type": "tool", "name": "calc"}
        });

        let out = transform_request(&request).unwrap();
        assert_eq!(out["systemInstruction"], json!({"parts": [{"text": "sys"}]}));
        let contents = out["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(contents[1]["parts"][0]["functionCall"]["args"], json!({"n": 2}));
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"],
            json!({"name": "calc", "response": {"content": "4"}})
        );
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(out["generationConfig"]["topK"], 40);
        assert_eq!(out["generationConfig"]["thinkingConfig"]["thinkingBudget"], 1024);
        assert_eq!(
            out["tools"][0]["functionDeclarations"][0]["parameters"],
            json!({"type": "object"})
        );
        assert_eq!(
            out["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"],
            json!(["calc"])
        );
    }
}
