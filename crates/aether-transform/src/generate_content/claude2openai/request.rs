use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    arguments_string, array_field, content_text, copy_field, data_url, ensure_object, str_field,
};

/// Convert a Claude create-message request into an OpenAI chat-completions request.
pub fn transform_request(request: &Value) -> Result<Value, ConvertError> {
    ensure_object(request, "create message request")?;
    let source_messages = request
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(ConvertError::MissingField("messages"))?;

    let mut messages = Vec::new();
    if let Some(system) = request.get("system") {
        let text = content_text(system);
        if !text.is_empty() {
            messages.push(json!({ "role": "system", "content": text }));
        }
    }
    for message in source_messages {
        match str_field(message, "role") {
            Some("assistant") => messages.extend(map_assistant_message(message)),
            _ => messages.extend(map_user_message(message)),
        }
    }

    let mut out = Map::new();
    copy_field(request, &mut out, "model", "model");
    out.insert("messages".to_string(), Value::Array(messages));
    copy_field(request, &mut out, "max_tokens", "max_tokens");
    copy_field(request, &mut out, "temperature", "temperature");
    copy_field(request, &mut out, "top_p", "top_p");
    copy_field(request, &mut out, "stop_sequences", "stop");
    if request.get("stream").and_then(Value::as_bool) == Some(true) {
        out.insert("stream".to_string(), json!(true));
        out.insert("stream_options".to_string(), json!({ "include_usage": true }));
    }
    if let Some(tools) = map_tools(request) {
        out.insert("tools".to_string(), tools);
    }
    if let Some(choice) = request.get("tool_choice") {
        let (choice, parallel) = map_tool_choice(choice);
        if let Some(choice) = choice {
            out.insert("tool_choice".to_string(), choice);
        }
        if parallel == Some(false) {
            out.insert("parallel_tool_calls".to_string(), json!(false));
        }
    }
    if let Some(user) = request
        .get("metadata")
        .and_then(|metadata| str_field(metadata, "user_id"))
    {
        out.insert("user".to_string(), json!(user));
    }

    Ok(Value::Object(out))
}

/// Tool results become their own `tool` messages ahead of the remaining user parts.
fn map_user_message(message: &Value) -> Vec<Value> {
    let blocks = match message.get("content") {
        Some(Value::String(text)) => return vec![json!({ "role": "user", "content": text })],
        Some(Value::Array(blocks)) => blocks,
        _ => return Vec::new(),
    };

    let mut out = Vec::new();
    let mut parts = Vec::new();
    for block in blocks {
        match str_field(block, "type") {
            Some("tool_result") => out.push(json!({
                "role": "tool",
                "tool_call_id": str_field(block, "tool_use_id").unwrap_or_default(),
                "content": content_text(block.get("content").unwrap_or(&Value::Null)),
            })),
            Some("image") => {
                if let Some(url) = map_image_url(block.get("source").unwrap_or(&Value::Null)) {
                    parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
                }
            }
            Some("text") => {
                if let Some(text) = str_field(block, "text") {
                    parts.push(json!({ "type": "text", "text": text }));
                }
            }
            _ => {}
        }
    }

    if !parts.is_empty() {
        let content = match parts.as_slice() {
            [only] if only["type"] == "text" => only["text"].clone(),
            _ => Value::Array(parts),
        };
        out.push(json!({ "role": "user", "content": content }));
    }
    out
}

fn map_assistant_message(message: &Value) -> Vec<Value> {
    let blocks = match message.get("content") {
        Some(Value::String(text)) => return vec![json!({ "role": "assistant", "content": text })],
        Some(Value::Array(blocks)) => blocks,
        _ => return Vec::new(),
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match str_field(block, "type") {
            Some("text") => text.push_str(str_field(block, "text").unwrap_or_default()),
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

    if text.is_empty() && tool_calls.is_empty() {
        return Vec::new();
    }
    let mut out = Map::new();
    out.insert("role".to_string(), json!("assistant"));
    out.insert(
        "content".to_string(),
        if text.is_empty() { Value::Null } else { Value::String(text) },
    );
    if !tool_calls.is_empty() {
        out.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    vec![Value::Object(out)]
}

fn map_image_url(source: &Value) -> Option<String> {
    match str_field(source, "type") {
        Some("base64") => Some(data_url(
            str_field(source, "media_type").unwrap_or("image/png"),
            str_field(source, "data")?,
        )),
        Some("url") => str_field(source, "url").map(str::to_string),
        _ => None,
    }
}

fn map_tools(request: &Value) -> Option<Value> {
    let tools: Vec<Value> = array_field(request, "tools")
        .iter()
        .filter_map(|tool| {
            let name = str_field(tool, "name")?;
            let mut function = Map::new();
            function.insert("name".to_string(), json!(name));
            copy_field(tool, &mut function, "description", "description");
            function.insert(
                "parameters".to_string(),
                tool.get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            );
            Some(json!({ "type": "function", "function": function }))
        })
        .collect();
    (!tools.is_empty()).then_some(Value::Array(tools))
}

/// Returns the OpenAI tool choice and the parallel-call flag it implies.
fn map_tool_choice(choice: &Value) -> (Option<Value>, Option<bool>) {
    let parallel = choice
        .get("disable_parallel_tool_use")
        .and_then(Value::as_bool)
        .map(|disabled| !disabled);
    let mapped = match str_field(choice, "type") {
        Some("auto") => Some(json!("auto")),
        Some("any") => Some(json!("required")),
        Some("none") => Some(json!("none")),
        Some("tool") => str_field(choice, "name")
            .map(|name| json!({ "type": "function", "function": { "name": name } })),
        _ => None,
    };
    (mapped, parallel)
}
