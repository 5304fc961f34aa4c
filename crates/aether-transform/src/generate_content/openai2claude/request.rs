use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, content_text, copy_field, ensure_object, parse_arguments, parse_data_url,
    stop_list, str_field,
};

/// Claude requires `max_tokens`; used when the client did not set one.
pub(crate) const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Convert an OpenAI chat-completions request into a Claude create-message request.
pub fn transform_request(request: &Value) -> Result<Value, ConvertError> {
    ensure_object(request, "chat completions request")?;
    let source_messages = request
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(ConvertError::MissingField("messages"))?;

    let mut system_texts = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for message in source_messages {
        match str_field(message, "role") {
            Some("system" | "developer") => {
                let text = content_text(message.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            Some("assistant") => push_message(&mut messages, "assistant", map_assistant(message)),
            Some("tool" | "function") => push_message(&mut messages, "user", map_tool(message)),
            _ => push_message(&mut messages, "user", map_user(message)),
        }
    }

    let mut out = Map::new();
    copy_field(request, &mut out, "model", "model");
    if !system_texts.is_empty() {
        out.insert("system".to_string(), Value::String(system_texts.join("\n")));
    }
    out.insert("messages".to_string(), Value::Array(messages));
    out.insert("max_tokens".to_string(), json!(map_max_tokens(request)));
    copy_field(request, &mut out, "temperature", "temperature");
    copy_field(request, &mut out, "top_p", "top_p");
    copy_field(request, &mut out, "stream", "stream");
    if let Some(stop) = stop_list(request.get("stop")) {
        out.insert("stop_sequences".to_string(), stop);
    }
    if let Some(tools) = map_tools(request) {
        out.insert("tools".to_string(), tools);
    }
    if let Some(choice) = map_tool_choice(request) {
        out.insert("tool_choice".to_string(), choice);
    }
    if let Some(user) = str_field(request, "user") {
        out.insert("metadata".to_string(), json!({ "user_id": user }));
    }

    Ok(Value::Object(out))
}

fn map_max_tokens(request: &Value) -> u64 {
    request
        .get("max_completion_tokens")
        .or_else(|| request.get("max_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_TOKENS)
}

/// Claude wants strictly alternating roles, so same-role neighbours merge.
fn push_message(messages: &mut Vec<Value>, role: &str, blocks: Vec<Value>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut()
        && str_field(last, "role") == Some(role)
        && let Some(content) = last.get_mut("content").and_then(Value::as_array_mut)
    {
        content.extend(blocks);
        return;
    }
    messages.push(json!({ "role": role, "content": blocks }));
}

fn map_user(message: &Value) -> Vec<Value> {
    match message.get("content") {
        Some(Value::String(text)) => text_block(text).into_iter().collect(),
        Some(Value::Array(parts)) => parts.iter().filter_map(map_user_part).collect(),
        _ => Vec::new(),
    }
}

fn map_user_part(part: &Value) -> Option<Value> {
    match str_field(part, "type") {
        Some("image_url") => {
            let url = part
                .get("image_url")
                .and_then(|image| str_field(image, "url").or_else(|| image.as_str()))?;
            Some(match parse_data_url(url) {
                Some((media_type, data)) => json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": media_type, "data": data },
                }),
                None => json!({
                    "type": "image",
                    "source": { "type": "url", "url": url },
                }),
            })
        }
        _ => str_field(part, "text").and_then(text_block),
    }
}

fn map_assistant(message: &Value) -> Vec<Value> {
    let mut blocks: Vec<Value> = text_block(&content_text(
        message.get("content").unwrap_or(&Value::Null),
    ))
    .into_iter()
    .collect();

    for call in array_field(message, "tool_calls") {
        let function = call.get("function").unwrap_or(&Value::Null);
        blocks.push(json!({
            "type": "tool_use",
            "id": str_field(call, "id").unwrap_or("toolu_unknown"),
            "name": str_field(function, "name").unwrap_or("tool"),
            "input": parse_arguments(str_field(function, "arguments").unwrap_or_default()),
        }));
    }
    if let Some(function) = message.get("function_call") {
        blocks.push(json!({
            "type": "tool_use",
            "id": "function_call",
            "name": str_field(function, "name").unwrap_or("function_call"),
            "input": parse_arguments(str_field(function, "arguments").unwrap_or_default()),
        }));
    }
    blocks
}

fn map_tool(message: &Value) -> Vec<Value> {
    let tool_use_id = str_field(message, "tool_call_id")
        .or_else(|| str_field(message, "name"))
        .unwrap_or("function_call");
    vec![json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "content": content_text(message.get("content").unwrap_or(&Value::Null)),
    })]
}

fn text_block(text: &str) -> Option<Value> {
    (!text.is_empty()).then(|| json!({ "type": "text", "text": text }))
}

fn map_tools(request: &Value) -> Option<Value> {
    let tools: Vec<Value> = array_field(request, "tools")
        .iter()
        .filter(|tool| matches!(str_field(tool, "type"), Some("function") | None))
        .filter_map(|tool| tool.get("function"))
        .chain(array_field(request, "functions"))
        .filter_map(|function| {
            let name = str_field(function, "name")?;
            let mut tool = Map::new();
            tool.insert("name".to_string(), json!(name));
            copy_field(function, &mut tool, "description", "description");
            tool.insert(
                "input_schema".to_string(),
                function
                    .get("parameters")
                    .filter(|schema| schema.is_object())
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            );
            Some(Value::Object(tool))
        })
        .collect();
    (!tools.is_empty()).then_some(Value::Array(tools))
}

fn map_tool_choice(request: &Value) -> Option<Value> {
    let raw = request.get("tool_choice")?;
    let mut choice = match raw {
        Value::String(mode) => match mode.as_str() {
            "required" => json!({ "type": "any" }),
            "none" => json!({ "type": "none" }),
            _ => json!({ "type": "auto" }),
        },
        Value::Object(_) => {
            let name = raw
                .get("function")
                .and_then(|function| str_field(function, "name"))?;
            json!({ "type": "tool", "name": name })
        }
        _ => return None,
    };
    if request.get("parallel_tool_calls").and_then(Value::as_bool) == Some(false)
        && let Some(choice) = choice.as_object_mut()
        && choice.get("type").and_then(Value::as_str) != Some("none")
    {
        choice.insert("disable_parallel_tool_use".to_string(), json!(true));
    }
    Some(choice)
}
