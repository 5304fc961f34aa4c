use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    array_field, content_text, copy_field, ensure_object, gemini_schema, parse_arguments,
    parse_data_url, stop_list, str_field,
};

/// Convert an OpenAI chat-completions request into a Gemini generateContent request.
///
/// `model` and `stream` are dropped: Gemini carries both in the request URL.
pub fn transform_request(request: &Value) -> Result<Value, ConvertError> {
    ensure_object(request, "chat completions request")?;
    let source_messages = request
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(ConvertError::MissingField("messages"))?;

    let mut system_parts = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    // functionResponse parts need the function name, OpenAI only keeps the call id.
    let mut call_names: HashMap<&str, &str> = HashMap::new();

    for message in source_messages {
        let content = message.get("content").unwrap_or(&Value::Null);
        match str_field(message, "role") {
            Some("system" | "developer") => {
                let text = content_text(content);
                if !text.is_empty() {
                    system_parts.push(json!({ "text": text }));
                }
            }
            Some("assistant") => {
                let mut parts = Vec::new();
                let text = content_text(content);
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
                for call in array_field(message, "tool_calls") {
                    let function = call.get("function").unwrap_or(&Value::Null);
                    let name = str_field(function, "name").unwrap_or("tool");
                    if let Some(id) = str_field(call, "id") {
                        call_names.insert(id, name);
                    }
                    parts.push(json!({ "functionCall": {
                        "name": name,
                        "args": parse_arguments(str_field(function, "arguments").unwrap_or_default()),
                    }}));
                }
                push_content(&mut contents, "model", parts);
            }
            Some("tool" | "function") => {
                let name = str_field(message, "tool_call_id")
                    .and_then(|id| call_names.get(id).copied())
                    .or_else(|| str_field(message, "name"))
                    .unwrap_or("tool");
                let text = content_text(content);
                let response = match serde_json::from_str::<Value>(&text) {
                    Ok(value @ Value::Object(_)) => value,
                    _ => json!({ "content": text }),
                };
                push_content(
                    &mut contents,
                    "user",
                    vec![json!({ "functionResponse": { "name": name, "response": response } })],
                );
            }
            _ => push_content(&mut contents, "user", map_user_parts(content)),
        }
    }

    let mut out = Map::new();
    out.insert("contents".to_string(), Value::Array(contents));
    if !system_parts.is_empty() {
        out.insert(
            "systemInstruction".to_string(),
            json!({ "parts": system_parts }),
        );
    }
    let config = map_generation_config(request);
    if !config.is_empty() {
        out.insert("generationConfig".to_string(), Value::Object(config));
    }
    if let Some(tools) = map_tools(request) {
        out.insert("tools".to_string(), tools);
    }
    if let Some(config) = request.get("tool_choice").and_then(map_tool_choice) {
        out.insert("toolConfig".to_string(), config);
    }

    Ok(Value::Object(out))
}

fn push_content(contents: &mut Vec<Value>, role: &str, parts: Vec<Value>) {
    if parts.is_empty() {
        return;
    }
    if let Some(last) = contents.last_mut()
        && str_field(last, "role") == Some(role)
        && let Some(existing) = last.get_mut("parts").and_then(Value::as_array_mut)
    {
        existing.extend(parts);
        return;
    }
    contents.push(json!({ "role": role, "parts": parts }));
}

fn map_user_parts(content: &Value) -> Vec<Value> {
    match content {
        Value::String(text) if !text.is_empty() => vec![json!({ "text": text })],
        Value::Array(parts) => parts.iter().filter_map(map_user_part).collect(),
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
                Some((mime_type, data)) => {
                    json!({ "inlineData": { "mimeType": mime_type, "data": data } })
                }
                None => json!({ "fileData": { "fileUri": url } }),
            })
        }
        _ => str_field(part, "text")
            .filter(|text| !text.is_empty())
            .map(|text| json!({ "text": text })),
    }
}

fn map_generation_config(request: &Value) -> Map<String, Value> {
    let mut config = Map::new();
    if let Some(max_tokens) = request
        .get("max_completion_tokens")
        .or_else(|| request.get("max_tokens"))
        .filter(|value| !value.is_null())
    {
        config.insert("maxOutputTokens".to_string(), max_tokens.clone());
    }
    copy_field(request, &mut config, "temperature", "temperature");
    copy_field(request, &mut config, "top_p", "topP");
    copy_field(request, &mut config, "n", "candidateCount");
    copy_field(request, &mut config, "seed", "seed");
    copy_field(request, &mut config, "presence_penalty", "presencePenalty");
    copy_field(request, &mut config, "frequency_penalty", "frequencyPenalty");
    if let Some(stop) = stop_list(request.get("stop")) {
        config.insert("stopSequences".to_string(), stop);
    }
    if request
        .get("response_format")
        .and_then(|format| str_field(format, "type"))
        .is_some_and(|kind| kind == "json_object" || kind == "json_schema")
    {
        config.insert("responseMimeType".to_string(), json!("application/json"));
    }
    config
}

fn map_tools(request: &Value) -> Option<Value> {
    let declarations: Vec<Value> = array_field(request, "tools")
        .iter()
        .filter_map(|tool| tool.get("function"))
        .filter_map(|function| {
            let name = str_field(function, "name")?;
            let mut declaration = Map::new();
            declaration.insert("name".to_string(), json!(name));
            copy_field(function, &mut declaration, "description", "description");
            if let Some(parameters) = function.get("parameters").filter(|p| p.is_object()) {
                declaration.insert("parameters".to_string(), gemini_schema(parameters));
            }
            Some(Value::Object(declaration))
        })
        .collect();
    (!declarations.is_empty()).then(|| json!([{ "functionDeclarations": declarations }]))
}

fn map_tool_choice(choice: &Value) -> Option<Value> {
    let config = match choice {
        Value::String(mode) => match mode.as_str() {
            "required" => json!({ "mode": "ANY" }),
            "none" => json!({ "mode": "NONE" }),
            _ => json!({ "mode": "AUTO" }),
        },
        Value::Object(_) => {
            let name = choice
                .get("function")
                .and_then(|function| str_field(function, "name"))?;
            json!({ "mode": "ANY", "allowedFunctionNames": [name] })
        }
        _ => return None,
    };
    Some(json!({ "functionCallingConfig": config }))
}
