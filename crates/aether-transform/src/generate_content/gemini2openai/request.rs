use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value, json};

use crate::error::ConvertError;
use crate::generate_content::helpers::{
    arguments_string, array_field, copy_field, data_url, ensure_object, gemini_parts_text,
    str_field,
};

/// Convert a Gemini generateContent request into an OpenAI chat-completions request.
pub fn transform_request(request: &Value) -> Result<Value, ConvertError> {
    ensure_object(request, "generateContent request")?;
    let contents = request
        .get("contents")
        .and_then(Value::as_array)
        .ok_or(ConvertError::MissingField("contents"))?;

    let mut messages = Vec::new();
    if let Some(system) = request
        .get("systemInstruction")
        .or_else(|| request.get("system_instruction"))
    {
        let text = gemini_parts_text(array_field(system, "parts"));
        if !text.is_empty() {
            messages.push(json!({ "role": "system", "content": text }));
        }
    }

    // Gemini pairs calls and responses by name; OpenAI needs ids on both ends.
    let mut open_calls: HashMap<String, VecDeque<String>> = HashMap::new();
    let mut next_call = 0usize;

    for content in contents {
        let parts = array_field(content, "parts");
        match str_field(content, "role") {
            Some("model") => {
                let text = gemini_parts_text(parts);
                let tool_calls: Vec<Value> = parts
                    .iter()
                    .filter_map(|part| part.get("functionCall"))
                    .map(|call| {
                        let name = str_field(call, "name").unwrap_or("tool").to_string();
                        let id = str_field(call, "id")
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("call_{next_call}"));
                        next_call += 1;
                        open_calls.entry(name.clone()).or_default().push_back(id.clone());
                        json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": arguments_string(call.get("args")),
                            },
                        })
                    })
                    .collect();
                if text.is_empty() && tool_calls.is_empty() {
                    continue;
                }
                let mut message = Map::new();
                message.insert("role".to_string(), json!("assistant"));
                message.insert(
                    "content".to_string(),
                    if text.is_empty() { Value::Null } else { Value::String(text) },
                );
                if !tool_calls.is_empty() {
                    message.insert("tool_calls".to_string(), Value::Array(tool_calls));
                }
                messages.push(Value::Object(message));
            }
            _ => {
                for part in parts {
                    if let Some(result) = part.get("functionResponse") {
                        let name = str_field(result, "name").unwrap_or("tool");
                        let id = str_field(result, "id")
                            .map(str::to_string)
                            .or_else(|| {
                                open_calls
                                    .get_mut(name)
                                    .and_then(VecDeque::pop_front)
                            })
                            .unwrap_or_else(|| format!("call_{name}"));
                        let response = result.get("response").unwrap_or(&Value::Null);
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": id,
                            "content": tool_result_text(response),
                        }));
                    }
                }
                let user_parts: Vec<Value> = parts.iter().filter_map(map_user_part).collect();
                if user_parts.is_empty() {
                    continue;
                }
                let content = match user_parts.as_slice() {
                    [only] if only["type"] == "text" => only["text"].clone(),
                    _ => Value::Array(user_parts),
                };
                messages.push(json!({ "role": "user", "content": content }));
            }
        }
    }

    let mut out = Map::new();
    out.insert(
        "model".to_string(),
        json!(str_field(request, "model").unwrap_or("unknown")),
    );
    out.insert("messages".to_string(), Value::Array(messages));
    if let Some(config) = request
        .get("generationConfig")
        .or_else(|| request.get("generation_config"))
    {
        copy_field(config, &mut out, "maxOutputTokens", "max_tokens");
        copy_field(config, &mut out, "max_output_tokens", "max_tokens");
        copy_field(config, &mut out, "temperature", "temperature");
        copy_field(config, &mut out, "topP", "top_p");
        copy_field(config, &mut out, "top_p", "top_p");
        copy_field(config, &mut out, "stopSequences", "stop");
        copy_field(config, &mut out, "candidateCount", "n");
        copy_field(config, &mut out, "seed", "seed");
        if str_field(config, "responseMimeType") == Some("application/json") {
            out.insert("response_format".to_string(), json!({ "type": "json_object" }));
        }
    }
    if request.get("stream").and_then(Value::as_bool) == Some(true) {
        out.insert("stream".to_string(), json!(true));
        out.insert("stream_options".to_string(), json!({ "include_usage": true }));
    }
    if let Some(tools) = map_tools(request) {
        out.insert("tools".to_string(), tools);
    }
    if let Some(choice) = request
        .get("toolConfig")
        .or_else(|| request.get("tool_config"))
        .and_then(map_tool_config)
    {
        out.insert("tool_choice".to_string(), choice);
    }

    Ok(Value::Object(out))
}

fn map_user_part(part: &Value) -> Option<Value> {
    if let Some(text) = str_field(part, "text") {
        return Some(json!({ "type": "text", "text": text }));
    }
    if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
        let mime = str_field(inline, "mimeType")
            .or_else(|| str_field(inline, "mime_type"))
            .unwrap_or("image/png");
        let data = str_field(inline, "data")?;
        return Some(json!({ "type": "image_url", "image_url": { "url": data_url(mime, data) } }));
    }
    let uri = part
        .get("fileData")
        .and_then(|file| str_field(file, "fileUri"))?;
    Some(json!({ "type": "image_url", "image_url": { "url": uri } }))
}

fn tool_result_text(response: &Value) -> String {
    match response.get("content").or_else(|| response.get("output")) {
        Some(Value::String(text)) if response.as_object().is_some_and(|o| o.len() == 1) => {
            text.clone()
        }
        _ => response.to_string(),
    }
}

fn map_tools(request: &Value) -> Option<Value> {
    let tools: Vec<Value> = array_field(request, "tools")
        .iter()
        .flat_map(|tool| {
            array_field(tool, "functionDeclarations")
                .iter()
                .chain(array_field(tool, "function_declarations"))
        })
        .filter_map(|declaration| {
            let name = str_field(declaration, "name")?;
            let mut function = Map::new();
            function.insert("name".to_string(), json!(name));
            copy_field(declaration, &mut function, "description", "description");
            function.insert(
                "parameters".to_string(),
                declaration
                    .get("parameters")
                    .or_else(|| declaration.get("parametersJsonSchema"))
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            );
            Some(json!({ "type": "function", "function": function }))
        })
        .collect();
    (!tools.is_empty()).then_some(Value::Array(tools))
}

fn map_tool_config(config: &Value) -> Option<Value> {
    let calling = config
        .get("functionCallingConfig")
        .or_else(|| config.get("function_calling_config"))?;
    match str_field(calling, "mode") {
        Some("ANY") => {
            let allowed = array_field(calling, "allowedFunctionNames");
            match allowed {
                [only] => only
                    .as_str()
                    .map(|name| json!({ "type": "function", "function": { "name": name } })),
                _ => Some(json!("required")),
            }
        }
        Some("NONE") => Some(json!("none")),
        Some("AUTO" | "VALIDATED") => Some(json!("auto")),
        _ => None,
    }
}
