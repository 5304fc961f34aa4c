use serde_json::{Map, Value, json};

use crate::error::ConvertError;

pub(crate) fn ensure_object<'a>(
    value: &'a Value,
    what: &str,
) -> Result<&'a Map<String, Value>, ConvertError> {
    value
        .as_object()
        .ok_or_else(|| ConvertError::InvalidPayload(format!("{what} must be a JSON object")))
}

pub(crate) fn u64_field(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(crate) fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Copies `key` from `from` into `to` under `rename` when present and non-null.
pub(crate) fn copy_field(from: &Value, to: &mut Map<String, Value>, key: &str, rename: &str) {
    if let Some(value) = from.get(key).filter(|value| !value.is_null()) {
        to.insert(rename.to_string(), value.clone());
    }
}

/// Flattens OpenAI / Claude content (string or list of parts) into text.
pub(crate) fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                _ if matches!(str_field(part, "type"), Some("text") | None) => {
                    str_field(part, "text")
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Concatenated text of every `text` part in a Gemini parts list.
pub(crate) fn gemini_parts_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter(|part| part.get("thought").and_then(Value::as_bool) != Some(true))
        .filter_map(|part| str_field(part, "text"))
        .collect()
}

/// Parses streamed tool arguments; anything unparseable becomes `{}`.
pub(crate) fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => json!({ "value": other }),
        Err(_) => json!({}),
    }
}

pub(crate) fn arguments_string(input: Option<&Value>) -> String {
    match input {
        Some(Value::String(raw)) => raw.clone(),
        Some(value) if !value.is_null() => value.to_string(),
        _ => "{}".to_string(),
    }
}

/// Gemini CLI wraps payloads as `{"response": {...}}`.
pub(crate) fn gemini_payload(value: &Value) -> &Value {
    match value.get("response") {
        Some(inner) if inner.is_object() && value.get("candidates").is_none() => inner,
        _ => value,
    }
}

pub(crate) fn stop_list(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(Value::String(stop)) => Some(json!([stop])),
        Some(Value::Array(items)) if !items.is_empty() => Some(Value::Array(items.clone())),
        _ => None,
    }
}

pub(crate) fn claude_stop_from_openai(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "refusal",
        _ => "end_turn",
    }
}

pub(crate) fn openai_finish_from_claude(reason: &str) -> &'static str {
    match reason {
        "max_tokens" | "model_context_window_exceeded" => "length",
        "tool_use" => "tool_calls",
        "refusal" => "content_filter",
        _ => "stop",
    }
}

pub(crate) fn openai_finish_from_gemini(reason: &str, has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        return "tool_calls";
    }
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => "content_filter",
        _ => "stop",
    }
}

pub(crate) fn gemini_finish_from_openai(reason: &str) -> &'static str {
    match reason {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}

pub(crate) fn claude_stop_from_gemini(reason: &str, has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        return "tool_use";
    }
    match reason {
        "MAX_TOKENS" => "max_tokens",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => "refusal",
        _ => "end_turn",
    }
}

pub(crate) fn gemini_finish_from_claude(reason: &str) -> &'static str {
    match reason {
        "max_tokens" | "model_context_window_exceeded" => "MAX_TOKENS",
        "refusal" => "SAFETY",
        _ => "STOP",
    }
}

pub(crate) fn openai_usage(input_tokens: u64, output_tokens: u64) -> Value {
    json!({
        "prompt_tokens": input_tokens,
        "completion_tokens": output_tokens,
        "total_tokens": input_tokens + output_tokens,
    })
}

pub(crate) fn gemini_usage(input_tokens: u64, output_tokens: u64) -> Value {
    json!({
        "promptTokenCount": input_tokens,
        "candidatesTokenCount": output_tokens,
        "totalTokenCount": input_tokens + output_tokens,
    })
}

/// `(input, output)` from an OpenAI `usage` object.
pub(crate) fn usage_from_openai(usage: &Value) -> (Option<u64>, Option<u64>) {
    (
        u64_field(usage, "prompt_tokens").or_else(|| u64_field(usage, "input_tokens")),
        u64_field(usage, "completion_tokens").or_else(|| u64_field(usage, "output_tokens")),
    )
}

/// `(input, output)` from a Claude `usage` object; cache reads count as input.
pub(crate) fn usage_from_claude(usage: &Value) -> (Option<u64>, Option<u64>) {
    let input = u64_field(usage, "input_tokens").map(|input| {
        input
            + u64_field(usage, "cache_read_input_tokens").unwrap_or(0)
            + u64_field(usage, "cache_creation_input_tokens").unwrap_or(0)
    });
    (input, u64_field(usage, "output_tokens"))
}

/// `(input, output)` from Gemini `usageMetadata`; thinking tokens are output.
pub(crate) fn usage_from_gemini(usage: &Value) -> (Option<u64>, Option<u64>) {
    let output = match (
        u64_field(usage, "candidatesTokenCount"),
        u64_field(usage, "thoughtsTokenCount"),
    ) {
        (None, None) => None,
        (candidates, thoughts) => Some(candidates.unwrap_or(0) + thoughts.unwrap_or(0)),
    };
    (u64_field(usage, "promptTokenCount"), output)
}

/// Gemini rejects a few JSON-schema keywords other providers accept.
pub(crate) fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !matches!(key.as_str(), "$schema" | "additionalProperties"))
                .map(|(key, value)| (key.clone(), gemini_schema(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

/// Splits `data:<mime>;base64,<payload>` into `(mime, payload)`.
pub(crate) fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    Some((mime, data))
}

pub(crate) fn data_url(mime: &str, data: &str) -> String {
    format!("data:{mime};base64,{data}")
}

pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn generated_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}

/// Builds one OpenAI `chat.completion.chunk`.
pub(crate) fn openai_chunk(
    id: &str,
    model: &str,
    created: i64,
    delta: Value,
    finish_reason: Option<&str>,
) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_text_handles_strings_and_parts() {
        assert_eq!(content_text(&json!("hi")), "hi");
        assert_eq!(
            content_text(&json!([
                {"type": "text", "text": "a"},
                {"type": "image_url", "image_url": {"url": "x"}},
                {"type": "text", "text": "b"}
            ])),
            "ab"
        );
        assert_eq!(content_text(&Value::Null), "");
    }

    #[test]
    fn arguments_fall_back_to_empty_object() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_arguments("{\"a\":"), json!({}));
        assert_eq!(parse_arguments("[1]"), json!({"value": [1]}));
    }

    #[test]
    fn gemini_envelope_is_unwrapped() {
        let wrapped = json!({"response": {"candidates": []}});
        assert_eq!(gemini_payload(&wrapped), &json!({"candidates": []}));
        let plain = json!({"candidates": []});
        assert_eq!(gemini_payload(&plain), &plain);
    }

    #[test]
    fn gemini_schema_drops_unsupported_keywords() {
        let schema = json!({
            "$schema": "x",
            "type": "object",
            "additionalProperties": false,
            "properties": {"a": {"type": "string", "additionalProperties": true}}
        });
        assert_eq!(
            gemini_schema(&schema),
            json!({"type": "object", "properties": {"a": {"type": "string"}}})
        );
    }

    #[test]
    fn data_urls() {
        assert_eq!(
            parse_data_url("data:image/png;base64,AAA"),
            Some(("image/png", "AAA"))
        );
        assert_eq!(parse_data_url("https://example.com/a.png"), None);
        assert_eq!(data_url("image/png", "AAA"), "data:image/png;base64,AAA");
    }

    #[test]
    fn claude_cache_tokens_count_as_input() {
        let usage = json!({
            "input_tokens": 3,
            "cache_read_input_tokens": 10,
            "output_tokens": 2
        });
        assert_eq!(usage_from_claude(&usage), (Some(13), Some(2)));
    }
}
