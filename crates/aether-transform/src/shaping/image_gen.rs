use serde_json::{Map, Value, json};

const UNSUPPORTED_TOP_LEVEL: &[&str] = &[
    "tools",
    "tool_config",
    "toolConfig",
    "system_instruction",
    "systemInstruction",
];

const CONFLICTING_CONFIG: &[&str] = &[
    "responseMimeType",
    "response_mime_type",
    "responseModalities",
    "response_modalities",
];

/// Gemini image models (`gemini-*-image*`, `imagen-*`).
pub fn is_image_gen_model(model: Option<&str>) -> bool {
    let Some(model) = model.filter(|model| !model.is_empty()) else {
        return false;
    };
    let model = model.to_ascii_lowercase();
    model.contains("image") && (model.contains("gemini") || model.contains("imagen"))
}

/// Strips fields Gemini image models reject and asks for text plus image output.
pub fn adapt_request_for_image_gen(body: &Value) -> Value {
    let mut out = body.clone();
    let Some(root) = out.as_object_mut() else {
        return out;
    };
    for key in UNSUPPORTED_TOP_LEVEL {
        root.remove(*key);
    }

    let config_key = if root.contains_key("generationConfig") {
        "generationConfig"
    } else {
        "generation_config"
    };
    let config = root
        .entry(config_key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !config.is_object() {
        *config = Value::Object(Map::new());
    }
    if let Some(config) = config.as_object_mut() {
        for key in CONFLICTING_CONFIG {
            config.remove(*key);
        }
        config.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
    }
    out
}
