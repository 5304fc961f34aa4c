use std::sync::Arc;

use aether_transform::{
    ApiFormat, ConversionError, ConversionOp, ConvertError, ConverterRegistry, FormatConverter,
    RequestConverter, ResponseConverter, SharedRegistry, StreamChunkConverter,
    StreamConversionState, register_builtin_converters,
};
use serde_json::{Value, json};

/// Request and response only.
struct Wrapping;

impl FormatConverter for Wrapping {
    fn as_request(&self) -> Option<&dyn RequestConverter> {
        Some(self)
    }

    fn as_response(&self) -> Option<&dyn ResponseConverter> {
        Some(self)
    }
}

impl RequestConverter for Wrapping {
    fn convert_request(&self, request: &Value) -> Result<Value, ConvertError> {
        Ok(json!({ "converted": true, "original": request }))
    }
}

impl ResponseConverter for Wrapping {
    fn convert_response(&self, response: &Value) -> Result<Value, ConvertError> {
        Ok(json!({ "converted": true, "original": response }))
    }
}

/// Full converter whose stream side opens the message once.
struct Streaming;

impl FormatConverter for Streaming {
    fn as_request(&self) -> Option<&dyn RequestConverter> {
        Some(self)
    }

    fn as_response(&self) -> Option<&dyn ResponseConverter> {
        Some(self)
    }

    fn as_stream(&self) -> Option<&dyn StreamChunkConverter> {
        Some(self)
    }
}

impl RequestConverter for Streaming {
    fn convert_request(&self, request: &Value) -> Result<Value, ConvertError> {
        Ok(request.clone())
    }
}

impl ResponseConverter for Streaming {
    fn convert_response(&self, response: &Value) -> Result<Value, ConvertError> {
        Ok(response.clone())
    }
}

impl StreamChunkConverter for Streaming {
    fn convert_stream_chunk(
        &self,
        chunk: &Value,
        state: &mut StreamConversionState,
    ) -> Result<Vec<Value>, ConvertError> {
        let mut events = Vec::new();
        if !state.message_started() {
            state.mark_message_started();
            events.push(json!({
                "type": "message_start",
                "model": state.model(),
                "id": state.message_id(),
            }));
        }
        events.push(json!({ "type": "content", "data": chunk }));
        Ok(events)
    }
}

/// Emits nothing for events it does not know.
struct Selective;

impl FormatConverter for Selective {
    fn as_stream(&self) -> Option<&dyn StreamChunkConverter> {
        Some(self)
    }
}

impl StreamChunkConverter for Selective {
    fn convert_stream_chunk(
        &self,
        chunk: &Value,
        state: &mut StreamConversionState,
    ) -> Result<Vec<Value>, ConvertError> {
        Ok(match chunk["type"].as_str() {
            Some("message_start") => vec![json!({
                "choices": [{ "delta": { "role": "assistant" } }],
                "model": state.model(),
            })],
            _ => Vec::new(),
        })
    }
}

struct Failing;

impl FormatConverter for Failing {
    fn as_request(&self) -> Option<&dyn RequestConverter> {
        Some(self)
    }

    fn as_response(&self) -> Option<&dyn ResponseConverter> {
        Some(self)
    }

    fn as_stream(&self) -> Option<&dyn StreamChunkConverter> {
        Some(self)
    }
}

impl RequestConverter for Failing {
    fn convert_request(&self, _request: &Value) -> Result<Value, ConvertError> {
        Err(ConvertError::Other("request conversion failed".to_string()))
    }
}

impl ResponseConverter for Failing {
    fn convert_response(&self, _response: &Value) -> Result<Value, ConvertError> {
        Err(ConvertError::Other("response conversion failed".to_string()))
    }
}

impl StreamChunkConverter for Failing {
    fn convert_stream_chunk(
        &self,
        _chunk: &Value,
        _state: &mut StreamConversionState,
    ) -> Result<Vec<Value>, ConvertError> {
        Err(ConvertError::Other("stream conversion failed".to_string()))
    }
}

#[test]
fn lookup_is_case_insensitive_and_returns_same_instance() {
    let mut registry = ConverterRegistry::new();
    let converter: Arc<dyn FormatConverter> = Arc::new(Wrapping);
    registry
        .register("OPENAI", "CLAUDE", converter.clone())
        .unwrap();

    let found = registry.get_converter("openai", "claude").unwrap();
    assert!(Arc::ptr_eq(&found, &converter));
    assert!(registry.has_converter("OPENAI", "CLAUDE"));
    assert!(!registry.has_converter("CLAUDE", "OPENAI"));
    assert!(registry.get_converter("GEMINI", "CLAUDE").is_none());
}

#[test]
fn reregistration_overwrites() {
    let mut registry = ConverterRegistry::new();
    registry.register("a", "b", Arc::new(Wrapping)).unwrap();
    registry.register("A", "B", Arc::new(Streaming)).unwrap();
    assert_eq!(registry.len(), 1);
    assert!(registry.can_convert_stream("a", "b"));
}

#[test]
fn cli_formats_are_refused() {
    let mut registry = ConverterRegistry::new();
    let err = registry
        .register("CLAUDE_CLI", "openai:chat", Arc::new(Wrapping))
        .unwrap_err();
    assert!(matches!(err, ConversionError::CliFormat(format) if format.as_str() == "claude_cli"));
    assert!(
        registry
            .register("openai:chat", "gemini:cli", Arc::new(Wrapping))
            .is_err()
    );
    assert!(registry.is_empty());
}

#[test]
fn list_converters_and_supported_targets() {
    let mut registry = ConverterRegistry::new();
    registry.register("OPENAI", "CLAUDE", Arc::new(Wrapping)).unwrap();
    registry.register("OPENAI", "GEMINI", Arc::new(Wrapping)).unwrap();
    registry.register("CLAUDE", "OPENAI", Arc::new(Wrapping)).unwrap();

    let pairs = registry.list_converters();
    assert_eq!(pairs.len(), 3);
    assert!(pairs.contains(&(ApiFormat::new("openai"), ApiFormat::new("claude"))));

    let targets: Vec<_> = registry
        .get_supported_targets("openai")
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(targets, ["claude", "gemini"]);
}

#[test]
fn capability_probes() {
    let mut registry = ConverterRegistry::new();
    registry.register("A", "B", Arc::new(Wrapping)).unwrap();
    registry.register("C", "D", Arc::new(Selective)).unwrap();

    assert!(registry.can_convert_request("A", "B"));
    assert!(registry.can_convert_response("A", "B"));
    assert!(!registry.can_convert_stream("A", "B"));
    assert!(!registry.can_convert_request("B", "A"));
    assert!(registry.can_convert_stream("C", "D"));
    assert!(!registry.can_convert_request("C", "D"));
}

#[test]
fn full_conversion_needs_both_directions() {
    let mut registry = ConverterRegistry::new();
    registry.register("OPENAI", "CLAUDE", Arc::new(Wrapping)).unwrap();
    registry.register("CLAUDE", "OPENAI", Arc::new(Wrapping)).unwrap();
    assert!(registry.can_convert_full("OPENAI", "CLAUDE", false));
    assert!(!registry.can_convert_full("OPENAI", "CLAUDE", true));

    let mut registry = ConverterRegistry::new();
    registry.register("OPENAI", "CLAUDE", Arc::new(Streaming)).unwrap();
    assert!(!registry.can_convert_full("OPENAI", "CLAUDE", false));
    registry.register("CLAUDE", "OPENAI", Arc::new(Streaming)).unwrap();
    assert!(registry.can_convert_full("openai", "claude", true));
}

#[test]
fn strict_request_and_response() {
    let mut registry = ConverterRegistry::new();
    registry.register("A", "B", Arc::new(Wrapping)).unwrap();

    let out = registry
        .convert_request_strict(json!({"foo": "bar"}), "A", "B")
        .unwrap();
    assert_eq!(out, json!({"converted": true, "original": {"foo": "bar"}}));
    let out = registry
        .convert_response_strict(json!({"data": 1}), "a", "b")
        .unwrap();
    assert_eq!(out["converted"], true);

    let same = registry
        .convert_request_strict(json!({"foo": "bar"}), "X", "x")
        .unwrap();
    assert_eq!(same, json!({"foo": "bar"}));
}

#[test]
fn strict_errors_name_the_problem() {
    let mut registry = ConverterRegistry::new();
    let err = registry
        .convert_request_strict(json!({}), "A", "B")
        .unwrap_err();
    assert!(err.to_string().contains("no converter found"));
    assert!(matches!(
        registry.convert_response_strict(json!({}), "A", "B"),
        Err(ConversionError::NoConverter { .. })
    ));

    registry.register("A", "B", Arc::new(Failing)).unwrap();
    let err = registry
        .convert_request_strict(json!({}), "A", "B")
        .unwrap_err();
    assert_eq!(err.operation(), Some(ConversionOp::Request));
    assert!(err.to_string().contains("request conversion failed"));

    let mut state = StreamConversionState::new("m", "id");
    let err = registry
        .convert_stream_chunk_strict(json!({}), "A", "B", &mut state)
        .unwrap_err();
    assert_eq!(err.operation(), Some(ConversionOp::Stream));
    assert!(err.to_string().contains("stream chunk conversion failed"));
}

#[test]
fn missing_capability_is_unsupported() {
    let mut registry = ConverterRegistry::new();
    registry.register("A", "B", Arc::new(Wrapping)).unwrap();
    let mut state = StreamConversionState::new("m", "id");
    assert!(matches!(
        registry.convert_stream_chunk_strict(json!({}), "A", "B", &mut state),
        Err(ConversionError::Unsupported {
            operation: ConversionOp::Stream,
            ..
        })
    ));
}

#[test]
fn stream_chunk_same_format_is_single_element() {
    let registry = ConverterRegistry::new();
    let mut state = StreamConversionState::new("m", "id");
    let chunk = json!({"type": "delta", "text": "hello"});
    let out = registry
        .convert_stream_chunk_strict(chunk.clone(), "A", "a", &mut state)
        .unwrap();
    assert_eq!(out, vec![chunk]);
    assert!(
        registry
            .finish_stream_strict("A", "A", &mut state)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn message_start_is_emitted_exactly_once() {
    let mut registry = ConverterRegistry::new();
    registry.register("A", "B", Arc::new(Streaming)).unwrap();
    let mut state = StreamConversionState::new("gpt-4", "chatcmpl_123");

    let counts: Vec<usize> = ["one", "two", "three"]
        .into_iter()
        .map(|text| {
            registry
                .convert_stream_chunk_strict(json!({"text": text}), "A", "B", &mut state)
                .unwrap()
                .len()
        })
        .collect();
    assert_eq!(counts, [2, 1, 1]);
    assert!(state.message_started());
}

#[test]
fn first_event_carries_state_identity() {
    let mut registry = ConverterRegistry::new();
    registry.register("A", "B", Arc::new(Streaming)).unwrap();
    let mut state = StreamConversionState::new("gpt-4", "chatcmpl_123");
    let events = registry
        .convert_stream_chunk_strict(json!({"text": "hello"}), "A", "B", &mut state)
        .unwrap();
    assert_eq!(events[0]["model"], "gpt-4");
    assert_eq!(events[0]["id"], "chatcmpl_123");
}

#[test]
fn converters_may_emit_nothing() {
    let mut registry = ConverterRegistry::new();
    registry.register("CLAUDE", "OPENAI", Arc::new(Selective)).unwrap();
    let mut state = StreamConversionState::new("gpt-4", "msg_123");

    let start = registry
        .convert_stream_chunk_strict(json!({"type": "message_start"}), "CLAUDE", "OPENAI", &mut state)
        .unwrap();
    assert_eq!(start.len(), 1);
    assert_eq!(start[0]["model"], "gpt-4");

    let unknown = registry
        .convert_stream_chunk_strict(json!({"type": "unknown_event"}), "CLAUDE", "OPENAI", &mut state)
        .unwrap();
    assert!(unknown.is_empty());
}

#[test]
fn lenient_calls_pass_the_original_through() {
    let mut registry = ConverterRegistry::new();
    registry.register("A", "B", Arc::new(Failing)).unwrap();
    let mut state = StreamConversionState::new("m", "id");

    assert_eq!(registry.convert_request(json!({"foo": "bar"}), "A", "B"), json!({"foo": "bar"}));
    assert_eq!(registry.convert_response(json!({"data": 1}), "A", "B"), json!({"data": 1}));
    assert_eq!(
        registry.convert_stream_chunk(json!({"chunk": "data"}), "A", "B", &mut state),
        vec![json!({"chunk": "data"})]
    );
    // no converter at all
    assert_eq!(registry.convert_request(json!({"x": 1}), "C", "D"), json!({"x": 1}));
}

#[test]
fn shared_registry_swaps_without_disturbing_snapshots() {
    let shared = SharedRegistry::default();
    let before = shared.load();
    shared.update(|registry| {
        register_builtin_converters(registry).unwrap();
    });
    assert!(before.is_empty());
    assert_eq!(shared.load().len(), 6);

    shared.replace(ConverterRegistry::new());
    assert!(shared.load().is_empty());
}

#[test]
fn builtin_openai_to_claude_round() {
    let mut registry = ConverterRegistry::new();
    register_builtin_converters(&mut registry).unwrap();

    let request = json!({
        "model": "claude-sonnet",
        "messages": [{"role": "user", "content": "hello"}]
    });
    let converted = registry
        .convert_request_strict(request, "openai:chat", "claude:chat")
        .unwrap();
    assert_eq!(converted["messages"][0]["content"][0]["text"], "hello");

    let response = json!({
        "id": "msg_1", "model": "claude-sonnet",
        "content": [{"type": "text", "text": "hi"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 3, "output_tokens": 1}
    });
    let back = registry
        .convert_response_strict(response, "claude:chat", "openai:chat")
        .unwrap();
    assert_eq!(back["choices"][0]["message"]["content"], "hi");
    assert_eq!(back["usage"]["total_tokens"], 4);
}
