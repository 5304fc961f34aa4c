//! Built-in converters between OpenAI Chat Completions, Claude Messages and
//! Gemini generateContent payloads.
//!
//! Each `<from>2<to>` module turns `<from>`-shaped requests, responses and
//! stream chunks into their `<to>` equivalents.

use std::sync::Arc;

use aether_protocol::format::{CLAUDE_CHAT, GEMINI_CHAT, OPENAI_CHAT};
use serde_json::Value;

use crate::converter::{
    FormatConverter, RequestConverter, ResponseConverter, StreamChunkConverter,
};
use crate::error::{ConversionError, ConvertError};
use crate::registry::ConverterRegistry;
use crate::state::StreamConversionState;

pub(crate) mod helpers;

pub mod claude2gemini;
pub mod claude2openai;
pub mod gemini2claude;
pub mod gemini2openai;
pub mod openai2claude;
pub mod openai2gemini;

macro_rules! builtin_converter {
    ($(#[$meta:meta])* $name:ident => $module:ident) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl FormatConverter for $name {
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

        impl RequestConverter for $name {
            fn convert_request(&self, request: &Value) -> Result<Value, ConvertError> {
                $module::request::transform_request(request)
            }
        }

        impl ResponseConverter for $name {
            fn convert_response(&self, response: &Value) -> Result<Value, ConvertError> {
                $module::response::transform_response(response)
            }
        }

        impl StreamChunkConverter for $name {
            fn convert_stream_chunk(
                &self,
                chunk: &Value,
                state: &mut StreamConversionState,
            ) -> Result<Vec<Value>, ConvertError> {
                $module::stream::transform_chunk(chunk, state)
            }

            fn finish_stream(
                &self,
                state: &mut StreamConversionState,
            ) -> Result<Vec<Value>, ConvertError> {
                $module::stream::finish(state)
            }
        }
    };
}

builtin_converter!(
    /// Chat Completions payloads to Claude Messages payloads.
    OpenAIToClaude => openai2claude
);
builtin_converter!(
    /// Claude Messages payloads to Chat Completions payloads.
    ClaudeToOpenAI => claude2openai
);
builtin_converter!(OpenAIToGemini => openai2gemini);
builtin_converter!(GeminiToOpenAI => gemini2openai);
builtin_converter!(ClaudeToGemini => claude2gemini);
builtin_converter!(GeminiToClaude => gemini2claude);

/// Registers the six built-in directed converters under the `*:chat` tokens.
pub fn register_builtin_converters(
    registry: &mut ConverterRegistry,
) -> Result<(), ConversionError> {
    registry.register(OPENAI_CHAT, CLAUDE_CHAT, Arc::new(OpenAIToClaude))?;
    registry.register(CLAUDE_CHAT, OPENAI_CHAT, Arc::new(ClaudeToOpenAI))?;
    registry.register(OPENAI_CHAT, GEMINI_CHAT, Arc::new(OpenAIToGemini))?;
    registry.register(GEMINI_CHAT, OPENAI_CHAT, Arc::new(GeminiToOpenAI))?;
    registry.register(CLAUDE_CHAT, GEMINI_CHAT, Arc::new(ClaudeToGemini))?;
    registry.register(GEMINI_CHAT, CLAUDE_CHAT, Arc::new(GeminiToClaude))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_pair_in_both_directions() {
        let mut registry = ConverterRegistry::new();
        register_builtin_converters(&mut registry).unwrap();
        assert_eq!(registry.len(), 6);
        for (a, b) in [
            (OPENAI_CHAT, CLAUDE_CHAT),
            (OPENAI_CHAT, GEMINI_CHAT),
            (CLAUDE_CHAT, GEMINI_CHAT),
        ] {
            assert!(registry.can_convert_full(a, b, true), "{a} <-> {b}");
        }
    }
}
