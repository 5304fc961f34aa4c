//! Directed format converters and the registry that dispatches to them.
//!
//! A converter handles exactly one ordered `(source, target)` pair. It may
//! implement any subset of request, response and stream-chunk conversion;
//! the registry answers capability queries through [`FormatConverter`]'s
//! accessor methods and offers strict (`Result`) and lenient (passthrough on
//! failure) invocation.

pub mod converter;
pub mod error;
pub mod generate_content;
pub mod registry;
pub mod shaping;
pub mod state;

pub use converter::{FormatConverter, RequestConverter, ResponseConverter, StreamChunkConverter};
pub use error::{ConversionError, ConversionOp, ConvertError, ShapingError};
pub use generate_content::register_builtin_converters;
pub use registry::{ConverterRegistry, SharedRegistry};
pub use shaping::{
    BodyRule, adapt_request_for_image_gen, apply_body_rules, is_image_gen_model, parse_body_rules,
};
pub use state::StreamConversionState;

pub use aether_protocol::ApiFormat;
