//! Wire-level building blocks shared by the conversion and streaming crates.
//!
//! Nothing in here knows about a particular provider schema: API formats are
//! opaque tokens and SSE frames are plain `event:`/`data:` pairs.

pub mod format;
pub mod sse;

pub use format::{
    ApiFormat, FormatFamily, base_format, is_cli_format, is_convertible_format, is_same_format,
    needs_conversion, normalize_format,
};
pub use sse::{DONE_SENTINEL, SseEvent, SseParser, encode_done, encode_sse};
