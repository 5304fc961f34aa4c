use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const OPENAI_CHAT: &str = "openai:chat";
pub const OPENAI_CLI: &str = "openai:cli";
pub const CLAUDE_CHAT: &str = "claude:chat";
pub const CLAUDE_CLI: &str = "claude:cli";
pub const GEMINI_CHAT: &str = "gemini:chat";
pub const GEMINI_CLI: &str = "gemini:cli";

/// Provider family an API format belongs to, independent of its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    #[serde(rename = "openai")]
    OpenAI,
    Claude,
    Gemini,
}

/// Case-insensitive API format token such as `openai:chat` or `CLAUDE_CLI`.
///
/// The wrapped string is always the normalized form, so two formats compare
/// equal whenever their tokens do after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ApiFormat(String);

impl ApiFormat {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(normalize_format(token))
    }

    pub fn openai_chat() -> Self {
        Self(OPENAI_CHAT.to_string())
    }

    pub fn claude_chat() -> Self {
        Self(CLAUDE_CHAT.to_string())
    }

    pub fn gemini_chat() -> Self {
        Self(GEMINI_CHAT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CLI formats are transparent passthrough and never reach a converter.
    pub fn is_cli(&self) -> bool {
        is_cli_format(&self.0)
    }

    pub fn is_convertible(&self) -> bool {
        !self.is_cli()
    }

    /// Format with any CLI suffix removed.
    pub fn base(&self) -> String {
        base_format(&self.0)
    }

    pub fn family(&self) -> Option<FormatFamily> {
        let base = self.base();
        let head = base
            .split(|c: char| c == ':' || c == '_')
            .next()
            .unwrap_or_default();
        match head {
            "openai" => Some(FormatFamily::OpenAI),
            "claude" | "anthropic" => Some(FormatFamily::Claude),
            "gemini" => Some(FormatFamily::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ApiFormat {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ApiFormat {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ApiFormat {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ApiFormat {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&ApiFormat> for ApiFormat {
    fn from(value: &ApiFormat) -> Self {
        value.clone()
    }
}

impl From<ApiFormat> for String {
    fn from(value: ApiFormat) -> Self {
        value.0
    }
}

pub fn normalize_format(token: impl AsRef<str>) -> String {
    token.as_ref().trim().to_ascii_lowercase()
}

pub fn is_cli_format(token: impl AsRef<str>) -> bool {
    let normalized = normalize_format(token);
    normalized.ends_with("_cli") || normalized.ends_with(":cli")
}

pub fn is_convertible_format(token: impl AsRef<str>) -> bool {
    let normalized = normalize_format(token);
    !normalized.is_empty() && !is_cli_format(&normalized)
}

pub fn base_format(token: impl AsRef<str>) -> String {
    let normalized = normalize_format(token);
    match normalized
        .strip_suffix("_cli")
        .or_else(|| normalized.strip_suffix(":cli"))
    {
        Some(base) => base.to_string(),
        None => normalized,
    }
}

pub fn is_same_format(a: impl AsRef<str>, b: impl AsRef<str>) -> bool {
    normalize_format(a) == normalize_format(b)
}

/// Whether a payload travelling between the two formats has to be converted.
pub fn needs_conversion(client: impl AsRef<str>, provider: impl AsRef<str>) -> bool {
    let client = normalize_format(client);
    let provider = normalize_format(provider);
    client != provider && !is_cli_format(&client) && !is_cli_format(&provider)
}
