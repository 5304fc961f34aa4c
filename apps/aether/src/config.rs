use std::path::Path;

use aether_core::ProcessorOptions;
use aether_transform::{BodyRule, ShapingError, parse_body_rules};
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::cli::Cli;

const DEFAULT_MODEL: &str = "unknown";

/// Final configuration used by the running process.
///
/// Merge order: CLI > ENV > file > defaults. clap already folds ENV into the
/// CLI layer.
#[derive(Debug, Clone)]
pub(crate) struct GatewayConfig {
    pub(crate) default_model: String,
    pub(crate) processor: ProcessorOptions,
    pub(crate) body_rules: Vec<BodyRule>,
}

/// Optional layer used for merging.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct ConfigPatch {
    pub(crate) default_model: Option<String>,
    pub(crate) channel_capacity: Option<usize>,
    pub(crate) emit_done_sentinel: Option<bool>,
    pub(crate) body_rules: Option<Value>,
}

impl ConfigPatch {
    pub(crate) fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub(crate) fn from_cli(cli: &Cli) -> Self {
        Self {
            default_model: cli.default_model.clone(),
            channel_capacity: cli.channel_capacity,
            emit_done_sentinel: cli.emit_done_sentinel,
            body_rules: None,
        }
    }

    pub(crate) fn overlay(&mut self, other: ConfigPatch) {
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        if other.channel_capacity.is_some() {
            self.channel_capacity = other.channel_capacity;
        }
        if other.emit_done_sentinel.is_some() {
            self.emit_done_sentinel = other.emit_done_sentinel;
        }
        if other.body_rules.is_some() {
            self.body_rules = other.body_rules;
        }
    }

    pub(crate) fn into_config(self) -> Result<GatewayConfig, ShapingError> {
        let defaults = ProcessorOptions::default();
        let body_rules = match self.body_rules {
            Some(raw) => parse_body_rules(&raw)?,
            None => Vec::new(),
        };
        Ok(GatewayConfig {
            default_model: self
                .default_model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            processor: ProcessorOptions {
                channel_capacity: self
                    .channel_capacity
                    .filter(|capacity| *capacity > 0)
                    .unwrap_or(defaults.channel_capacity),
                emit_done_sentinel: self
                    .emit_done_sentinel
                    .unwrap_or(defaults.emit_done_sentinel),
            },
            body_rules,
        })
    }
}

pub(crate) fn resolve(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut patch = match &cli.config {
        Some(path) => ConfigPatch::from_file(path)?,
        None => ConfigPatch::default(),
    };
    patch.overlay(ConfigPatch::from_cli(cli));
    Ok(patch.into_config()?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn later_layers_win_and_defaults_fill_gaps() {
        let mut patch: ConfigPatch = serde_json::from_value(json!({
            "default_model": "gpt-4o",
            "channel_capacity": 8,
            "body_rules": [{"action": "drop", "path": "metadata"}]
        }))
        .unwrap();
        patch.overlay(ConfigPatch {
            channel_capacity: Some(64),
            ..ConfigPatch::default()
        });

        let config = patch.into_config().unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.processor.channel_capacity, 64);
        assert!(config.processor.emit_done_sentinel);
        assert_eq!(config.body_rules.len(), 1);
    }

    #[test]
    fn empty_patch_uses_defaults() {
        let config = ConfigPatch::default().into_config().unwrap();
        assert_eq!(config.default_model, "unknown");
        assert_eq!(config.processor, ProcessorOptions::default());
        assert!(config.body_rules.is_empty());
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let patch = ConfigPatch {
            body_rules: Some(json!({"action": "set"})),
            ..ConfigPatch::default()
        };
        assert!(patch.into_config().is_err());
    }
}
