//! Diff processing configuration.
//!
//! Settings are layered: built-in defaults, then an optional JSON file, then
//! `HUNKWISE_*` environment variables, then CLI overrides.
//!
//! Reads:
//! - `HUNKWISE_EXTRA_LINES_BEFORE` / `HUNKWISE_EXTRA_LINES_AFTER` - context lines
//! - `HUNKWISE_DYNAMIC_CONTEXT` - `true`/`false`
//! - `HUNKWISE_DYNAMIC_CONTEXT_LINES` - look-back used by dynamic context
//! - `HUNKWISE_MAX_MODEL_TOKENS` - global cap on the model budget
//! - `HUNKWISE_CUSTOM_MODEL_MAX_TOKENS` - budget for models not in the limit table
//! - `HUNKWISE_LARGE_PATCH_POLICY` - `skip` or `clip`
//! - `HUNKWISE_MAX_AI_CALLS` - number of documents allowed for large changes

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::extend::ExtendOptions;

/// Upper bound for configured extra context lines.
pub const MAX_EXTRA_LINES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do with a single file whose diff exceeds the budget on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LargePatchPolicy {
    /// Leave the file out
    Skip,
    /// Truncate the file's diff to the remaining budget
    #[default]
    Clip,
}

impl std::str::FromStr for LargePatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "clip" => Ok(Self::Clip),
            _ => Err(format!(
                "Unknown large patch policy: '{}'. Valid options: skip, clip",
                s
            )),
        }
    }
}

/// Context lines added around each hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLines {
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub patch_extra_lines_before: usize,
    pub patch_extra_lines_after: usize,
    pub allow_dynamic_context: bool,
    pub max_extra_lines_before_dynamic_context: usize,
    /// Files ending with one of these are never extended.
    pub patch_extension_skip_types: Vec<String>,
    /// Use a single line of context on each side regardless of the settings above.
    pub token_economy_mode: bool,
    pub large_patch_policy: LargePatchPolicy,
    /// Global cap on any model's budget. `0` disables the cap.
    pub max_model_tokens: usize,
    /// Budget for models missing from `model_token_limits`.
    pub custom_model_max_tokens: Option<usize>,
    pub model_token_limits: BTreeMap<String, usize>,
    pub max_ai_calls: usize,
    pub enable_ai_metadata: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            patch_extra_lines_before: 5,
            patch_extra_lines_after: 1,
            allow_dynamic_context: true,
            max_extra_lines_before_dynamic_context: 10,
            patch_extension_skip_types: vec![".md".to_string(), ".txt".to_string()],
            token_economy_mode: false,
            large_patch_policy: LargePatchPolicy::Clip,
            max_model_tokens: 32000,
            custom_model_max_tokens: None,
            model_token_limits: BTreeMap::new(),
            max_ai_calls: 4,
            enable_ai_metadata: false,
        }
    }
}

impl DiffConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Defaults with environment variables applied.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `HUNKWISE_*` environment variables on top of this config.
    pub fn with_env(mut self) -> Self {
        if let Some(v) = env_parse("HUNKWISE_EXTRA_LINES_BEFORE") {
            self.patch_extra_lines_before = v;
        }
        if let Some(v) = env_parse("HUNKWISE_EXTRA_LINES_AFTER") {
            self.patch_extra_lines_after = v;
        }
        if let Some(v) = env_parse("HUNKWISE_DYNAMIC_CONTEXT") {
            self.allow_dynamic_context = v;
        }
        if let Some(v) = env_parse("HUNKWISE_DYNAMIC_CONTEXT_LINES") {
            self.max_extra_lines_before_dynamic_context = v;
        }
        if let Some(v) = env_parse("HUNKWISE_MAX_MODEL_TOKENS") {
            self.max_model_tokens = v;
        }
        if let Some(v) = env_parse("HUNKWISE_CUSTOM_MODEL_MAX_TOKENS") {
            self.custom_model_max_tokens = Some(v);
        }
        if let Some(v) = env_parse("HUNKWISE_LARGE_PATCH_POLICY") {
            self.large_patch_policy = v;
        }
        if let Some(v) = env_parse("HUNKWISE_MAX_AI_CALLS") {
            self.max_ai_calls = v;
        }
        self
    }

    pub fn with_extra_lines(mut self, before: usize, after: usize) -> Self {
        self.patch_extra_lines_before = before;
        self.patch_extra_lines_after = after;
        self
    }

    pub fn with_dynamic_context(mut self, enabled: bool) -> Self {
        self.allow_dynamic_context = enabled;
        self
    }

    pub fn with_model_limit(mut self, model: impl Into<String>, tokens: usize) -> Self {
        self.model_token_limits.insert(model.into(), tokens);
        self
    }

    /// Budget for models missing from the limit table. `None` keeps the current value.
    pub fn with_custom_model_max_tokens(mut self, tokens: Option<usize>) -> Self {
        if tokens.is_some() {
            self.custom_model_max_tokens = tokens;
        }
        self
    }

    /// Merge with CLI overrides. CLI values take precedence.
    pub fn with_overrides(
        mut self,
        extra_lines_before: Option<usize>,
        extra_lines_after: Option<usize>,
        max_model_tokens: Option<usize>,
        max_ai_calls: Option<usize>,
        large_patch_policy: Option<LargePatchPolicy>,
    ) -> Self {
        if let Some(v) = extra_lines_before {
            self.patch_extra_lines_before = v;
        }
        if let Some(v) = extra_lines_after {
            self.patch_extra_lines_after = v;
        }
        if let Some(v) = max_model_tokens {
            self.max_model_tokens = v;
        }
        if let Some(v) = max_ai_calls {
            self.max_ai_calls = v;
        }
        if let Some(v) = large_patch_policy {
            self.large_patch_policy = v;
        }
        self
    }

    /// Resolve how many context lines to add around each hunk.
    pub fn context_lines(&self, disable_extra_lines: bool) -> ContextLines {
        if disable_extra_lines {
            return ContextLines {
                before: 0,
                after: 0,
            };
        }
        if self.token_economy_mode {
            return ContextLines {
                before: 1,
                after: 1,
            };
        }
        ContextLines {
            before: cap_extra_lines(self.patch_extra_lines_before, "before"),
            after: cap_extra_lines(self.patch_extra_lines_after, "after"),
        }
    }

    /// Options for the hunk extender with the given context lines.
    pub fn extend_options(&self, lines: ContextLines) -> ExtendOptions {
        ExtendOptions {
            extra_lines_before: lines.before,
            extra_lines_after: lines.after,
            allow_dynamic_context: self.allow_dynamic_context,
            dynamic_context_lines_before: self.max_extra_lines_before_dynamic_context,
            skip_extensions: self.patch_extension_skip_types.clone(),
        }
    }
}

fn cap_extra_lines(value: usize, direction: &str) -> usize {
    if value > MAX_EXTRA_LINES {
        warn!(
            "Too many extra lines {} ({}), capping to {}",
            direction, value, MAX_EXTRA_LINES
        );
        MAX_EXTRA_LINES
    } else {
        value
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: '{}'", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiffConfig::default();
        assert_eq!(config.patch_extra_lines_before, 5);
        assert_eq!(config.patch_extra_lines_after, 1);
        assert!(config.allow_dynamic_context);
        assert_eq!(config.max_extra_lines_before_dynamic_context, 10);
        assert_eq!(config.patch_extension_skip_types, vec![".md", ".txt"]);
        assert_eq!(config.large_patch_policy, LargePatchPolicy::Clip);
    }

    #[test]
    fn test_context_lines_capped() {
        let config = DiffConfig::default().with_extra_lines(25, 3);
        assert_eq!(
            config.context_lines(false),
            ContextLines {
                before: MAX_EXTRA_LINES,
                after: 3
            }
        );
    }

    #[test]
    fn test_context_lines_disabled_and_economy() {
        let mut config = DiffConfig::default();
        assert_eq!(
            config.context_lines(true),
            ContextLines {
                before: 0,
                after: 0
            }
        );
        config.token_economy_mode = true;
        assert_eq!(
            config.context_lines(false),
            ContextLines {
                before: 1,
                after: 1
            }
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: DiffConfig =
            serde_json::from_str(r#"{"patch_extra_lines_before": 2, "large_patch_policy": "skip"}"#)
                .unwrap();
        assert_eq!(config.patch_extra_lines_before, 2);
        assert_eq!(config.patch_extra_lines_after, 1);
        assert_eq!(config.large_patch_policy, LargePatchPolicy::Skip);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hunkwise.json");
        fs::write(&path, r#"{"model_token_limits": {"small": 4000}}"#).unwrap();
        let config = DiffConfig::from_file(&path).unwrap();
        assert_eq!(config.model_token_limits.get("small"), Some(&4000));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            DiffConfig::from_file(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = DiffConfig::default().with_overrides(
            Some(0),
            None,
            Some(8000),
            Some(2),
            Some(LargePatchPolicy::Skip),
        );
        assert_eq!(config.patch_extra_lines_before, 0);
        assert_eq!(config.patch_extra_lines_after, 1);
        assert_eq!(config.max_model_tokens, 8000);
        assert_eq!(config.max_ai_calls, 2);
        assert_eq!(config.large_patch_policy, LargePatchPolicy::Skip);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("SKIP".parse::<LargePatchPolicy>(), Ok(LargePatchPolicy::Skip));
        assert!("truncate".parse::<LargePatchPolicy>().is_err());
    }
}
