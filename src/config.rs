//! Settings file and layered configuration.
//!
//! Precedence (highest first): CLI flag, environment variable, `settings.toml`,
//! built-in default. clap folds the first two together, so this module only
//! overlays the flag/env values on top of the file.

use crate::engine::openai::{OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::model::RunConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted delay between topics.
pub const MAX_DELAY: Duration = Duration::from_secs(3600);

/// Every tunable is optional so a partial file or flag set can be overlaid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    #[serde(with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
    #[serde(with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Settings {
    /// Read `settings.toml`; a missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    /// Overlay `over` on top of `self`: every value set in `over` wins.
    pub fn merge(self, over: Settings) -> Settings {
        Settings {
            delay: over.delay.or(self.delay),
            poll_interval: over.poll_interval.or(self.poll_interval),
            model: over.model.or(self.model),
            base_url: over.base_url.or(self.base_url),
            temperature: over.temperature.or(self.temperature),
            max_tokens: over.max_tokens.or(self.max_tokens),
            request_timeout: over.request_timeout.or(self.request_timeout),
            strict_output: over.strict_output.or(self.strict_output),
            log_level: over.log_level.or(self.log_level),
        }
    }

    pub fn run_config(&self) -> RunConfig {
        let defaults = RunConfig::default();
        let delay = self.delay.unwrap_or(defaults.delay);
        if delay > MAX_DELAY {
            tracing::warn!(?delay, "delay clamped to one hour");
        }
        RunConfig {
            delay: delay.min(MAX_DELAY),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            strict_output: self.strict_output.unwrap_or(defaults.strict_output),
        }
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        let defaults = OpenAiConfig::default();
        OpenAiConfig {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            request_timeout: self.request_timeout,
            user_agent: defaults.user_agent,
        }
    }

    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_settings() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(&dir.path().join("settings.toml")).unwrap();
        assert_eq!(s, Settings::default());
        let run = s.run_config();
        assert_eq!(run.delay, Duration::from_secs(30));
        assert_eq!(run.poll_interval, Duration::from_millis(100));
        assert!(!run.strict_output);
        assert_eq!(s.openai_config().model, "gpt-4o-mini");
    }

    #[test]
    fn parses_human_durations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "delay = \"2m\"\nrequest_timeout = \"90s\"\nmodel = \"gpt-4o\"\nstrict_output = true\n",
        )
        .unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.delay, Some(Duration::from_secs(120)));
        assert_eq!(s.openai_config().request_timeout, Some(Duration::from_secs(90)));
        assert_eq!(s.openai_config().model, "gpt-4o");
        assert!(s.run_config().strict_output);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "dealy = \"5s\"\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let file = Settings {
            delay: Some(Duration::from_secs(10)),
            model: Some("file-model".into()),
            log_level: Some("debug".into()),
            ..Default::default()
        };
        let flags = Settings {
            delay: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let merged = file.merge(flags);
        assert_eq!(merged.delay, Some(Duration::from_secs(2)));
        assert_eq!(merged.model.as_deref(), Some("file-model"));
        assert_eq!(merged.log_level(), Some("debug"));
    }

    #[test]
    fn delay_is_clamped_to_an_hour() {
        let s = Settings {
            delay: Some(Duration::from_secs(7200)),
            ..Default::default()
        };
        assert_eq!(s.run_config().delay, MAX_DELAY);
        let zero = Settings {
            delay: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(zero.run_config().delay, Duration::ZERO);
    }
}
