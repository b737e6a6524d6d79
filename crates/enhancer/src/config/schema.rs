use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Root under which `jobs/`, `uploads/` and `outputs/` live.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Buffered events per live subscriber before the oldest are dropped.
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
    #[serde(default)]
    pub max_job_duration_secs: Option<u64>,
    /// Terminal jobs leave memory after this long; `None` keeps them resident.
    #[serde(default = "default_evict_after_secs")]
    pub evict_after_secs: Option<u64>,
    #[serde(default = "default_allowed_models")]
    pub allowed_models: Vec<String>,
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_workers() -> usize {
    1
}

fn default_listener_capacity() -> usize {
    200
}

fn default_flush_delay_ms() -> u64 {
    100
}

fn default_evict_after_secs() -> Option<u64> {
    Some(3600)
}

fn default_allowed_models() -> Vec<String> {
    ["dns48", "dns64", "master64"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_supported_extensions() -> Vec<String> {
    [".wav", ".mp3", ".m4a", ".flac", ".ogg", ".aac", ".mp4"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            max_workers: default_max_workers(),
            listener_capacity: default_listener_capacity(),
            flush_delay_ms: default_flush_delay_ms(),
            max_job_duration_secs: None,
            evict_after_secs: default_evict_after_secs(),
            allowed_models: default_allowed_models(),
            supported_extensions: default_supported_extensions(),
            log: LogConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Convenience constructor used by embedders and tests.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.base_dir.join("jobs")
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn max_job_duration(&self) -> Option<Duration> {
        self.max_job_duration_secs.map(Duration::from_secs)
    }

    pub fn evict_after(&self) -> Option<Duration> {
        self.evict_after_secs.map(Duration::from_secs)
    }

    pub fn validate_options(&self, options: &JobOptions) -> Result<(), ConfigError> {
        if self.allowed_models.iter().any(|m| m == &options.model) {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedModel(options.model.clone()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "enhancer=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

/// Per-job processing options. The orchestrator treats these as opaque and
/// passes them to the processor; unknown keys survive a snapshot round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub low_bitrate: bool,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub no_loudnorm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_temp_dir: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_model() -> String {
    "dns64".to_string()
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            model: default_model(),
            low_bitrate: false,
            suffix: String::new(),
            recursive: false,
            no_loudnorm: false,
            requested_temp_dir: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl JobOptions {
    /// Builds options from raw form fields as a transport layer receives them.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let flag = |key: &str| fields.get(key).map(|v| parse_bool(v)).unwrap_or(false);

        Self {
            model: fields
                .get("model")
                .filter(|m| !m.trim().is_empty())
                .map(|m| m.trim().to_string())
                .unwrap_or_else(default_model),
            low_bitrate: flag("low_bitrate"),
            suffix: fields.get("suffix").cloned().unwrap_or_default(),
            recursive: flag("recursive"),
            no_loudnorm: flag("no_loudnorm"),
            requested_temp_dir: fields.get("temp_dir").cloned(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Interprets the usual truthy form values.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" YES "));
        assert!(parse_bool("1"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
        assert!(!parse_bool("nope"));
    }

    #[test]
    fn test_options_from_fields() {
        let mut fields = HashMap::new();
        fields.insert("model".to_string(), "master64".to_string());
        fields.insert("low_bitrate".to_string(), "on".to_string());
        fields.insert("suffix".to_string(), "_clean".to_string());

        let options = JobOptions::from_fields(&fields);
        assert_eq!(options.model, "master64");
        assert!(options.low_bitrate);
        assert!(!options.recursive);
        assert_eq!(options.suffix, "_clean");
    }

    #[test]
    fn test_options_default_model_when_blank() {
        let mut fields = HashMap::new();
        fields.insert("model".to_string(), "  ".to_string());
        assert_eq!(JobOptions::from_fields(&fields).model, "dns64");
    }

    #[test]
    fn test_unknown_option_keys_round_trip() {
        let json = r#"{"model":"dns48","custom_gain":3}"#;
        let options: JobOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.extra.get("custom_gain"), Some(&serde_json::json!(3)));

        let back = serde_json::to_value(&options).unwrap();
        assert_eq!(back["custom_gain"], 3);
        assert_eq!(back["model"], "dns48");
    }

    #[test]
    fn test_validate_options_rejects_unknown_model() {
        let config = ServiceConfig::default();
        let options = JobOptions {
            model: "dns999".to_string(),
            ..JobOptions::default()
        };
        assert!(matches!(
            config.validate_options(&options),
            Err(ConfigError::UnsupportedModel(m)) if m == "dns999"
        ));
        assert!(config.validate_options(&JobOptions::default()).is_ok());
    }
}
