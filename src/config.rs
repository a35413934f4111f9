//! Bridge configuration
//!
//! Loaded from TOML, then overridden from `TYPTHON_BIND_*` environment
//! variables:
//!
//! ```toml
//! max_call_bytes = 1048576
//! trace_calls = true
//!
//! [log]
//! level = "debug"
//! format = "json"
//! file = "/var/log/typthon_bind.log"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{LogFormat, LogLevel, LogSettings};

pub const ENV_MAX_CALL_BYTES: &str = "TYPTHON_BIND_MAX_CALL_BYTES";
pub const ENV_TRACE_CALLS: &str = "TYPTHON_BIND_TRACE_CALLS";
pub const ENV_LOG_LEVEL: &str = "TYPTHON_BIND_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "TYPTHON_BIND_LOG_JSON";
pub const ENV_LOG_FILE: &str = "TYPTHON_BIND_LOG_FILE";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value `{value}` for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bytes a single call may allocate on the native heap; unlimited when unset
    pub max_call_bytes: Option<usize>,
    /// Log one `info` event with timing per dispatched call
    pub trace_calls: bool,
    pub log: LogSettings,
}

impl BridgeConfig {
    /// Parse configuration from TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Apply `TYPTHON_BIND_*` overrides from the process environment
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_MAX_CALL_BYTES) {
            self.max_call_bytes = match value.trim() {
                "" | "0" | "none" | "unlimited" => None,
                raw => Some(raw.parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::InvalidValue {
                        var: ENV_MAX_CALL_BYTES,
                        value: value.clone(),
                        reason: e.to_string(),
                    }
                })?),
            };
        }

        if let Some(value) = lookup(ENV_TRACE_CALLS) {
            self.trace_calls = parse_flag(ENV_TRACE_CALLS, &value)?;
        }

        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.log.level = value.parse::<LogLevel>().map_err(|reason| ConfigError::InvalidValue {
                var: ENV_LOG_LEVEL,
                value: value.clone(),
                reason,
            })?;
        }

        if let Some(value) = lookup(ENV_LOG_JSON) {
            if parse_flag(ENV_LOG_JSON, &value)? {
                self.log.format = LogFormat::Json;
            }
        }

        if let Some(value) = lookup(ENV_LOG_FILE) {
            self.log.file = (!value.is_empty()).then(|| PathBuf::from(value));
        }

        Ok(self)
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn defaults_are_unlimited_and_quiet() {
        let config = BridgeConfig::default();
        assert_eq!(config.max_call_bytes, None);
        assert!(!config.trace_calls);
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn parses_toml() {
        let config = BridgeConfig::from_toml_str(
            r#"
            max_call_bytes = 4096
            trace_calls = true

            [log]
            level = "trace"
            format = "pretty"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_call_bytes, Some(4096));
        assert!(config.trace_calls);
        assert_eq!(config.log.level, LogLevel::Trace);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            BridgeConfig::from_toml_str("max_call_bytes = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = BridgeConfig::from_toml_str("max_call_bytes = 10")
            .unwrap()
            .with_overrides(vars(&[
                (ENV_MAX_CALL_BYTES, "2048"),
                (ENV_TRACE_CALLS, "yes"),
                (ENV_LOG_LEVEL, "debug"),
                (ENV_LOG_JSON, "1"),
                (ENV_LOG_FILE, "/tmp/bind.log"),
            ]))
            .unwrap();

        assert_eq!(config.max_call_bytes, Some(2048));
        assert!(config.trace_calls);
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.file, Some(PathBuf::from("/tmp/bind.log")));
    }

    #[test]
    fn zero_budget_means_unlimited() {
        let config = BridgeConfig { max_call_bytes: Some(64), ..Default::default() }
            .with_overrides(vars(&[(ENV_MAX_CALL_BYTES, "0")]))
            .unwrap();
        assert_eq!(config.max_call_bytes, None);
    }

    #[test]
    fn bad_values_are_reported() {
        let err = BridgeConfig::default()
            .with_overrides(vars(&[(ENV_TRACE_CALLS, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: ENV_TRACE_CALLS, .. }));

        let err = BridgeConfig::default()
            .with_overrides(vars(&[(ENV_LOG_LEVEL, "loud")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value `loud` for TYPTHON_BIND_LOG_LEVEL: unknown log level `loud`");
    }
}
