//! TOML configuration.
//!
//! Every key is optional; a missing file means defaults. See [`ChatConfig`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::ChatOptions;
use crate::error::ConfigError;
use crate::reconciler::CompletionPolicy;
use crate::transport::{ReconnectPolicy, TransportConfig, DEFAULT_INBOUND_CAPACITY};

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080/ws";

/// Input limit of the chat box.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectMode {
    Always,
    Bounded,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub mode: ReconnectMode,
    /// Fixed interval for `always`, base delay for `bounded`.
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub max_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            mode: ReconnectMode::Always,
            interval_ms: 5_000,
            max_attempts: 20,
            max_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        match self.mode {
            ReconnectMode::Always => ReconnectPolicy::Always {
                interval: Duration::from_millis(self.interval_ms),
            },
            ReconnectMode::Bounded => ReconnectPolicy::Bounded {
                max_attempts: self.max_attempts,
                base: Duration::from_millis(self.interval_ms),
                max: Duration::from_millis(self.max_interval_ms),
            },
            ReconnectMode::Never => ReconnectPolicy::Never,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: String,
    pub max_input_chars: usize,
    pub completion: CompletionPolicy,
    pub inbound_capacity: usize,
    pub reconnect: ReconnectSettings,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            completion: CompletionPolicy::default(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl ChatConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    ///
    /// This only parses. Call [`validate`](Self::validate) once command-line
    /// overrides have been applied, since a flag may replace a bad value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be a ws:// or wss:// URL, got '{}'",
                self.endpoint
            )));
        }
        if self.max_input_chars == 0 {
            return Err(ConfigError::Invalid("max_input_chars must be > 0".into()));
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid("inbound_capacity must be > 0".into()));
        }
        if self.reconnect.mode != ReconnectMode::Never && self.reconnect.interval_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            endpoint: self.endpoint.clone(),
            reconnect: self.reconnect.policy(),
            connect_timeout: Duration::from_millis(self.reconnect.connect_timeout_ms),
            inbound_capacity: self.inbound_capacity,
        }
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            max_input_chars: self.max_input_chars,
            completion: self.completion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = ChatConfig::default();
        assert_eq!(c.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(c.max_input_chars, 500);
        assert_eq!(c.completion, CompletionPolicy::Monotonic);
        assert_eq!(c.reconnect.mode, ReconnectMode::Always);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let c: ChatConfig = toml::from_str("").unwrap();
        assert_eq!(c, ChatConfig::default());
    }

    #[test]
    fn test_full_toml() {
        let c: ChatConfig = toml::from_str(
            r#"
            endpoint = "wss://chat.example.com/ws"
            max_input_chars = 1000
            completion = "overwrite"

            [reconnect]
            mode = "bounded"
            interval_ms = 250
            max_attempts = 3
            max_interval_ms = 2000
            "#,
        )
        .unwrap();
        assert_eq!(c.endpoint, "wss://chat.example.com/ws");
        assert_eq!(c.max_input_chars, 1000);
        assert_eq!(c.completion, CompletionPolicy::Overwrite);
        assert_eq!(
            c.reconnect.policy(),
            ReconnectPolicy::Bounded {
                max_attempts: 3,
                base: Duration::from_millis(250),
                max: Duration::from_millis(2000),
            }
        );
        // Unset key keeps its default.
        assert_eq!(c.reconnect.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_always_policy_uses_interval() {
        let s = ReconnectSettings {
            interval_ms: 1500,
            ..Default::default()
        };
        assert_eq!(
            s.policy(),
            ReconnectPolicy::Always {
                interval: Duration::from_millis(1500)
            }
        );
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result: Result<ChatConfig, _> = toml::from_str("[reconnect]\nmode = \"sometimes\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_http_endpoint() {
        let c = ChatConfig {
            endpoint: "http://localhost/ws".into(),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let c = ChatConfig {
            max_input_chars: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let c = ChatConfig {
            inbound_capacity: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_transport_config_mapping() {
        let c = ChatConfig::default();
        let t = c.transport();
        assert_eq!(t.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(t.connect_timeout, Duration::from_secs(10));
        assert_eq!(t.inbound_capacity, DEFAULT_INBOUND_CAPACITY);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = ChatConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(c, ChatConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "endpoint = \"ws://10.0.0.2:9000/chat\"").unwrap();
        let c = ChatConfig::load(file.path()).unwrap();
        assert_eq!(c.endpoint, "ws://10.0.0.2:9000/chat");
    }

    #[test]
    fn test_load_does_not_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "endpoint = \"http://10.0.0.2/chat\"").unwrap();
        let c = ChatConfig::load(file.path()).unwrap();
        assert_eq!(c.endpoint, "http://10.0.0.2/chat");
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_bad_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "endpoint = ").unwrap();
        let err = ChatConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
