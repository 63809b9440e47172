use std::path::Path;

use serde::Deserialize;

use super::AudioParams;
use crate::core::channel::{AudioCodec, ChannelError, ChannelResult};
use crate::core::signaling::LengthCheck;

/// Complete YAML configuration structure
///
/// All fields are optional; environment variables fill in whatever the file
/// leaves out.
///
/// # Example YAML structure
/// ```yaml
/// session:
///   app_id: "your-app-id"
///   room_id: "room-1"
///   user_id: "device-1"
///   token: "temporary-token"
///
/// capabilities:
///   subscribe_audio: true
///   subscribe_video: false
///   local_capture_source: true
///
/// audio:
///   codec: "opus"
///
/// join_timeout_ms: 10000
///
/// engine_params:
///   - debug:
///       log_to_console: 1
///
/// signaling:
///   length_check: "envelope"
///   max_envelope_bytes: 65536
///
/// fallback:
///   url: "wss://voice.example.com/ws"
///   token: "bearer-token"
///   device_id: "aa:bb:cc:dd:ee:ff"
///   client_id: "4f1c..."
///   handshake_timeout_ms: 10000
///   idle_timeout_ms: 120000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub session: Option<SessionYaml>,
    pub capabilities: Option<CapabilitiesYaml>,
    pub audio: Option<AudioYaml>,
    pub join_timeout_ms: Option<u64>,
    pub engine_params: Option<Vec<serde_json::Value>>,
    pub signaling: Option<SignalingYaml>,
    pub fallback: Option<FallbackYaml>,
}

/// Room credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub app_id: Option<String>,
    pub room_id: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CapabilitiesYaml {
    pub subscribe_audio: Option<bool>,
    pub subscribe_video: Option<bool>,
    pub local_capture_source: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SignalingYaml {
    pub length_check: Option<String>,
    pub max_envelope_bytes: Option<usize>,
}

/// WebSocket fallback endpoint from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FallbackYaml {
    pub url: Option<String>,
    pub token: Option<String>,
    pub device_id: Option<String>,
    pub client_id: Option<String>,
    pub protocol_version: Option<u32>,
    pub handshake_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub audio_params: Option<AudioParams>,
}

impl YamlConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// `ConfigInvalid` if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> ChannelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ChannelError::ConfigInvalid(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ChannelError::ConfigInvalid(format!("Failed to parse YAML config: {e}")))?;

        Ok(config)
    }
}

pub(crate) fn parse_codec(name: &str) -> ChannelResult<AudioCodec> {
    AudioCodec::parse(name)
        .ok_or_else(|| ChannelError::ConfigInvalid(format!("unknown audio codec '{name}'")))
}

pub(crate) fn parse_length_check(name: &str) -> ChannelResult<LengthCheck> {
    LengthCheck::parse(name).ok_or_else(|| {
        ChannelError::ConfigInvalid(format!(
            "length_check must be 'envelope' or 'strict', got '{name}'"
        ))
    })
}

/// Engine parameters may be written as JSON strings or as structured values.
pub(crate) fn engine_param_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
session:
  app_id: "app"
  room_id: "room"
  user_id: "user"
  token: "token"
capabilities:
  subscribe_audio: true
  subscribe_video: false
  local_capture_source: false
audio:
  codec: "pcmu"
join_timeout_ms: 5000
engine_params:
  - '{"debug":{"log_to_console":1}}'
  - rtc:
      thread:
        pinned_to_core: 1
signaling:
  length_check: "strict"
  max_envelope_bytes: 4096
fallback:
  url: "ws://localhost:8000"
  audio_params:
    format: "opus"
    sample_rate: 24000
    channels: 1
    frame_duration: 20
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let session = config.session.unwrap();
        assert_eq!(session.app_id.as_deref(), Some("app"));
        assert_eq!(
            config.capabilities.unwrap().local_capture_source,
            Some(false)
        );
        assert_eq!(
            parse_codec(&config.audio.unwrap().codec.unwrap()).unwrap(),
            AudioCodec::G711U
        );
        assert_eq!(config.join_timeout_ms, Some(5000));

        let params: Vec<String> = config
            .engine_params
            .unwrap()
            .iter()
            .map(engine_param_string)
            .collect();
        assert_eq!(params[0], r#"{"debug":{"log_to_console":1}}"#);
        assert_eq!(params[1], r#"{"rtc":{"thread":{"pinned_to_core":1}}}"#);

        let signaling = config.signaling.unwrap();
        assert_eq!(
            parse_length_check(&signaling.length_check.unwrap()).unwrap(),
            LengthCheck::Strict
        );
        assert_eq!(signaling.max_envelope_bytes, Some(4096));

        let fallback = config.fallback.unwrap();
        assert_eq!(fallback.audio_params.unwrap().sample_rate, 24000);
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.session.is_none());
        assert!(config.fallback.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("channel.yaml");
        fs::write(&config_path, "session:\n  room_id: \"r1\"\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(config.session.unwrap().room_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/channel.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }

    #[test]
    fn test_bad_enum_values() {
        assert!(parse_codec("mp3").is_err());
        assert!(parse_length_check("loose").is_err());
    }
}
