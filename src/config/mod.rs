//! Channel configuration.
//!
//! Configuration is loaded from environment variables and, optionally, a YAML
//! file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `env`: environment variable loading
//! - `yaml`: YAML configuration file loading
//! - `validation`: configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use rtc_audio_channel::config::ChannelConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ChannelConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config = ChannelConfig::from_file(&PathBuf::from("channel.yaml"))?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::channel::{AudioCodec, ChannelResult};
use crate::core::signaling::{DEFAULT_MAX_ENVELOPE_BYTES, LengthCheck};

/// Default bound on the join acknowledgement.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on the fallback server hello.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default silence after which the fallback channel reports closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// Fallback protocol version sent in headers and hello.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;

/// Room credentials. Immutable once the channel is created.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub app_id: String,
    pub room_id: String,
    pub user_id: String,
    pub token: String,
}

impl SessionConfig {
    pub fn new(
        app_id: impl Into<String>,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            room_id: room_id.into(),
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("app_id", &self.app_id)
            .field("room_id", &self.room_id)
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Zeroize the room token when the config is dropped.
impl Drop for SessionConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.token.zeroize();
    }
}

/// What the adapter subscribes to and produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Receive remote audio
    pub subscribe_audio: bool,
    /// Receive remote video
    pub subscribe_video: bool,
    /// Local microphone capture is present; outbound audio is allowed
    pub local_capture_source: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            subscribe_audio: true,
            subscribe_video: false,
            local_capture_source: true,
        }
    }
}

/// Envelope decoding options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingConfig {
    pub length_check: LengthCheck,
    pub max_envelope_bytes: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            length_check: LengthCheck::default(),
            max_envelope_bytes: DEFAULT_MAX_ENVELOPE_BYTES,
        }
    }
}

/// Audio parameters announced in the fallback hello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub frame_duration: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            format: "opus".to_string(),
            sample_rate: 16000,
            channels: 1,
            frame_duration: 60,
        }
    }
}

/// WebSocket fallback endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct FallbackConfig {
    /// `ws://` or `wss://` endpoint
    pub url: String,
    /// Bearer token
    pub token: Option<String>,
    pub device_id: String,
    pub client_id: String,
    pub protocol_version: u32,
    /// Bound on the server hello wait
    pub handshake_timeout: Duration,
    /// Silence after which the channel no longer counts as open
    pub idle_timeout: Duration,
    pub audio_params: AudioParams,
}

impl FallbackConfig {
    /// Config for `url` with defaults and a random client id.
    pub fn new(url: impl Into<String>) -> Self {
        let client_id = uuid::Uuid::new_v4().to_string();
        Self {
            url: url.into(),
            token: None,
            device_id: client_id.clone(),
            client_id,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            audio_params: AudioParams::default(),
        }
    }
}

impl fmt::Debug for FallbackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("device_id", &self.device_id)
            .field("client_id", &self.client_id)
            .field("protocol_version", &self.protocol_version)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("audio_params", &self.audio_params)
            .finish()
    }
}

impl Drop for FallbackConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Some(ref mut token) = self.token {
            token.zeroize();
        }
    }
}

/// Complete channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub session: SessionConfig,
    pub capabilities: Capabilities,
    pub audio_codec: AudioCodec,
    /// Bound on the join acknowledgement; `None` waits forever
    pub join_timeout: Option<Duration>,
    /// JSON parameter strings applied to the engine before joining
    pub engine_params: Vec<String>,
    pub signaling: SignalingConfig,
    pub fallback: Option<FallbackConfig>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            capabilities: Capabilities::default(),
            audio_codec: AudioCodec::default(),
            join_timeout: Some(DEFAULT_JOIN_TIMEOUT),
            engine_params: Vec::new(),
            signaling: SignalingConfig::default(),
            fallback: None,
        }
    }
}

impl ChannelConfig {
    /// Config with the given credentials and defaults elsewhere.
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session,
            ..Default::default()
        }
    }

    /// Load from environment variables.
    ///
    /// `.env` files are loaded by the binary at startup.
    pub fn from_env() -> ChannelResult<Self> {
        let env = env::EnvConfig::load()?;
        merge(env, None)
    }

    /// Load from a YAML file, falling back to environment variables for
    /// anything the file leaves out.
    pub fn from_file(path: &Path) -> ChannelResult<Self> {
        let yaml = YamlConfig::from_file(path)?;
        let env = env::EnvConfig::load()?;
        merge(env, Some(yaml))
    }

    /// Validate everything the RTC channel needs.
    pub fn validate(&self) -> ChannelResult<()> {
        validation::validate_session(&self.session)?;
        validation::validate_signaling(&self.signaling)?;
        validation::validate_engine_params(&self.engine_params)?;
        if let Some(fallback) = &self.fallback {
            validation::validate_fallback(fallback)?;
        }
        Ok(())
    }

    /// Validate only the fallback section.
    pub fn validate_fallback(&self) -> ChannelResult<&FallbackConfig> {
        match &self.fallback {
            Some(fallback) => {
                validation::validate_fallback(fallback)?;
                Ok(fallback)
            }
            None => Err(crate::core::channel::ChannelError::ConfigInvalid(
                "fallback endpoint is not configured".to_string(),
            )),
        }
    }
}

fn merge(env: env::EnvConfig, yaml: Option<YamlConfig>) -> ChannelResult<ChannelConfig> {
    let yaml = yaml.unwrap_or_default();
    let defaults = ChannelConfig::default();

    let session_yaml = yaml.session.unwrap_or_default();
    let session = SessionConfig {
        app_id: session_yaml.app_id.or(env.app_id).unwrap_or_default(),
        room_id: session_yaml.room_id.or(env.room_id).unwrap_or_default(),
        user_id: session_yaml.user_id.or(env.user_id).unwrap_or_default(),
        token: session_yaml.token.or(env.token).unwrap_or_default(),
    };

    let caps_yaml = yaml.capabilities.unwrap_or_default();
    let capabilities = Capabilities {
        subscribe_audio: caps_yaml
            .subscribe_audio
            .or(env.subscribe_audio)
            .unwrap_or(defaults.capabilities.subscribe_audio),
        subscribe_video: caps_yaml
            .subscribe_video
            .or(env.subscribe_video)
            .unwrap_or(defaults.capabilities.subscribe_video),
        local_capture_source: caps_yaml
            .local_capture_source
            .or(env.local_capture_source)
            .unwrap_or(defaults.capabilities.local_capture_source),
    };

    let audio_codec = match yaml.audio.and_then(|a| a.codec) {
        Some(name) => yaml::parse_codec(&name)?,
        None => env.audio_codec.unwrap_or(defaults.audio_codec),
    };

    let join_timeout = match yaml.join_timeout_ms.or(env.join_timeout_ms) {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => defaults.join_timeout,
    };

    let engine_params = match yaml.engine_params {
        Some(values) => values.iter().map(yaml::engine_param_string).collect(),
        None => env.engine_params.unwrap_or_default(),
    };

    let signaling_yaml = yaml.signaling.unwrap_or_default();
    let signaling = SignalingConfig {
        length_check: match signaling_yaml.length_check {
            Some(name) => yaml::parse_length_check(&name)?,
            None => env
                .length_check
                .unwrap_or(defaults.signaling.length_check),
        },
        max_envelope_bytes: signaling_yaml
            .max_envelope_bytes
            .or(env.max_envelope_bytes)
            .unwrap_or(defaults.signaling.max_envelope_bytes),
    };

    let fallback_yaml = yaml.fallback.unwrap_or_default();
    let fallback = match fallback_yaml.url.or(env.fallback_url) {
        Some(url) => {
            let mut fallback = FallbackConfig::new(url);
            fallback.token = fallback_yaml.token.or(env.fallback_token);
            if let Some(client_id) = fallback_yaml.client_id.or(env.fallback_client_id) {
                fallback.client_id = client_id;
            }
            fallback.device_id = fallback_yaml
                .device_id
                .or(env.fallback_device_id)
                .unwrap_or_else(|| fallback.client_id.clone());
            if let Some(version) = fallback_yaml.protocol_version {
                fallback.protocol_version = version;
            }
            if let Some(ms) = fallback_yaml
                .handshake_timeout_ms
                .or(env.fallback_handshake_timeout_ms)
            {
                fallback.handshake_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = fallback_yaml.idle_timeout_ms {
                fallback.idle_timeout = Duration::from_millis(ms);
            }
            if let Some(params) = fallback_yaml.audio_params {
                fallback.audio_params = params;
            }
            Some(fallback)
        }
        None => None,
    };

    Ok(ChannelConfig {
        session,
        capabilities,
        audio_codec,
        join_timeout,
        engine_params,
        signaling,
        fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const VARS: &[&str] = &[
        "RTC_APP_ID",
        "RTC_ROOM_ID",
        "RTC_USER_ID",
        "RTC_TOKEN",
        "RTC_AUDIO_CODEC",
        "RTC_JOIN_TIMEOUT_MS",
        "RTC_SUBSCRIBE_AUDIO",
        "RTC_SUBSCRIBE_VIDEO",
        "RTC_LOCAL_CAPTURE",
        "RTC_ENGINE_PARAMS",
        "RTC_LENGTH_CHECK",
        "RTC_MAX_ENVELOPE_BYTES",
        "FALLBACK_WS_URL",
        "FALLBACK_WS_TOKEN",
        "FALLBACK_DEVICE_ID",
        "FALLBACK_CLIENT_ID",
        "FALLBACK_HANDSHAKE_TIMEOUT_MS",
    ];

    fn cleanup_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let session = SessionConfig::new("app", "room", "user", "secret-token");
        let debug = format!("{:?}", session);
        assert!(debug.contains("room"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.join_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.audio_codec, AudioCodec::Opus);
        assert!(config.capabilities.subscribe_audio);
        assert!(!config.capabilities.subscribe_video);
        assert!(config.capabilities.local_capture_source);
        assert_eq!(config.signaling.length_check, LengthCheck::Envelope);
        assert!(config.fallback.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("RTC_APP_ID", "env-app");
            env::set_var("RTC_ROOM_ID", "env-room");
            env::set_var("RTC_USER_ID", "env-user");
            env::set_var("RTC_TOKEN", "env-token");
            env::set_var("RTC_AUDIO_CODEC", "g711a");
            env::set_var("RTC_JOIN_TIMEOUT_MS", "0");
            env::set_var("RTC_SUBSCRIBE_VIDEO", "true");
            env::set_var("RTC_ENGINE_PARAMS", r#"[{"debug":{"log_to_console":1}}]"#);
            env::set_var("RTC_LENGTH_CHECK", "strict");
        }

        let config = ChannelConfig::from_env().unwrap();

        assert_eq!(config.session.app_id, "env-app");
        assert_eq!(config.session.token, "env-token");
        assert_eq!(config.audio_codec, AudioCodec::G711A);
        assert_eq!(config.join_timeout, None);
        assert!(config.capabilities.subscribe_video);
        assert_eq!(
            config.engine_params,
            vec![r#"{"debug":{"log_to_console":1}}"#.to_string()]
        );
        assert_eq!(config.signaling.length_check, LengthCheck::Strict);
        assert!(config.validate().is_ok());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("RTC_JOIN_TIMEOUT_MS", "soon");
        }

        let result = ChannelConfig::from_env();
        assert!(matches!(
            result,
            Err(crate::core::channel::ChannelError::ConfigInvalid(_))
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("channel.yaml");

        let yaml_content = r#"
session:
  app_id: "yaml-app"
  room_id: "yaml-room"
join_timeout_ms: 2500
capabilities:
  subscribe_audio: false
fallback:
  url: "wss://voice.example.com/ws"
  client_id: "client-1"
  handshake_timeout_ms: 500
"#;
        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("RTC_APP_ID", "env-app");
            env::set_var("RTC_USER_ID", "env-user");
            env::set_var("RTC_TOKEN", "env-token");
            env::set_var("FALLBACK_WS_TOKEN", "env-ws-token");
        }

        let config = ChannelConfig::from_file(&config_path).unwrap();

        assert_eq!(config.session.app_id, "yaml-app");
        assert_eq!(config.session.room_id, "yaml-room");
        assert_eq!(config.session.user_id, "env-user");
        assert_eq!(config.join_timeout, Some(Duration::from_millis(2500)));
        assert!(!config.capabilities.subscribe_audio);

        let fallback = config.fallback.as_ref().unwrap();
        assert_eq!(fallback.url, "wss://voice.example.com/ws");
        assert_eq!(fallback.token.as_deref(), Some("env-ws-token"));
        assert_eq!(fallback.client_id, "client-1");
        assert_eq!(fallback.device_id, "client-1");
        assert_eq!(fallback.handshake_timeout, Duration::from_millis(500));
        assert!(config.validate().is_ok());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_validate_missing_session() {
        cleanup_env_vars();

        let config = ChannelConfig::from_env().unwrap();
        assert!(matches!(
            config.validate(),
            Err(crate::core::channel::ChannelError::ConfigInvalid(_))
        ));
        assert!(config.validate_fallback().is_err());
    }
}
