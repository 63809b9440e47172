use std::env;
use std::str::FromStr;

use crate::core::channel::{AudioCodec, ChannelError, ChannelResult};
use crate::core::signaling::LengthCheck;

/// Values read from the process environment. `None` means unset.
#[derive(Debug, Default)]
pub(crate) struct EnvConfig {
    pub app_id: Option<String>,
    pub room_id: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub audio_codec: Option<AudioCodec>,
    pub join_timeout_ms: Option<u64>,
    pub subscribe_audio: Option<bool>,
    pub subscribe_video: Option<bool>,
    pub local_capture_source: Option<bool>,
    pub engine_params: Option<Vec<String>>,
    pub length_check: Option<LengthCheck>,
    pub max_envelope_bytes: Option<usize>,
    pub fallback_url: Option<String>,
    pub fallback_token: Option<String>,
    pub fallback_device_id: Option<String>,
    pub fallback_client_id: Option<String>,
    pub fallback_handshake_timeout_ms: Option<u64>,
}

impl EnvConfig {
    pub fn load() -> ChannelResult<Self> {
        Ok(Self {
            app_id: string_var("RTC_APP_ID"),
            room_id: string_var("RTC_ROOM_ID"),
            user_id: string_var("RTC_USER_ID"),
            token: string_var("RTC_TOKEN"),
            audio_codec: string_var("RTC_AUDIO_CODEC")
                .map(|v| {
                    AudioCodec::parse(&v).ok_or_else(|| {
                        ChannelError::ConfigInvalid(format!("RTC_AUDIO_CODEC: unknown codec '{v}'"))
                    })
                })
                .transpose()?,
            join_timeout_ms: parsed_var("RTC_JOIN_TIMEOUT_MS")?,
            subscribe_audio: bool_var("RTC_SUBSCRIBE_AUDIO")?,
            subscribe_video: bool_var("RTC_SUBSCRIBE_VIDEO")?,
            local_capture_source: bool_var("RTC_LOCAL_CAPTURE")?,
            engine_params: string_var("RTC_ENGINE_PARAMS")
                .map(|v| parse_engine_params(&v))
                .transpose()?,
            length_check: string_var("RTC_LENGTH_CHECK")
                .map(|v| {
                    LengthCheck::parse(&v).ok_or_else(|| {
                        ChannelError::ConfigInvalid(format!(
                            "RTC_LENGTH_CHECK: expected 'envelope' or 'strict', got '{v}'"
                        ))
                    })
                })
                .transpose()?,
            max_envelope_bytes: parsed_var("RTC_MAX_ENVELOPE_BYTES")?,
            fallback_url: string_var("FALLBACK_WS_URL"),
            fallback_token: string_var("FALLBACK_WS_TOKEN"),
            fallback_device_id: string_var("FALLBACK_DEVICE_ID"),
            fallback_client_id: string_var("FALLBACK_CLIENT_ID"),
            fallback_handshake_timeout_ms: parsed_var("FALLBACK_HANDSHAKE_TIMEOUT_MS")?,
        })
    }
}

fn string_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(key: &str) -> ChannelResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match string_var(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ChannelError::ConfigInvalid(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

fn bool_var(key: &str) -> ChannelResult<Option<bool>> {
    match string_var(key) {
        Some(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ChannelError::ConfigInvalid(format!(
                "{key}: expected a boolean, got '{other}'"
            ))),
        },
        None => Ok(None),
    }
}

/// `RTC_ENGINE_PARAMS` holds a JSON array; string elements are used as-is,
/// other elements are serialized.
fn parse_engine_params(raw: &str) -> ChannelResult<Vec<String>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|e| {
        ChannelError::ConfigInvalid(format!("RTC_ENGINE_PARAMS must be a JSON array: {e}"))
    })?;
    Ok(values.iter().map(super::yaml::engine_param_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_engine_params() {
        let params =
            parse_engine_params(r#"["{\"rtc\":{\"thread\":{\"priority\":5}}}", {"debug":{"log_to_console":1}}]"#)
                .unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], r#"{"rtc":{"thread":{"priority":5}}}"#);
        assert_eq!(params[1], r#"{"debug":{"log_to_console":1}}"#);

        assert!(parse_engine_params("not json").is_err());
    }
}
