use super::{FallbackConfig, SessionConfig, SignalingConfig};
use crate::core::channel::{ChannelError, ChannelResult};
use crate::core::signaling::ENVELOPE_HEADER_LEN;

/// Upper bound accepted for `max_envelope_bytes`.
const MAX_ENVELOPE_LIMIT: usize = 16 * 1024 * 1024;

/// Every credential must be present and free of NUL bytes, which the engine's
/// C interface cannot carry.
pub(super) fn validate_session(session: &SessionConfig) -> ChannelResult<()> {
    let fields = [
        ("app_id", &session.app_id),
        ("room_id", &session.room_id),
        ("user_id", &session.user_id),
        ("token", &session.token),
    ];

    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(ChannelError::ConfigInvalid(format!("{name} is required")));
        }
        if value.contains('\0') {
            return Err(ChannelError::ConfigInvalid(format!(
                "{name} contains a NUL byte"
            )));
        }
    }
    Ok(())
}

pub(super) fn validate_signaling(signaling: &SignalingConfig) -> ChannelResult<()> {
    if signaling.max_envelope_bytes <= ENVELOPE_HEADER_LEN {
        return Err(ChannelError::ConfigInvalid(format!(
            "max_envelope_bytes must exceed the {ENVELOPE_HEADER_LEN} byte header"
        )));
    }
    if signaling.max_envelope_bytes > MAX_ENVELOPE_LIMIT {
        return Err(ChannelError::ConfigInvalid(format!(
            "max_envelope_bytes must not exceed {MAX_ENVELOPE_LIMIT}"
        )));
    }
    Ok(())
}

/// Engine parameters are passed through as JSON documents.
pub(super) fn validate_engine_params(params: &[String]) -> ChannelResult<()> {
    for param in params {
        serde_json::from_str::<serde_json::Value>(param).map_err(|e| {
            ChannelError::ConfigInvalid(format!("engine parameter is not valid JSON ({e}): {param}"))
        })?;
    }
    Ok(())
}

pub(super) fn validate_fallback(fallback: &FallbackConfig) -> ChannelResult<()> {
    let url = url::Url::parse(&fallback.url).map_err(|e| {
        ChannelError::ConfigInvalid(format!("fallback url '{}' is invalid: {e}", fallback.url))
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ChannelError::ConfigInvalid(format!(
            "fallback url must use ws:// or wss://, got {}://",
            url.scheme()
        )));
    }
    if fallback.handshake_timeout.is_zero() {
        return Err(ChannelError::ConfigInvalid(
            "handshake timeout must be greater than zero".to_string(),
        ));
    }
    if fallback.client_id.trim().is_empty() || fallback.device_id.trim().is_empty() {
        return Err(ChannelError::ConfigInvalid(
            "fallback client_id and device_id are required".to_string(),
        ));
    }
    Ok(())
}
