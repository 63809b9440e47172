//! Translation of raw engine return codes into [`ChannelError`].

use super::TransportCode;
use crate::core::channel::{ChannelError, ChannelResult};

/// Map the result of `create`.
pub fn create_result(code: TransportCode) -> ChannelResult<()> {
    match code {
        0 => Ok(()),
        other => Err(ChannelError::EngineUnavailable(format!(
            "engine creation failed ({other})"
        ))),
    }
}

/// Map the result of `init`.
pub fn init_result(code: TransportCode) -> ChannelResult<()> {
    match code {
        0 => Ok(()),
        -1 => Err(ChannelError::ConfigInvalid(
            "app id or event handler is empty".to_string(),
        )),
        -2 => Err(ChannelError::EngineUnavailable(
            "engine already initialized".to_string(),
        )),
        -3 => Err(ChannelError::EngineUnavailable(
            "engine instance could not be allocated".to_string(),
        )),
        other => Err(ChannelError::EngineUnavailable(format!(
            "engine init returned {other}"
        ))),
    }
}

/// Map the result of `join_room`.
pub fn join_result(code: TransportCode) -> ChannelResult<()> {
    match code {
        0 => Ok(()),
        -1 | 1 => Err(ChannelError::EngineUnavailable(
            "engine instance does not exist".to_string(),
        )),
        -2 => Err(ChannelError::ConfigInvalid(
            "join parameters are empty".to_string(),
        )),
        -3 => Err(ChannelError::AlreadyJoined),
        other => Err(ChannelError::JoinFailed(format!("join returned {other}"))),
    }
}

/// Log the result of `leave_room`. Failures do not stop teardown.
pub fn log_leave_result(code: TransportCode) {
    match code {
        0 => tracing::debug!("Left room"),
        -1 => tracing::warn!("leave_room failed: engine instance does not exist"),
        -2 => tracing::warn!("leave_room failed: parameters are empty"),
        other => tracing::warn!("leave_room returned unexpected value {}", other),
    }
}

/// Log the result of `fini`. Returns whether finalisation started.
pub fn log_fini_result(code: TransportCode) -> bool {
    match code {
        0 => {
            tracing::debug!("Engine finalization started");
            true
        }
        -1 => {
            tracing::warn!("fini failed: engine instance does not exist");
            false
        }
        other => {
            tracing::warn!("fini returned unexpected value {}", other);
            false
        }
    }
}

/// Map the result of `send_audio`.
pub fn send_audio_result(code: TransportCode) -> ChannelResult<()> {
    match code {
        0 => Ok(()),
        -1 => Err(ChannelError::SendFailed(
            "engine instance does not exist".to_string(),
        )),
        -2 => Err(ChannelError::SendFailed("audio parameters are empty".to_string())),
        other => Err(ChannelError::SendFailed(format!(
            "send_audio returned {other}"
        ))),
    }
}

/// Map the result of `send_message`.
pub fn send_message_result(code: TransportCode) -> ChannelResult<()> {
    match code {
        0 => Ok(()),
        other => Err(ChannelError::SendFailed(format!(
            "send_message returned {other}"
        ))),
    }
}
