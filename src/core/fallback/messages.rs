//! Hello handshake messages for the websocket fallback.
//!
//! The client announces itself right after connecting:
//!
//! ```json
//! {"type":"hello","version":1,"transport":"websocket",
//!  "audio_params":{"format":"opus","sample_rate":16000,"channels":1,"frame_duration":60}}
//! ```
//!
//! The server must answer with its own `hello` declaring
//! `"transport":"websocket"` before any audio flows. Every other JSON text
//! frame is a control message for the Application.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{AudioParams, FallbackConfig};

/// Transport name both sides must agree on.
pub const WEBSOCKET_TRANSPORT: &str = "websocket";

/// Problems with an incoming text frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FallbackMessageError {
    #[error("Invalid JSON message: {0}")]
    InvalidJson(String),
    #[error("Missing message type, data: {0}")]
    MissingType(String),
    #[error("Invalid server hello: {0}")]
    InvalidHello(String),
}

/// Client hello sent after connecting.
#[derive(Debug, Clone, Serialize)]
pub struct ClientHello<'a> {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub version: u32,
    pub transport: &'static str,
    pub audio_params: &'a AudioParams,
}

impl<'a> ClientHello<'a> {
    pub fn new(config: &'a FallbackConfig) -> Self {
        Self {
            message_type: "hello",
            version: config.protocol_version,
            transport: WEBSOCKET_TRANSPORT,
            audio_params: &config.audio_params,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerAudioParams {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub frame_duration: Option<u32>,
}

/// Server hello.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerHello {
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub audio_params: Option<ServerAudioParams>,
}

impl ServerHello {
    /// Sample rate the server will send audio at, if announced.
    pub fn sample_rate(&self) -> Option<u32> {
        self.audio_params.as_ref().and_then(|p| p.sample_rate)
    }
}

/// Classified incoming text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello(ServerHello),
    /// Any other typed JSON message
    Control(Value),
}

/// Parse one text frame.
pub fn parse_server_message(text: &str) -> Result<ServerMessage, FallbackMessageError> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| FallbackMessageError::InvalidJson(e.to_string()))?;

    let Some(message_type) = root.get("type").and_then(Value::as_str) else {
        return Err(FallbackMessageError::MissingType(text.to_string()));
    };

    if message_type != "hello" {
        return Ok(ServerMessage::Control(root));
    }

    let hello: ServerHello = serde_json::from_value(root)
        .map_err(|e| FallbackMessageError::InvalidHello(e.to_string()))?;
    match hello.transport.as_deref() {
        Some(WEBSOCKET_TRANSPORT) => Ok(ServerMessage::Hello(hello)),
        other => Err(FallbackMessageError::InvalidHello(format!(
            "unsupported transport {:?}",
            other
        ))),
    }
}
