//! Base traits and types shared by every audio channel variant.
//!
//! This module defines the error taxonomy, the audio frame types handed across the
//! Application boundary, the callback aliases the Application registers, and the
//! [`AudioChannel`] trait implemented by the RTC channel and the websocket fallback.
//!
//! # Threading
//!
//! Callbacks are invoked from the channel's event task, never from the thread that
//! registered them. Applications must treat them as asynchronous and synchronise
//! any state they touch.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::signaling::SignalEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors surfaced by channel operations and reported through the error callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Missing or malformed session configuration
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Engine create/init failed, or the previous engine is still finalizing
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A session is already joining or joined
    #[error("Already joined")]
    AlreadyJoined,

    /// Operation attempted outside the joined phase
    #[error("Not connected")]
    NotConnected,

    /// Room error or join failure reported by the transport
    #[error("Join failed: {0}")]
    JoinFailed(String),

    /// Handshake acknowledgement did not arrive in time
    #[error("Handshake timed out after {}ms", .0.as_millis())]
    HandshakeTimeout(Duration),

    /// Envelope too short, too large, or carrying an unparsable payload
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Well-formed envelope with an unregistered tag
    #[error("Unknown envelope tag: {0}")]
    UnknownTag(String),

    /// Transport send primitive returned a failure
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Transport reported loss of the media connection
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Asynchronous engine error with its raw code
    #[error("Transport error {code}: {message}")]
    Transport {
        /// Raw engine error code
        code: i32,
        /// Engine supplied description
        message: String,
    },
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

// =============================================================================
// Audio Types
// =============================================================================

/// Codec tag attached to audio frames.
///
/// Encoding and decoding happen inside the transport; the channel only forwards
/// the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// Opus (default)
    #[default]
    Opus,
    /// G.711 A-law
    G711A,
    /// G.711 mu-law
    G711U,
    /// AAC
    Aac,
    /// Raw PCM 16-bit
    Pcm,
}

impl AudioCodec {
    /// Parse a codec name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "opus" => Some(AudioCodec::Opus),
            "g711a" | "pcma" => Some(AudioCodec::G711A),
            "g711u" | "pcmu" => Some(AudioCodec::G711U),
            "aac" => Some(AudioCodec::Aac),
            "pcm" | "linear16" => Some(AudioCodec::Pcm),
            _ => None,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::Opus => write!(f, "opus"),
            AudioCodec::G711A => write!(f, "g711a"),
            AudioCodec::G711U => write!(f, "g711u"),
            AudioCodec::Aac => write!(f, "aac"),
            AudioCodec::Pcm => write!(f, "pcm"),
        }
    }
}

/// Outbound audio frame.
///
/// The channel borrows the bytes for the duration of the send call only.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    /// Encoded audio payload
    pub data: &'a [u8],
    /// Codec of the payload
    pub codec: AudioCodec,
}

impl<'a> AudioFrame<'a> {
    /// Create an Opus frame.
    pub fn opus(data: &'a [u8]) -> Self {
        Self {
            data,
            codec: AudioCodec::Opus,
        }
    }

    /// Create a frame with an explicit codec.
    pub fn new(data: &'a [u8], codec: AudioCodec) -> Self {
        Self { data, codec }
    }
}

/// Inbound audio handed to the Application.
#[derive(Debug, Clone)]
pub struct ReceivedAudio {
    /// Freshly allocated payload owned by the Application
    pub data: Bytes,
    /// Codec of the payload
    pub codec: AudioCodec,
    /// Sending user, empty when the peer is the fallback server
    pub user_id: String,
    /// Sender timestamp supplied by the transport
    pub sent_ts: u16,
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for incoming audio.
pub type IncomingAudioCallback =
    Arc<dyn Fn(ReceivedAudio) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for incoming signaling events.
pub type IncomingSignalCallback =
    Arc<dyn Fn(SignalEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for channel open/close notifications.
pub type ChannelNotifyCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for asynchronous channel errors.
pub type ChannelErrorCallback =
    Arc<dyn Fn(ChannelError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Single-slot callback registrations. Last registration wins.
///
/// Slots are cloned out before invocation so no lock is held while the
/// Application code runs.
#[derive(Default)]
pub(crate) struct CallbackSlots {
    audio: Mutex<Option<IncomingAudioCallback>>,
    signal: Mutex<Option<IncomingSignalCallback>>,
    opened: Mutex<Option<ChannelNotifyCallback>>,
    closed: Mutex<Option<ChannelNotifyCallback>>,
    error: Mutex<Option<ChannelErrorCallback>>,
}

impl CallbackSlots {
    pub(crate) fn set_audio(&self, callback: IncomingAudioCallback) {
        *self.audio.lock() = Some(callback);
    }

    pub(crate) fn set_signal(&self, callback: IncomingSignalCallback) {
        *self.signal.lock() = Some(callback);
    }

    pub(crate) fn set_opened(&self, callback: ChannelNotifyCallback) {
        *self.opened.lock() = Some(callback);
    }

    pub(crate) fn set_closed(&self, callback: ChannelNotifyCallback) {
        *self.closed.lock() = Some(callback);
    }

    pub(crate) fn set_error(&self, callback: ChannelErrorCallback) {
        *self.error.lock() = Some(callback);
    }

    pub(crate) async fn emit_audio(&self, audio: ReceivedAudio) {
        let callback = self.audio.lock().clone();
        if let Some(cb) = callback {
            cb(audio).await;
        }
    }

    pub(crate) async fn emit_signal(&self, event: SignalEvent) {
        let callback = self.signal.lock().clone();
        if let Some(cb) = callback {
            cb(event).await;
        }
    }

    pub(crate) async fn emit_opened(&self) {
        let callback = self.opened.lock().clone();
        if let Some(cb) = callback {
            cb().await;
        }
    }

    pub(crate) async fn emit_closed(&self) {
        let callback = self.closed.lock().clone();
        if let Some(cb) = callback {
            cb().await;
        }
    }

    pub(crate) async fn emit_error(&self, error: ChannelError) {
        let callback = self.error.lock().clone();
        if let Some(cb) = callback {
            cb(error).await;
        }
    }
}

// =============================================================================
// Base Trait
// =============================================================================

/// Application-facing audio channel.
///
/// # Example
///
/// ```rust,ignore
/// use rtc_audio_channel::{AudioChannel, AudioFrame, RtcChannel};
/// use std::sync::Arc;
///
/// let channel = RtcChannel::new(config, transport)?;
/// channel.on_incoming_audio(Arc::new(|audio| Box::pin(async move {
///     // hand audio.data to the decoder
/// })));
/// channel.open_channel().await?;
/// channel.send_audio(AudioFrame::opus(&packet)).await?;
/// channel.close_channel().await;
/// ```
#[async_trait]
pub trait AudioChannel: Send + Sync {
    /// Start opening the channel.
    ///
    /// Completion is signalled through the opened callback.
    async fn open_channel(&self) -> ChannelResult<()>;

    /// Close the channel. Safe to call from any state, any number of times.
    async fn close_channel(&self);

    /// Hand one frame to the transport. Never queued or retried.
    async fn send_audio(&self, frame: AudioFrame<'_>) -> ChannelResult<()>;

    /// Whether audio can currently flow.
    fn is_open(&self) -> bool;

    /// Register the incoming audio callback.
    fn on_incoming_audio(&self, callback: IncomingAudioCallback);

    /// Register the incoming signaling callback.
    fn on_incoming_signal(&self, callback: IncomingSignalCallback);

    /// Register the channel opened callback.
    fn on_channel_opened(&self, callback: ChannelNotifyCallback);

    /// Register the channel closed callback.
    fn on_channel_closed(&self, callback: ChannelNotifyCallback);

    /// Register the asynchronous error callback.
    fn on_channel_error(&self, callback: ChannelErrorCallback);
}
