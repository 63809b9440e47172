//! RTC media transport contract.
//!
//! The transport is the vendor real-time engine: it owns the network, the audio
//! codec and the room. Every call returns a raw [`TransportCode`] which
//! [`codes`] maps onto [`ChannelError`](crate::core::channel::ChannelError).
//!
//! Engine callbacks arrive on threads the engine owns. Implementations forward
//! them as [`TransportEvent`]s through the [`EventSink`] handed to
//! [`Transport::create`]; the sink only enqueues, so it is safe to call from
//! any thread and never blocks.
//!
//! # Lifecycle
//!
//! ```text
//! create -> init -> set_params* -> set_audio_codec -> join_room
//!                                                        |
//!        destroy <- FinalizeComplete <- fini <- leave_room
//! ```
//!
//! `destroy` is only safe after the engine reported [`TransportEvent::FinalizeComplete`].

pub mod codes;

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::channel::AudioCodec;
use crate::core::channel::rtc::PumpEvent;

/// Raw engine return code. `0` is success.
pub type TransportCode = i32;

/// Subscription options passed to [`Transport::join_room`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOptions {
    /// Receive remote audio
    pub auto_subscribe_audio: bool,
    /// Receive remote video
    pub auto_subscribe_video: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            auto_subscribe_audio: true,
            auto_subscribe_video: false,
        }
    }
}

/// Delivery mode for [`Transport::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageReliability {
    #[default]
    Reliable,
    Unreliable,
}

/// Asynchronous notification from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Join acknowledged
    JoinRoomSuccess { room: String, elapsed_ms: u32 },
    /// Engine rejoined after a network interruption
    RejoinRoomSuccess { room: String, elapsed_ms: u32 },
    /// Remote user entered the room
    UserJoined { room: String, user_id: String },
    /// Remote user left the room
    UserOffline {
        room: String,
        user_id: String,
        reason: i32,
    },
    UserMuteAudio {
        room: String,
        user_id: String,
        muted: bool,
    },
    UserMuteVideo {
        room: String,
        user_id: String,
        muted: bool,
    },
    /// Media connection dropped
    ConnectionLost { room: String },
    /// Room-scoped failure
    RoomError {
        room: String,
        code: i32,
        message: String,
    },
    /// Remote audio packet
    AudioData {
        room: String,
        user_id: String,
        sent_ts: u16,
        codec: AudioCodec,
        data: Bytes,
    },
    /// Remote video packet. Never subscribed by this crate; logged only.
    VideoData {
        room: String,
        user_id: String,
        is_key_frame: bool,
        len: usize,
    },
    /// A subscriber asked for a new key frame
    KeyFrameRequest { room: String, user_id: String },
    /// Generic room message, carrying signaling envelopes
    MessageReceived {
        room: String,
        user_id: String,
        data: Bytes,
        binary: bool,
    },
    /// Engine-wide failure
    GlobalError { code: i32, message: String },
    TargetBitrateChanged { room: String, target_bps: u32 },
    /// Outcome of an earlier [`Transport::send_message`]
    MessageSendResult {
        room: String,
        message_id: i64,
        error: i32,
        extra: String,
    },
    /// Token expires in about 30 seconds
    TokenWillExpire { room: String },
    /// Engine license expires soon
    LicenseExpireWarning { days_left: i32 },
    /// `fini` finished; `destroy` is now safe
    FinalizeComplete,
}

impl TransportEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::JoinRoomSuccess { .. } => "join_room_success",
            TransportEvent::RejoinRoomSuccess { .. } => "rejoin_room_success",
            TransportEvent::UserJoined { .. } => "user_joined",
            TransportEvent::UserOffline { .. } => "user_offline",
            TransportEvent::UserMuteAudio { .. } => "user_mute_audio",
            TransportEvent::UserMuteVideo { .. } => "user_mute_video",
            TransportEvent::ConnectionLost { .. } => "connection_lost",
            TransportEvent::RoomError { .. } => "room_error",
            TransportEvent::AudioData { .. } => "audio_data",
            TransportEvent::VideoData { .. } => "video_data",
            TransportEvent::KeyFrameRequest { .. } => "key_frame_request",
            TransportEvent::MessageReceived { .. } => "message_received",
            TransportEvent::GlobalError { .. } => "global_error",
            TransportEvent::TargetBitrateChanged { .. } => "target_bitrate_changed",
            TransportEvent::MessageSendResult { .. } => "message_send_result",
            TransportEvent::TokenWillExpire { .. } => "token_will_expire",
            TransportEvent::LicenseExpireWarning { .. } => "license_expire_warning",
            TransportEvent::FinalizeComplete => "finalize_complete",
        }
    }
}

/// Opaque identifier of one engine instance.
///
/// Events are tagged with the handle of the engine that produced them so that
/// late callbacks from a torn-down engine can be recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

static NEXT_SESSION_HANDLE: AtomicU64 = AtomicU64::new(1);

impl SessionHandle {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Callback sink handed to the engine at creation time.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionHandle,
    tx: mpsc::UnboundedSender<PumpEvent>,
}

impl EventSink {
    pub(crate) fn new(session: SessionHandle, tx: mpsc::UnboundedSender<PumpEvent>) -> Self {
        Self { session, tx }
    }

    /// Engine instance this sink belongs to.
    pub fn session(&self) -> SessionHandle {
        self.session
    }

    /// Enqueue an event for the channel. Returns `false` once the channel is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(PumpEvent::Transport {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Vendor RTC engine binding.
///
/// Implementations wrap a single engine instance at a time. Methods are
/// synchronous and must return promptly; results of long operations arrive as
/// events.
pub trait Transport: Send + Sync {
    /// Create an engine instance for `app_id` delivering callbacks to `sink`.
    fn create(&self, app_id: &str, sink: EventSink) -> TransportCode;

    /// Initialise the created engine. `0` ok, `-1` bad arguments, `-2` already
    /// initialised, `-3` out of resources.
    fn init(&self) -> TransportCode;

    /// Apply a JSON engine parameter string.
    fn set_params(&self, _params: &str) -> TransportCode {
        0
    }

    fn set_audio_codec(&self, codec: AudioCodec) -> TransportCode;

    /// Join a room. `0` accepted, `-1`/`1` no engine, `-2` bad arguments,
    /// `-3` already joined.
    fn join_room(
        &self,
        room_id: &str,
        user_id: &str,
        token: &str,
        options: RoomOptions,
    ) -> TransportCode;

    /// `0` ok, `-1` no engine, `-2` bad arguments.
    fn leave_room(&self, room_id: &str) -> TransportCode;

    /// Begin finalisation. Completion is reported by [`TransportEvent::FinalizeComplete`].
    fn fini(&self) -> TransportCode;

    /// Release the engine instance.
    fn destroy(&self);

    /// `0` ok, `-1` no engine, `-2` bad arguments.
    fn send_audio(&self, room_id: &str, data: &[u8], codec: AudioCodec) -> TransportCode;

    fn send_message(
        &self,
        room_id: &str,
        dest_user_id: &str,
        data: &[u8],
        reliability: MessageReliability,
    ) -> TransportCode;
}
