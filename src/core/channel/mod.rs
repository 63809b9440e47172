//! Application-facing audio channels.
//!
//! - [`RtcChannel`]: session over an RTC [`Transport`](crate::core::transport::Transport)
//! - [`WebSocketChannel`](crate::core::fallback::WebSocketChannel): fallback over a plain websocket
//!
//! Both implement [`AudioChannel`].

mod base;
pub mod rtc;
pub mod session;

pub use base::{
    AudioChannel, AudioCodec, AudioFrame, ChannelError, ChannelErrorCallback,
    ChannelNotifyCallback, ChannelResult, IncomingAudioCallback, IncomingSignalCallback,
    ReceivedAudio,
};
pub(crate) use base::CallbackSlots;
pub use rtc::RtcChannel;
pub use session::{SessionPhase, SessionState, SessionStateMachine};
