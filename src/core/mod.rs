pub mod channel;
pub mod fallback;
pub mod signaling;
pub mod transport;

pub use channel::{
    AudioChannel, AudioCodec, AudioFrame, ChannelError, ChannelErrorCallback,
    ChannelNotifyCallback, ChannelResult, IncomingAudioCallback, IncomingSignalCallback,
    ReceivedAudio, RtcChannel, SessionPhase, SessionState,
};
pub use fallback::WebSocketChannel;
pub use signaling::{
    Dispatcher, FunctionCallRequest, FunctionHandler, FunctionRegistry, FunctionReply,
    LengthCheck, SignalEvent, SignalTag, SubtitleEvent,
};
pub use transport::{
    EventSink, MessageReliability, RoomOptions, SessionHandle, Transport, TransportCode,
    TransportEvent,
};
