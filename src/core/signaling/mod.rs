//! In-band signaling carried on the transport's generic message channel.
//!
//! - [`envelope`]: 8-byte header framing
//! - [`dispatcher`]: tag routing
//! - [`messages`]: subtitle and function-call payloads
//! - [`functions`]: named handlers that answer function calls

pub mod dispatcher;
pub mod envelope;
pub mod functions;
pub mod messages;

pub use dispatcher::{Dispatcher, SignalCollector, SignalHandler};
pub use envelope::{
    DEFAULT_MAX_ENVELOPE_BYTES, ENVELOPE_HEADER_LEN, LengthCheck, SignalEnvelope, SignalTag,
    TAG_FUNCTION_REPLY, TAG_SUBTITLE, TAG_TOOL_CALL, encode as encode_envelope,
};
pub use functions::{FunctionHandler, FunctionRegistry};
pub use messages::{
    FunctionCallRequest, FunctionReply, SignalEvent, SubtitleEvent, parse_function_calls,
    parse_subtitles,
};
