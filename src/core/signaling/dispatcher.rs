//! Envelope dispatcher.
//!
//! Decodes one received message, parses its JSON payload and routes it to the
//! handler selected by the tag. Holds no state between calls.

use serde_json::Value;

use super::envelope::{DEFAULT_MAX_ENVELOPE_BYTES, LengthCheck, SignalEnvelope, SignalTag};
use super::messages::{SignalEvent, parse_function_calls, parse_subtitles};
use crate::core::channel::{ChannelError, ChannelResult};

/// Receives parsed payloads from the dispatcher.
pub trait SignalHandler {
    /// Called for a `subv` envelope.
    fn on_subtitle(&mut self, payload: &Value);

    /// Called for a `tool` envelope.
    fn on_function_call(&mut self, payload: &Value);
}

/// Default handler collecting normalised events.
#[derive(Debug, Default)]
pub struct SignalCollector {
    /// Events in arrival order
    pub events: Vec<SignalEvent>,
}

impl SignalHandler for SignalCollector {
    fn on_subtitle(&mut self, payload: &Value) {
        self.events
            .extend(parse_subtitles(payload).into_iter().map(SignalEvent::Subtitle));
    }

    fn on_function_call(&mut self, payload: &Value) {
        self.events.extend(
            parse_function_calls(payload)
                .into_iter()
                .map(SignalEvent::FunctionCall),
        );
    }
}

/// Routes envelopes to signal handlers.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    length_check: LengthCheck,
    max_envelope_bytes: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(LengthCheck::default(), DEFAULT_MAX_ENVELOPE_BYTES)
    }
}

impl Dispatcher {
    /// Create a dispatcher with the given length policy and size bound.
    pub fn new(length_check: LengthCheck, max_envelope_bytes: usize) -> Self {
        Self {
            length_check,
            max_envelope_bytes,
        }
    }

    /// Decode `raw` and invoke exactly one handler method.
    ///
    /// Returns the tag that was routed. Every error is logged here; callers
    /// only need the result to decide whether anything was delivered.
    pub fn dispatch<H: SignalHandler + ?Sized>(
        &self,
        raw: &[u8],
        is_binary: bool,
        handler: &mut H,
    ) -> ChannelResult<SignalTag> {
        let result = self.route(raw, is_binary, handler);
        if let Err(ref e) = result {
            match e {
                ChannelError::UnknownTag(_) => tracing::warn!("Dropping signaling message: {}", e),
                _ => tracing::error!("Dropping signaling message: {}", e),
            }
        }
        result
    }

    /// Decode `raw` with the default handlers and collect the events.
    pub fn decode(&self, raw: &[u8], is_binary: bool) -> ChannelResult<Vec<SignalEvent>> {
        let mut collector = SignalCollector::default();
        self.dispatch(raw, is_binary, &mut collector)?;
        Ok(collector.events)
    }

    fn route<H: SignalHandler + ?Sized>(
        &self,
        raw: &[u8],
        is_binary: bool,
        handler: &mut H,
    ) -> ChannelResult<SignalTag> {
        let envelope =
            SignalEnvelope::decode(raw, is_binary, self.length_check, self.max_envelope_bytes)?;

        let payload: Value = serde_json::from_slice(envelope.payload).map_err(|e| {
            ChannelError::MalformedEnvelope(format!(
                "invalid JSON in '{}' envelope: {e}",
                envelope.tag_str()
            ))
        })?;

        match envelope.signal_tag() {
            Some(SignalTag::Subtitle) => {
                handler.on_subtitle(&payload);
                Ok(SignalTag::Subtitle)
            }
            Some(SignalTag::ToolCall) => {
                handler.on_function_call(&payload);
                Ok(SignalTag::ToolCall)
            }
            // Replies are outbound only.
            Some(SignalTag::FunctionReply) | None => {
                Err(ChannelError::UnknownTag(envelope.tag_str()))
            }
        }
    }
}
