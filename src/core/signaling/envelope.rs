//! Binary envelope framing for the in-band signaling sub-protocol.
//!
//! Wire layout on the transport's generic message channel:
//!
//! ```text
//! +---------+---------------------+------------------------+
//! | tag (4) | length (u32, BE, 4) | UTF-8 JSON payload ... |
//! +---------+---------------------+------------------------+
//! ```
//!
//! Tags are fixed-width ASCII literals matched case-sensitively.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::channel::{ChannelError, ChannelResult};

/// Size of the tag plus length header.
pub const ENVELOPE_HEADER_LEN: usize = 8;

/// Default upper bound for a single envelope (64 KiB).
pub const DEFAULT_MAX_ENVELOPE_BYTES: usize = 64 * 1024;

/// Subtitle envelope tag.
pub const TAG_SUBTITLE: [u8; 4] = *b"subv";
/// Function-call request envelope tag.
pub const TAG_TOOL_CALL: [u8; 4] = *b"tool";
/// Function-call reply envelope tag.
pub const TAG_FUNCTION_REPLY: [u8; 4] = *b"func";

/// Known envelope tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTag {
    /// `subv`
    Subtitle,
    /// `tool`
    ToolCall,
    /// `func`
    FunctionReply,
}

impl SignalTag {
    /// Match a raw tag. Case-sensitive.
    pub fn from_bytes(tag: &[u8; 4]) -> Option<Self> {
        match tag {
            b"subv" => Some(SignalTag::Subtitle),
            b"tool" => Some(SignalTag::ToolCall),
            b"func" => Some(SignalTag::FunctionReply),
            _ => None,
        }
    }

    /// Raw wire bytes for this tag.
    pub fn as_bytes(&self) -> [u8; 4] {
        match self {
            SignalTag::Subtitle => TAG_SUBTITLE,
            SignalTag::ToolCall => TAG_TOOL_CALL,
            SignalTag::FunctionReply => TAG_FUNCTION_REPLY,
        }
    }
}

impl fmt::Display for SignalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalTag::Subtitle => write!(f, "subv"),
            SignalTag::ToolCall => write!(f, "tool"),
            SignalTag::FunctionReply => write!(f, "func"),
        }
    }
}

/// Which length is authoritative when the declared length and the delivered
/// size disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthCheck {
    /// Payload runs to the end of the delivered message; the header length is
    /// informational only.
    #[default]
    Envelope,
    /// Header length must equal the delivered payload size.
    Strict,
}

impl LengthCheck {
    /// Parse a policy name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "envelope" | "size" => Some(LengthCheck::Envelope),
            "strict" => Some(LengthCheck::Strict),
            _ => None,
        }
    }
}

/// One decoded envelope, borrowing the received bytes.
#[derive(Debug, Clone, Copy)]
pub struct SignalEnvelope<'a> {
    /// Raw four byte tag
    pub tag: [u8; 4],
    /// Length declared in the header
    pub declared_len: u32,
    /// Payload bytes after the header
    pub payload: &'a [u8],
    /// Whether the transport flagged the message as binary
    pub is_binary: bool,
}

impl<'a> SignalEnvelope<'a> {
    /// Split a received message into header and payload.
    ///
    /// Rejects messages of eight bytes or fewer, messages above `max_len`, and,
    /// under [`LengthCheck::Strict`], header lengths that disagree with the
    /// delivered size.
    pub fn decode(
        raw: &'a [u8],
        is_binary: bool,
        check: LengthCheck,
        max_len: usize,
    ) -> ChannelResult<Self> {
        if raw.len() <= ENVELOPE_HEADER_LEN {
            return Err(ChannelError::MalformedEnvelope(format!(
                "{} bytes is too short for an envelope",
                raw.len()
            )));
        }
        if raw.len() > max_len {
            return Err(ChannelError::MalformedEnvelope(format!(
                "{} bytes exceeds the {} byte limit",
                raw.len(),
                max_len
            )));
        }

        let tag = [raw[0], raw[1], raw[2], raw[3]];
        let declared_len = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let payload = &raw[ENVELOPE_HEADER_LEN..];

        if declared_len as usize != payload.len() {
            match check {
                LengthCheck::Strict => {
                    return Err(ChannelError::MalformedEnvelope(format!(
                        "declared length {} does not match payload size {}",
                        declared_len,
                        payload.len()
                    )));
                }
                LengthCheck::Envelope => {
                    tracing::debug!(
                        "Envelope declares {} payload bytes, received {}",
                        declared_len,
                        payload.len()
                    );
                }
            }
        }

        Ok(Self {
            tag,
            declared_len,
            payload,
            is_binary,
        })
    }

    /// Tag as printable text, for logs and errors.
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }

    /// The tag, when it is one of the known literals.
    pub fn signal_tag(&self) -> Option<SignalTag> {
        SignalTag::from_bytes(&self.tag)
    }
}

/// Frame a payload under `tag`.
pub fn encode(tag: SignalTag, payload: &[u8]) -> ChannelResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        ChannelError::SendFailed(format!("payload of {} bytes cannot be framed", payload.len()))
    })?;

    let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    buf.put_slice(&tag.as_bytes());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.to_vec())
}
