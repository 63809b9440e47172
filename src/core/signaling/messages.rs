//! Signaling payload types and their JSON decoders.
//!
//! Subtitle payload (`subv`):
//!
//! ```json
//! {
//!   "type": "subtitle",
//!   "data": [
//!     { "definite": false, "language": "zh", "paragraph": false,
//!       "sequence": 0, "text": "...", "userId": "voiceChat_xxx" }
//!   ]
//! }
//! ```
//!
//! Function-call payload (`tool`):
//!
//! ```json
//! {
//!   "subscriber_user_id": "",
//!   "tool_calls": [
//!     { "id": "call_xxx", "type": "function",
//!       "function": { "name": "get_current_weather", "arguments": "{\"location\": \"...\"}" } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::{self, SignalTag};
use crate::core::channel::ChannelResult;

/// One subtitle line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleEvent {
    /// Speaking user
    pub speaker_id: String,
    /// Subtitle text
    pub text: String,
    /// Whether the recogniser considers the text final
    pub is_final: bool,
    /// Sequence number within the utterance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Recognised language
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Whether the line closes a paragraph
    #[serde(default)]
    pub paragraph: bool,
}

impl SubtitleEvent {
    fn from_item(item: &Value) -> Option<Self> {
        let speaker_id = item.get("userId")?.as_str()?;
        let text = item.get("text")?.as_str()?;

        Some(Self {
            speaker_id: speaker_id.to_string(),
            text: text.to_string(),
            is_final: item
                .get("definite")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            sequence: item.get("sequence").and_then(Value::as_u64),
            language: item
                .get("language")
                .and_then(Value::as_str)
                .map(str::to_string),
            paragraph: item
                .get("paragraph")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Function-call request issued by the remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Call identifier echoed back in the reply
    pub call_id: String,
    /// Requested function
    pub function_name: String,
    /// Arguments as a JSON document
    pub arguments_json: String,
}

impl FunctionCallRequest {
    fn from_item(item: &Value) -> Option<Self> {
        let call_id = item.get("id")?.as_str()?;
        let function = item.get("function")?.as_object()?;
        let name = function.get("name")?.as_str()?;
        let arguments = match function.get("arguments")? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Some(Self {
            call_id: call_id.to_string(),
            function_name: name.to_string(),
            arguments_json: arguments,
        })
    }

    /// Parse the arguments document.
    pub fn arguments(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.arguments_json)
    }
}

/// Reply to a function call, carried in a `func` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReply {
    /// Identifier of the call being answered
    #[serde(rename = "ToolCallID")]
    pub tool_call_id: String,
    /// Function output handed to the agent
    #[serde(rename = "Content")]
    pub content: String,
}

impl FunctionReply {
    /// Create a reply.
    pub fn new(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    /// Frame the reply as a `func` envelope.
    pub fn encode(&self) -> ChannelResult<Vec<u8>> {
        let body = serde_json::to_vec(self).map_err(|e| {
            crate::core::channel::ChannelError::SendFailed(format!(
                "failed to serialize function reply: {e}"
            ))
        })?;
        envelope::encode(SignalTag::FunctionReply, &body)
    }
}

/// Normalised signaling event delivered to the Application.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// Subtitle line
    Subtitle(SubtitleEvent),
    /// Function-call request
    FunctionCall(FunctionCallRequest),
    /// Other JSON control message (websocket fallback)
    Message(Value),
}

/// Decode a subtitle payload.
///
/// Elements missing `userId` or `text` are skipped; the rest keep array order.
pub fn parse_subtitles(root: &Value) -> Vec<SubtitleEvent> {
    match root.get("type").and_then(Value::as_str) {
        Some("subtitle") => {}
        other => {
            tracing::debug!("Ignoring subv payload with type {:?}", other);
            return Vec::new();
        }
    }

    let Some(items) = root.get("data").and_then(Value::as_array) else {
        tracing::debug!("Subtitle payload has no data array");
        return Vec::new();
    };

    items.iter().filter_map(SubtitleEvent::from_item).collect()
}

/// Decode a function-call payload.
///
/// Elements missing `id`, `function.name` or `function.arguments` are skipped.
pub fn parse_function_calls(root: &Value) -> Vec<FunctionCallRequest> {
    let Some(calls) = root.get("tool_calls").and_then(Value::as_array) else {
        tracing::debug!("Function-call payload has no tool_calls array");
        return Vec::new();
    };

    calls
        .iter()
        .filter_map(|call| {
            let parsed = FunctionCallRequest::from_item(call);
            if parsed.is_none() {
                tracing::debug!("Skipping incomplete tool call: {}", call);
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subtitles_skip_incomplete_items() {
        let root = json!({
            "type": "subtitle",
            "data": [
                {"userId": "u1", "text": "hello", "definite": true, "sequence": 3, "language": "en"},
                {"userId": "u2"},
                {"text": "orphan"},
                {"userId": "u3", "text": 42},
                {"userId": "u4", "text": "world", "paragraph": true}
            ]
        });

        let events = parse_subtitles(&root);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].speaker_id, "u1");
        assert!(events[0].is_final);
        assert_eq!(events[0].sequence, Some(3));
        assert_eq!(events[0].language.as_deref(), Some("en"));
        assert_eq!(events[1].speaker_id, "u4");
        assert!(!events[1].is_final);
        assert!(events[1].paragraph);
    }

    #[test]
    fn test_subtitles_require_type() {
        let root = json!({"type": "other", "data": [{"userId": "u1", "text": "hi"}]});
        assert!(parse_subtitles(&root).is_empty());

        let root = json!({"data": [{"userId": "u1", "text": "hi"}]});
        assert!(parse_subtitles(&root).is_empty());
    }

    #[test]
    fn test_function_calls_string_and_object_arguments() {
        let root = json!({
            "subscriber_user_id": "",
            "tool_calls": [
                {"id": "c1", "type": "function",
                 "function": {"name": "get_current_weather", "arguments": "{\"location\": \"Beijing\"}"}},
                {"id": "c2", "function": {"name": "set_volume", "arguments": {"level": 5}}},
                {"id": "c3", "function": {"name": "no_args"}},
                {"function": {"name": "no_id", "arguments": "{}"}}
            ]
        });

        let calls = parse_function_calls(&root);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_id, "c1");
        assert_eq!(calls[0].function_name, "get_current_weather");
        assert_eq!(calls[0].arguments().unwrap()["location"], "Beijing");
        assert_eq!(calls[1].arguments_json, "{\"level\":5}");
    }

    #[test]
    fn test_function_reply_wire_shape() {
        let framed = FunctionReply::new("c1", "sunny").encode().unwrap();

        assert_eq!(&framed[..4], b"func");
        let len = u32::from_be_bytes([framed[4], framed[5], framed[6], framed[7]]) as usize;
        assert_eq!(len, framed.len() - 8);

        let body: Value = serde_json::from_slice(&framed[8..]).unwrap();
        assert_eq!(body, json!({"ToolCallID": "c1", "Content": "sunny"}));
    }
}
