//! Wire decoding for inbound frames and encoding for outbound chat.
//!
//! Training channel frames are envelopes `{"type": "...", "payload": {...}}`.
//! Agent channel frames are bare chat-message objects, normalized loosely.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::StreamEvent;
use crate::types::{new_id, now_timestamp, AgentTip, ChatMessage, Sender, TrainingMetrics};

pub const ENVELOPE_METRICS: &str = "metrics";
pub const ENVELOPE_TIP: &str = "tip";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: &'static str, reason: String },
    #[error("chat frame is not a JSON object")]
    NotAnObject,
    #[error("chat frame has no string `content`")]
    MissingContent,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Decode one training-channel frame.
///
/// `Ok(None)` means a well-formed envelope of a type this client does not
/// consume; it is ignored rather than treated as an error.
pub fn decode_training_frame(text: &str) -> Result<Option<StreamEvent>, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.kind.as_str() {
        ENVELOPE_METRICS => {
            let metrics: TrainingMetrics =
                serde_json::from_value(envelope.payload).map_err(|e| DecodeError::Payload {
                    kind: ENVELOPE_METRICS,
                    reason: e.to_string(),
                })?;
            Ok(Some(StreamEvent::Metrics(metrics)))
        }
        ENVELOPE_TIP => {
            let tip: AgentTip =
                serde_json::from_value(envelope.payload).map_err(|e| DecodeError::Payload {
                    kind: ENVELOPE_TIP,
                    reason: e.to_string(),
                })?;
            Ok(Some(StreamEvent::Tip(tip)))
        }
        other => {
            tracing::debug!("ignoring training frame of type '{other}'");
            Ok(None)
        }
    }
}

/// Decode one agent-channel frame into a chat message.
///
/// `sender` is `user` only when the frame says exactly `"user"`; a missing or
/// empty `id` gets a fresh identifier and a missing `timestamp` gets the
/// current time.
pub fn decode_agent_frame(text: &str) -> Result<ChatMessage, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let content = object
        .get("content")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingContent)?
        .to_string();

    let sender = match object.get("sender").and_then(Value::as_str) {
        Some("user") => Sender::User,
        _ => Sender::Agent,
    };

    let id = scalar_to_string(object.get("id")).unwrap_or_else(new_id);
    let timestamp = scalar_to_string(object.get("timestamp")).unwrap_or_else(now_timestamp);

    Ok(ChatMessage {
        id,
        sender,
        content,
        timestamp,
    })
}

fn scalar_to_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct OutboundChat<'a> {
    content: &'a str,
}

/// Encode an outbound chat message as `{"content": "..."}`.
pub fn encode_chat(content: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundChat { content })
}
