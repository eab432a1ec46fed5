//! Live event stream wire format.
//!
//! One JSON object per frame, discriminated by `type`:
//!
//! ```text
//! {"type":"message","message":{...}}
//! {"type":"status","status":"running","current_turn_index":3,"max_turns":20}
//! {"type":"typing","agent_id":"a1","agent_name":"Ada"}
//! {"type":"error","error":"model call failed"}
//! ```

use serde::Deserialize;

use crate::error::EventError;
use crate::types::{Message, RoomStatus, TurnCounters, TypingAgent};

/// A decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Message(Message),
    Status {
        status: RoomStatus,
        /// Present only when the frame carried both counters.
        turns: Option<TurnCounters>,
    },
    Typing(TypingAgent),
    /// Server-reported application error; informational only.
    Error(String),
    /// Well-formed frame with nothing to apply (unknown type, missing fields).
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownType(String),
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    status: Option<RoomStatus>,
    #[serde(default)]
    current_turn_index: Option<u32>,
    #[serde(default)]
    max_turns: Option<u32>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Decode one text frame.
///
/// Unparseable JSON and invalid field values are errors; anything that parses
/// but cannot be applied becomes [`RoomEvent::Ignored`].
pub fn decode(text: &str) -> Result<RoomEvent, EventError> {
    let wire: WireEvent = serde_json::from_str(text)?;

    let event = match wire.kind.as_str() {
        "message" => match wire.message {
            Some(message) => RoomEvent::Message(message),
            None => RoomEvent::Ignored(IgnoreReason::MissingField("message")),
        },
        "status" => match wire.status {
            Some(status) => {
                let turns = match (wire.current_turn_index, wire.max_turns) {
                    (Some(current), Some(max)) => Some(TurnCounters::new(current, max)),
                    _ => None,
                };
                RoomEvent::Status { status, turns }
            }
            None => RoomEvent::Ignored(IgnoreReason::MissingField("status")),
        },
        "typing" => match (wire.agent_id, wire.agent_name) {
            (Some(agent_id), Some(agent_name))
                if !agent_id.is_empty() && !agent_name.is_empty() =>
            {
                RoomEvent::Typing(TypingAgent {
                    agent_id,
                    agent_name,
                })
            }
            (None, _) => RoomEvent::Ignored(IgnoreReason::MissingField("agent_id")),
            (Some(id), _) if id.is_empty() => {
                RoomEvent::Ignored(IgnoreReason::MissingField("agent_id"))
            }
            _ => RoomEvent::Ignored(IgnoreReason::MissingField("agent_name")),
        },
        "error" => RoomEvent::Error(wire.error.unwrap_or_default()),
        other => RoomEvent::Ignored(IgnoreReason::UnknownType(other.to_string())),
    };

    Ok(event)
}
