use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque room identifier. All keyed state is partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A produced or injected conversation message. Never mutated after receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room_id: RoomId,
    /// Absent for user-injected messages.
    #[serde(default)]
    pub agent_id: Option<String>,
    pub role: String,
    pub content: String,
    pub turn_number: u32,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_avatar_id: Option<String>,
}

impl Message {
    pub fn is_injected(&self) -> bool {
        self.agent_id.is_none()
    }
}

/// Accepts RFC 3339 as well as the naive ISO-8601 form the simulation engine
/// emits (`2025-01-01T12:00:00.123456`), which is read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Simulation status of a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Idle => "idle",
            RoomStatus::Running => "running",
            RoomStatus::Paused => "paused",
            RoomStatus::Stopped => "stopped",
        }
    }

    /// Running or paused; injection is only meaningful in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, RoomStatus::Running | RoomStatus::Paused)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The agent currently producing the next message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingAgent {
    pub agent_id: String,
    pub agent_name: String,
}

/// Turn progress, always written as a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCounters {
    pub current: u32,
    pub max: u32,
}

impl TurnCounters {
    pub fn new(current: u32, max: u32) -> Self {
        Self { current, max }
    }
}

/// One page of message history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub room_id: RoomId,
    pub status: RoomStatus,
    pub current_turn_index: u32,
    pub max_turns: u32,
}

/// The slice of a room record needed to seed live state on mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub current_turn_index: u32,
    #[serde(default)]
    pub max_turns: u32,
}

impl RoomSummary {
    pub fn turns(&self) -> TurnCounters {
        TurnCounters::new(self.current_turn_index, self.max_turns)
    }
}
