//! Shared Room State Store
//!
//! Process-wide room state keyed by [`RoomId`]: message sequence, status,
//! typing indicator and turn counters. Many readers, few writers (the
//! synchronizer and the history loader). Every write is synchronous and total,
//! and only wakes subscribers of the room it touched.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{Message, RoomId, RoomStatus, TurnCounters, TypingAgent};

/// Per-room subscriber channel capacity. Lagged subscribers re-read a snapshot.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Which part of a room's state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomChange {
    Messages,
    Status,
    Typing,
    Turns,
    /// All four entries were reset.
    Cleared,
}

/// Point-in-time copy of one room's state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSnapshot {
    pub messages: Vec<Message>,
    pub status: RoomStatus,
    pub typing: Option<TypingAgent>,
    pub turns: TurnCounters,
}

#[derive(Default)]
struct RoomMaps {
    messages: HashMap<RoomId, Vec<Message>>,
    status: HashMap<RoomId, RoomStatus>,
    typing: HashMap<RoomId, Option<TypingAgent>>,
    turns: HashMap<RoomId, TurnCounters>,
}

#[derive(Default)]
pub struct RoomStore {
    maps: RwLock<RoomMaps>,
    watchers: Mutex<HashMap<RoomId, broadcast::Sender<RoomChange>>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── writes ──────────────────────────────────────────────────────────

    /// Append in arrival order and clear the room's typing indicator.
    /// Duplicates are not suppressed.
    pub fn add_message(&self, room_id: &RoomId, message: Message) {
        let had_typing = {
            let mut maps = self.write();
            maps.messages
                .entry(room_id.clone())
                .or_default()
                .push(message);
            maps.typing
                .insert(room_id.clone(), None)
                .flatten()
                .is_some()
        };
        self.notify(room_id, RoomChange::Messages);
        if had_typing {
            self.notify(room_id, RoomChange::Typing);
        }
    }

    /// Replace the room's message sequence wholesale.
    pub fn set_messages(&self, room_id: &RoomId, messages: Vec<Message>) {
        self.write().messages.insert(room_id.clone(), messages);
        self.notify(room_id, RoomChange::Messages);
    }

    /// Seed a history snapshot underneath whatever arrived live.
    ///
    /// The snapshot keeps its server order and comes first; messages already
    /// held whose id is not in the snapshot follow in arrival order. Repeated
    /// ids keep their first occurrence. The result is the same whether the
    /// snapshot lands before or after the live messages.
    pub fn merge_history(&self, room_id: &RoomId, history: Vec<Message>) {
        {
            let mut maps = self.write();
            let live = maps.messages.remove(room_id).unwrap_or_default();
            let mut seen = HashSet::with_capacity(history.len() + live.len());
            let mut merged = Vec::with_capacity(history.len() + live.len());
            for message in history.into_iter().chain(live) {
                if seen.insert(message.id.clone()) {
                    merged.push(message);
                }
            }
            trace!(room = %room_id, count = merged.len(), "merged history");
            maps.messages.insert(room_id.clone(), merged);
        }
        self.notify(room_id, RoomChange::Messages);
    }

    pub fn set_status(&self, room_id: &RoomId, status: RoomStatus) {
        self.write().status.insert(room_id.clone(), status);
        self.notify(room_id, RoomChange::Status);
    }

    pub fn set_typing(&self, room_id: &RoomId, typing: Option<TypingAgent>) {
        self.write().typing.insert(room_id.clone(), typing);
        self.notify(room_id, RoomChange::Typing);
    }

    /// Overwrite both counters together; never merges with the old pair.
    pub fn set_turn_info(&self, room_id: &RoomId, current: u32, max: u32) {
        self.write()
            .turns
            .insert(room_id.clone(), TurnCounters::new(current, max));
        self.notify(room_id, RoomChange::Turns);
    }

    /// Reset the room to empty messages, `idle`, no typing and 0/0 turns.
    pub fn clear_room(&self, room_id: &RoomId) {
        {
            let mut maps = self.write();
            maps.messages.insert(room_id.clone(), Vec::new());
            maps.status.insert(room_id.clone(), RoomStatus::Idle);
            maps.typing.insert(room_id.clone(), None);
            maps.turns.insert(room_id.clone(), TurnCounters::default());
        }
        self.notify(room_id, RoomChange::Cleared);
    }

    // ── reads ───────────────────────────────────────────────────────────

    pub fn messages(&self, room_id: &RoomId) -> Vec<Message> {
        self.read()
            .messages
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn message_count(&self, room_id: &RoomId) -> usize {
        self.read().messages.get(room_id).map_or(0, Vec::len)
    }

    pub fn status(&self, room_id: &RoomId) -> RoomStatus {
        self.read()
            .status
            .get(room_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn typing(&self, room_id: &RoomId) -> Option<TypingAgent> {
        self.read().typing.get(room_id).cloned().flatten()
    }

    pub fn turn_info(&self, room_id: &RoomId) -> TurnCounters {
        self.read().turns.get(room_id).copied().unwrap_or_default()
    }

    pub fn snapshot(&self, room_id: &RoomId) -> RoomSnapshot {
        let maps = self.read();
        RoomSnapshot {
            messages: maps.messages.get(room_id).cloned().unwrap_or_default(),
            status: maps.status.get(room_id).copied().unwrap_or_default(),
            typing: maps.typing.get(room_id).cloned().flatten(),
            turns: maps.turns.get(room_id).copied().unwrap_or_default(),
        }
    }

    // ── subscriptions ───────────────────────────────────────────────────

    /// Receive change notifications for one room only.
    pub fn subscribe(&self, room_id: &RoomId) -> broadcast::Receiver<RoomChange> {
        let mut watchers = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        watchers
            .entry(room_id.clone())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn notify(&self, room_id: &RoomId, change: RoomChange) {
        let mut watchers = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = watchers.get(room_id) {
            if tx.send(change).is_err() {
                // Every receiver is gone
                watchers.remove(room_id);
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RoomMaps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RoomMaps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }
}
