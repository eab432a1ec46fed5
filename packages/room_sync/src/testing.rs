//! Shared test doubles.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::transport::{Connector, FrameStream};
use crate::types::{Message, RoomId};

pub(crate) fn make_message(id: &str, room: &str, turn: u32) -> Message {
    Message {
        id: id.to_string(),
        room_id: RoomId::from(room),
        agent_id: Some("agent-1".to_string()),
        role: "assistant".to_string(),
        content: format!("content of {id}"),
        turn_number: turn,
        created_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, turn).unwrap(),
        agent_name: Some("Bot".to_string()),
        agent_avatar_id: None,
    }
}

pub(crate) type FrameSender = mpsc::UnboundedSender<Result<String, TransportError>>;

pub(crate) enum Script {
    Fail,
    /// Handshake never completes.
    Hang,
    Live(mpsc::UnboundedReceiver<Result<String, TransportError>>),
}

/// Scripted connector: each `connect` pops the next script, failing once empty.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    pub(crate) attempts: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl MockConnector {
    pub(crate) fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub(crate) fn push_live(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Live(rx));
        tx
    }

    pub(crate) fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Offsets of each attempt from the first one.
    pub(crate) fn attempt_offsets(&self) -> Vec<Duration> {
        let attempts = self.attempts.lock().unwrap();
        let first = attempts[0].1;
        attempts.iter().map(|(_, at)| *at - first).collect()
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
        self.attempts
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Fail);
        async move {
            match script {
                Script::Fail => Err(TransportError::Unavailable),
                Script::Hang => futures::future::pending().await,
                Script::Live(rx) => {
                    let frames = futures::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|item| (item, rx))
                    });
                    Ok(frames.boxed())
                }
            }
        }
        .boxed()
    }
}
