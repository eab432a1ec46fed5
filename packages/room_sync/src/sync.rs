//! Session Synchronizer
//!
//! Keeps one live event stream per mounted room and feeds decoded events into
//! a [`RoomEventHandler`]. Two tasks per session:
//!
//! - the supervisor connects, reads frames, decodes them and pushes events
//!   onto a channel, reconnecting with capped exponential backoff;
//! - the dispatcher drains the channel into the handler.
//!
//! ## Phases
//!
//! ```text
//!             ┌──────────── drop / error ───────────┐
//!             ▼                                      │
//! Connecting ──ok──▶ Open ──drop──▶ RetryScheduled ──timer──▶ Connecting
//!     │                                   │
//!     └──fail──▶ RetryScheduled           └── failures == max ──▶ GivenUp
//!
//! any phase ── teardown ──▶ TornDown
//! ```
//!
//! Teardown is synchronous: it cancels the session token and waits for an
//! in-flight handler call to return, so no handler call starts afterwards.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::ReconnectPolicy;
use crate::config::Endpoints;
use crate::error::TransportError;
use crate::event::{self, RoomEvent};
use crate::store::RoomStore;
use crate::transport::{Connector, FrameStream, WsConnector};
use crate::types::{Message, RoomId, RoomStatus, TurnCounters, TypingAgent};

/// Buffered decoded events between the supervisor and the dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The callbacks a live session drives. Calls arrive in transport order.
///
/// Implementations must not tear down their own session from inside a call.
pub trait RoomEventHandler: Send + 'static {
    fn on_message(&mut self, message: Message);
    /// `turns` is present only when the event carried both counters.
    fn on_status(&mut self, status: RoomStatus, turns: Option<TurnCounters>);
    fn on_typing(&mut self, agent: TypingAgent);
}

/// Applies live events to a [`RoomStore`].
pub struct StoreHandlers {
    store: Arc<RoomStore>,
    room_id: RoomId,
}

impl StoreHandlers {
    pub fn new(store: Arc<RoomStore>, room_id: RoomId) -> Self {
        Self { store, room_id }
    }
}

impl RoomEventHandler for StoreHandlers {
    fn on_message(&mut self, message: Message) {
        self.store.add_message(&self.room_id, message);
    }

    fn on_status(&mut self, status: RoomStatus, turns: Option<TurnCounters>) {
        self.store.set_status(&self.room_id, status);
        if let Some(turns) = turns {
            self.store
                .set_turn_info(&self.room_id, turns.current, turns.max);
        }
    }

    fn on_typing(&mut self, agent: TypingAgent) {
        self.store.set_typing(&self.room_id, Some(agent));
    }
}

/// Lifecycle of one mounted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    /// Waiting `delay` before reconnecting after `attempt` consecutive failures.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Retries exhausted; stays here until the room is remounted.
    GivenUp,
    TornDown,
}

/// State shared between a handle and its tasks. The gate serializes phase
/// changes, handler calls and teardown.
struct Shared {
    gate: Mutex<()>,
    cancel: CancellationToken,
    phase: watch::Sender<ConnectionPhase>,
    connected: watch::Sender<bool>,
}

impl Shared {
    /// Move to `next` unless the session was torn down.
    fn transition(&self, next: ConnectionPhase) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return false;
        }
        let connected = next == ConnectionPhase::Open;
        self.phase.send_replace(next);
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        true
    }

    /// Run a handler call unless the session was torn down.
    fn deliver(&self, call: impl FnOnce()) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return false;
        }
        call();
        true
    }

    fn tear_down(&self) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        self.phase.send_replace(ConnectionPhase::TornDown);
        self.connected.send_replace(false);
        true
    }
}

/// Opens live sessions. Cheap to clone.
pub struct Synchronizer<C: Connector = WsConnector> {
    connector: Arc<C>,
    endpoints: Endpoints,
    policy: ReconnectPolicy,
}

impl<C: Connector> Clone for Synchronizer<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            endpoints: self.endpoints.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl Synchronizer<WsConnector> {
    pub fn new(endpoints: Endpoints, policy: ReconnectPolicy) -> Self {
        Self::with_connector(WsConnector, endpoints, policy)
    }
}

impl<C: Connector> Synchronizer<C> {
    pub fn with_connector(connector: C, endpoints: Endpoints, policy: ReconnectPolicy) -> Self {
        Self {
            connector: Arc::new(connector),
            endpoints,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start a live session for `room_id`.
    ///
    /// Each call opens its own connection; callers avoid duplicate sessions
    /// for the same room. Must be called from within a tokio runtime.
    pub fn connect<H: RoomEventHandler>(&self, room_id: RoomId, handlers: H) -> SessionHandle {
        let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Connecting);
        let (connected_tx, connected_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            gate: Mutex::new(()),
            cancel: CancellationToken::new(),
            phase: phase_tx,
            connected: connected_tx,
        });
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let supervisor = tokio::spawn(supervise(
            self.connector.clone(),
            self.endpoints.ws_url(&room_id),
            room_id.clone(),
            self.policy.clone(),
            shared.clone(),
            event_tx,
        ));
        let dispatcher = tokio::spawn(dispatch(
            room_id.clone(),
            event_rx,
            handlers,
            shared.clone(),
        ));

        SessionHandle {
            room_id,
            shared,
            phase: phase_rx,
            connected: connected_rx,
            tasks: vec![supervisor, dispatcher],
        }
    }
}

/// Owner of one live session. Dropping it tears the session down.
pub struct SessionHandle {
    room_id: RoomId,
    shared: Arc<Shared>,
    phase: watch::Receiver<ConnectionPhase>,
    connected: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Connection-state signal: true only while the stream is open.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.clone()
    }

    pub fn current_phase(&self) -> ConnectionPhase {
        self.phase.borrow().clone()
    }

    /// Cancel any pending retry, close the live connection and stop handler
    /// calls. Safe to call any number of times.
    pub fn teardown(&self) {
        if self.shared.tear_down() {
            debug!(room = %self.room_id, "live session torn down");
        }
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Wait for the session's tasks to exit.
    pub async fn join(mut self) {
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

enum ReadOutcome {
    Closed,
    Failed(TransportError),
    Cancelled,
}

async fn supervise<C: Connector>(
    connector: Arc<C>,
    url: String,
    room_id: RoomId,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    events: mpsc::Sender<RoomEvent>,
) {
    let cancel = shared.cancel.clone();
    let mut failures: u32 = 0;

    loop {
        if !shared.transition(ConnectionPhase::Connecting) {
            break;
        }
        debug!(room = %room_id, url = %url, attempt = failures, "connecting live session");

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connector.connect(&url) => result,
        };

        match attempt {
            Ok(mut frames) => {
                failures = 0;
                if !shared.transition(ConnectionPhase::Open) {
                    break;
                }
                info!(room = %room_id, "live session open");

                match read_frames(&room_id, &mut frames, &events, &cancel).await {
                    ReadOutcome::Cancelled => break,
                    ReadOutcome::Closed => info!(room = %room_id, "server closed live session"),
                    ReadOutcome::Failed(e) => {
                        warn!(room = %room_id, error = %e, "live session dropped")
                    }
                }
            }
            Err(e) => {
                warn!(room = %room_id, error = %e, "live session connect failed");
            }
        }

        failures += 1;
        if policy.should_give_up(failures) {
            warn!(
                room = %room_id,
                failures = failures,
                "giving up on live session until remount"
            );
            shared.transition(ConnectionPhase::GivenUp);
            break;
        }

        let delay = policy.delay_for(failures);
        if !shared.transition(ConnectionPhase::RetryScheduled {
            attempt: failures,
            delay,
        }) {
            break;
        }
        info!(
            room = %room_id,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            "reconnecting live session"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    trace!(room = %room_id, "supervisor exited");
}

async fn read_frames(
    room_id: &RoomId,
    frames: &mut FrameStream,
    events: &mpsc::Sender<RoomEvent>,
    cancel: &CancellationToken,
) -> ReadOutcome {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,
            next = frames.next() => next,
        };

        let text = match next {
            None => return ReadOutcome::Closed,
            Some(Err(e)) => return ReadOutcome::Failed(e),
            Some(Ok(text)) => text,
        };

        match event::decode(&text) {
            Ok(RoomEvent::Ignored(reason)) => {
                trace!(room = %room_id, reason = ?reason, "ignoring event");
            }
            Ok(RoomEvent::Error(message)) => {
                error!(room = %room_id, error = %message, "server reported simulation error");
            }
            Ok(event) => {
                if events.send(event).await.is_err() {
                    return ReadOutcome::Cancelled;
                }
            }
            Err(e) => {
                warn!(room = %room_id, error = %e, "dropping malformed event");
            }
        }
    }
}

async fn dispatch<H: RoomEventHandler>(
    room_id: RoomId,
    mut events: mpsc::Receiver<RoomEvent>,
    mut handlers: H,
    shared: Arc<Shared>,
) {
    let cancel = shared.cancel.clone();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let delivered = shared.deliver(|| match event {
            RoomEvent::Message(message) => handlers.on_message(message),
            RoomEvent::Status { status, turns } => handlers.on_status(status, turns),
            RoomEvent::Typing(agent) => handlers.on_typing(agent),
            RoomEvent::Error(_) | RoomEvent::Ignored(_) => {}
        });
        if !delivered {
            break;
        }
    }

    events.close();
    trace!(room = %room_id, "dispatcher exited");
}
