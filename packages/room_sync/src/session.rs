//! Room mount/unmount lifecycle.
//!
//! Mounting a room seeds the store from the room summary, opens a live
//! session that writes into the store, and loads one page of history in the
//! background. Unmounting stops both and resets the room's store entries.
//! History and live messages may land in either order; the store merges them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, HistorySource};
use crate::config::ClientConfig;
use crate::store::RoomStore;
use crate::sync::{ConnectionPhase, SessionHandle, StoreHandlers, Synchronizer};
use crate::transport::{Connector, WsConnector};
use crate::types::{RoomId, RoomSummary};

/// Outcome of the one-shot history load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    Pending,
    Loaded { count: usize, total: u64 },
    /// The room keeps running on live messages only.
    Failed(String),
}

/// Everything a mount needs. Cheap to clone.
pub struct SessionContext<C: Connector = WsConnector> {
    store: Arc<RoomStore>,
    synchronizer: Synchronizer<C>,
    history: Arc<dyn HistorySource>,
    history_page_size: u32,
}

impl<C: Connector> Clone for SessionContext<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            synchronizer: self.synchronizer.clone(),
            history: self.history.clone(),
            history_page_size: self.history_page_size,
        }
    }
}

impl SessionContext<WsConnector> {
    /// WebSocket live sessions and REST history, both from `config`.
    pub fn from_config(config: &ClientConfig, store: Arc<RoomStore>) -> Self {
        Self::new(
            store,
            Synchronizer::new(config.endpoints.clone(), config.reconnect.clone()),
            Arc::new(ApiClient::new(config.endpoints.clone())),
            config.history_page_size,
        )
    }
}

impl<C: Connector> SessionContext<C> {
    pub fn new(
        store: Arc<RoomStore>,
        synchronizer: Synchronizer<C>,
        history: Arc<dyn HistorySource>,
        history_page_size: u32,
    ) -> Self {
        Self {
            store,
            synchronizer,
            history,
            history_page_size: history_page_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    /// Shorthand for [`RoomSession::mount`].
    pub fn mount(&self, summary: &RoomSummary) -> RoomSession {
        RoomSession::mount(self, summary)
    }
}

/// A mounted room. Dropping it unmounts.
pub struct RoomSession {
    room_id: RoomId,
    store: Arc<RoomStore>,
    live: SessionHandle,
    history_task: JoinHandle<()>,
    history: watch::Receiver<HistoryState>,
    /// Cleared under lock on unmount; the history writer checks it under the same lock.
    mounted: Arc<Mutex<bool>>,
}

impl RoomSession {
    /// Mount `summary`'s room. Must be called from within a tokio runtime.
    pub fn mount<C: Connector>(ctx: &SessionContext<C>, summary: &RoomSummary) -> Self {
        let room_id = summary.id.clone();
        let turns = summary.turns();
        ctx.store.set_status(&room_id, summary.status);
        ctx.store.set_turn_info(&room_id, turns.current, turns.max);

        let live = ctx.synchronizer.connect(
            room_id.clone(),
            StoreHandlers::new(ctx.store.clone(), room_id.clone()),
        );

        let mounted = Arc::new(Mutex::new(true));
        let (history_tx, history_rx) = watch::channel(HistoryState::Pending);
        let history_task = tokio::spawn(load_history(
            ctx.history.clone(),
            ctx.store.clone(),
            room_id.clone(),
            ctx.history_page_size,
            mounted.clone(),
            history_tx,
        ));

        info!(room = %room_id, status = %summary.status, "room mounted");
        RoomSession {
            room_id,
            store: ctx.store.clone(),
            live,
            history_task,
            history: history_rx,
            mounted,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.live.connected()
    }

    pub fn is_connected(&self) -> bool {
        self.live.is_connected()
    }

    pub fn phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.live.phase()
    }

    pub fn history(&self) -> watch::Receiver<HistoryState> {
        self.history.clone()
    }

    pub fn is_mounted(&self) -> bool {
        *self.mounted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tear down the live session, drop a pending history load and reset the
    /// room in the store. Later calls do nothing.
    pub fn unmount(&mut self) {
        {
            let mut mounted = self.mounted.lock().unwrap_or_else(PoisonError::into_inner);
            if !*mounted {
                return;
            }
            *mounted = false;
        }
        self.live.teardown();
        self.history_task.abort();
        self.store.clear_room(&self.room_id);
        info!(room = %self.room_id, "room unmounted");
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn load_history(
    source: Arc<dyn HistorySource>,
    store: Arc<RoomStore>,
    room_id: RoomId,
    limit: u32,
    mounted: Arc<Mutex<bool>>,
    state: watch::Sender<HistoryState>,
) {
    let result = source.load_history(&room_id, limit).await;

    let mounted = mounted.lock().unwrap_or_else(PoisonError::into_inner);
    if !*mounted {
        debug!(room = %room_id, "history arrived after unmount, discarded");
        return;
    }
    match result {
        Ok(page) => {
            let count = page.messages.len();
            store.merge_history(&room_id, page.messages);
            debug!(room = %room_id, count, total = page.total, "history merged");
            state.send_replace(HistoryState::Loaded {
                count,
                total: page.total,
            });
        }
        Err(e) => {
            warn!(
                room = %room_id,
                error = %e,
                "history load failed, continuing with live messages"
            );
            state.send_replace(HistoryState::Failed(e.to_string()));
        }
    }
}
