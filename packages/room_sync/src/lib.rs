//! Room Sync - live session synchronization for simulation rooms
//!
//! Mirrors the state of server-side conversation rooms into a process-wide
//! [`RoomStore`]. A mounted room gets one live WebSocket session (reconnecting
//! with capped exponential backoff) plus a one-shot history load; readers
//! subscribe to per-room change notifications.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use room_sync::{ApiClient, ClientConfig, RoomId, RoomStore, SessionContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), room_sync::ApiError> {
//!     let config = ClientConfig::default();
//!     let api = ApiClient::new(config.endpoints.clone());
//!     let store = Arc::new(RoomStore::new());
//!     let ctx = SessionContext::from_config(&config, store.clone());
//!
//!     let room = RoomId::from("room-1");
//!     let summary = api.get_room(&room).await?;
//!     let mut session = ctx.mount(&summary);
//!
//!     let mut changes = store.subscribe(&room);
//!     while changes.recv().await.is_ok() {
//!         println!("{} messages", store.message_count(&room));
//!     }
//!
//!     session.unmount();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backoff;
pub mod config;
mod error;
pub mod event;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;
mod types;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ControlAck, ControlAction, HistorySource};
pub use backoff::ReconnectPolicy;
pub use config::{ClientConfig, Endpoints, FileConfig, load_config};
pub use error::{ApiError, EventError, TransportError};
pub use event::RoomEvent;
pub use session::{HistoryState, RoomSession, SessionContext};
pub use store::{RoomChange, RoomSnapshot, RoomStore};
pub use sync::{ConnectionPhase, RoomEventHandler, SessionHandle, StoreHandlers, Synchronizer};
pub use transport::{Connector, FrameStream, WsConnector};
pub use types::{
    Message, MessagePage, RoomId, RoomStatus, RoomSummary, SimulationStatus, TurnCounters,
    TypingAgent,
};
