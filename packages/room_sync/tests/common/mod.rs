//! In-process fake of the simulation backend: REST routes plus the per-room
//! live event WebSocket.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use room_sync::{ClientConfig, Endpoints, ReconnectPolicy};

/// Pushed to every live connection of a room.
#[derive(Clone, Debug)]
pub enum Push {
    Text(String),
    /// Server-initiated close.
    Close,
}

#[derive(Default)]
pub struct BackendState {
    rooms: Mutex<HashMap<String, Value>>,
    history: Mutex<HashMap<String, Vec<Value>>>,
    history_delay: Mutex<Duration>,
    /// `(status, body)` returned by every simulation POST when set.
    control_failure: Mutex<Option<(StatusCode, String)>>,
    /// `"METHOD path"` of every REST request, plus query/body where relevant.
    requests: Mutex<Vec<String>>,
    live: Mutex<HashMap<String, broadcast::Sender<Push>>>,
    ws_connections: AtomicUsize,
}

impl BackendState {
    fn record(&self, line: String) {
        self.requests.lock().unwrap().push(line);
    }

    fn channel(&self, room: &str) -> broadcast::Sender<Push> {
        self.live
            .lock()
            .unwrap()
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

pub struct FakeBackend {
    pub addr: SocketAddr,
    pub state: Arc<BackendState>,
    task: JoinHandle<()>,
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/api/rooms/{room_id}", get(get_room))
            .route("/api/messages/{room_id}", get(list_messages))
            .route("/api/simulation/{room_id}/status", get(simulation_status))
            .route("/api/simulation/{room_id}/{action}", post(simulation_action))
            .route("/ws/{room_id}", get(live_events))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointed at this backend, with short reconnect delays.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoints: Endpoints::new(&self.api_base(), None),
            history_page_size: 500,
            reconnect: ReconnectPolicy {
                max_retries: 5,
                base_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(100),
                factor: 2,
            },
        }
    }

    pub fn add_room(&self, id: &str, status: &str, current_turn: u32, max_turns: u32) {
        self.state.rooms.lock().unwrap().insert(
            id.to_string(),
            json!({
                "id": id,
                "name": format!("Room {id}"),
                "description": "",
                "status": status,
                "current_turn_index": current_turn,
                "max_turns": max_turns,
                "created_at": "2025-03-01T09:00:00.000000",
            }),
        );
    }

    pub fn set_history(&self, room: &str, messages: Vec<Value>) {
        self.state
            .history
            .lock()
            .unwrap()
            .insert(room.to_string(), messages);
    }

    pub fn delay_history(&self, delay: Duration) {
        *self.state.history_delay.lock().unwrap() = delay;
    }

    pub fn fail_controls(&self, status: StatusCode, body: &str) {
        *self.state.control_failure.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    /// Send a raw frame to the room's live connections; returns how many got it.
    pub fn push_frame(&self, room: &str, text: &str) -> usize {
        self.state
            .channel(room)
            .send(Push::Text(text.to_string()))
            .unwrap_or(0)
    }

    pub fn push_event(&self, room: &str, event: Value) -> usize {
        self.push_frame(room, &event.to_string())
    }

    pub fn close_live(&self, room: &str) -> usize {
        self.state.channel(room).send(Push::Close).unwrap_or(0)
    }
}

/// A message as the backend serializes it (naive timestamp, no offset).
pub fn message_json(id: &str, room: &str, turn: u32, content: &str) -> Value {
    json!({
        "id": id,
        "room_id": room,
        "agent_id": "agent-1",
        "role": "assistant",
        "content": content,
        "turn_number": turn,
        "created_at": format!("2025-03-01T10:00:{:02}.123456", turn % 60),
        "agent_name": "Socrates",
        "agent_avatar_id": null,
    })
}

pub fn message_event(id: &str, room: &str, turn: u32) -> Value {
    json!({ "type": "message", "message": message_json(id, room, turn, &format!("said {id}")) })
}

/// Poll `check` until it holds, failing after a few seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── handlers ────────────────────────────────────────────────────────────

async fn get_room(State(state): State<Arc<BackendState>>, Path(room_id): Path<String>) -> Response {
    state.record(format!("GET /api/rooms/{room_id}"));
    match state.rooms.lock().unwrap().get(&room_id) {
        Some(room) => Json(room.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "Room not found").into_response(),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn list_messages(
    State(state): State<Arc<BackendState>>,
    Path(room_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(100) as usize;
    let offset = query.offset.unwrap_or(0) as usize;
    state.record(format!(
        "GET /api/messages/{room_id}?limit={limit}&offset={offset}"
    ));

    let delay = *state.history_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let all = state
        .history
        .lock()
        .unwrap()
        .get(&room_id)
        .cloned()
        .unwrap_or_default();
    let page: Vec<Value> = all.iter().skip(offset).take(limit).cloned().collect();
    Json(json!({ "messages": page, "total": all.len() }))
}

async fn simulation_status(
    State(state): State<Arc<BackendState>>,
    Path(room_id): Path<String>,
) -> Response {
    state.record(format!("GET /api/simulation/{room_id}/status"));
    let rooms = state.rooms.lock().unwrap();
    match rooms.get(&room_id) {
        Some(room) => Json(json!({
            "room_id": room_id,
            "status": room["status"],
            "current_turn_index": room["current_turn_index"],
            "max_turns": room["max_turns"],
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "Room not found").into_response(),
    }
}

async fn simulation_action(
    State(state): State<Arc<BackendState>>,
    Path((room_id, action)): Path<(String, String)>,
    body: String,
) -> Response {
    if body.is_empty() {
        state.record(format!("POST /api/simulation/{room_id}/{action}"));
    } else {
        state.record(format!("POST /api/simulation/{room_id}/{action} {body}"));
    }

    if let Some((status, body)) = state.control_failure.lock().unwrap().clone() {
        return (status, body).into_response();
    }

    match action.as_str() {
        "start" => Json(json!({ "status": "started" })).into_response(),
        "pause" => Json(json!({ "status": "paused" })).into_response(),
        "resume" => Json(json!({ "status": "resumed" })).into_response(),
        "stop" => StatusCode::NO_CONTENT.into_response(),
        "inject" => Json(json!({ "status": "injected" })).into_response(),
        _ => (StatusCode::NOT_FOUND, "Unknown action").into_response(),
    }
}

async fn live_events(
    State(state): State<Arc<BackendState>>,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    // Subscribe before the upgrade completes so nothing pushed after the
    // client sees the connection open is missed.
    let rx = state.channel(&room_id).subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| pump(socket, rx))
}

async fn pump(socket: WebSocket, mut rx: broadcast::Receiver<Push>) {
    let (mut tx, mut incoming) = socket.split();
    loop {
        tokio::select! {
            push = rx.recv() => match push {
                Ok(Push::Text(text)) => {
                    if tx.send(WsMessage::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Push::Close) | Err(_) => {
                    let _ = tx.send(WsMessage::Close(None)).await;
                    return;
                }
            },
            msg = incoming.next() => match msg {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}
