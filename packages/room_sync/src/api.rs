//! Request/response collaborators: message history, room lookup and
//! simulation control. Failures are returned to the caller unretried.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Endpoints;
use crate::error::ApiError;
use crate::types::{MessagePage, RoomId, RoomSummary, SimulationStatus};

/// Simulation control actions addressed by room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Stop => "stop",
        }
    }
}

/// Body of a successful control call, e.g. `{"status":"started"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAck {
    #[serde(default)]
    pub status: String,
}

#[derive(Serialize)]
struct InjectBody<'a> {
    content: &'a str,
}

/// Source of the one-shot history load performed on mount.
pub trait HistorySource: Send + Sync + 'static {
    fn load_history(
        &self,
        room_id: &RoomId,
        limit: u32,
    ) -> BoxFuture<'static, Result<MessagePage, ApiError>>;
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl ApiClient {
    pub fn new(endpoints: Endpoints) -> Self {
        Self::with_client(reqwest::Client::new(), endpoints)
    }

    pub fn with_client(http: reqwest::Client, endpoints: Endpoints) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// `GET /api/messages/{room}?limit=&offset=`
    pub async fn list_messages(
        &self,
        room_id: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage, ApiError> {
        let url = self.endpoints.api_url(&format!("/api/messages/{room_id}"));
        let resp = self
            .http
            .get(&url)
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        let page: MessagePage = read_json(resp).await?;
        debug!(
            room = %room_id,
            count = page.messages.len(),
            total = page.total,
            "loaded history page"
        );
        Ok(page)
    }

    /// `GET /api/rooms/{room}`
    pub async fn get_room(&self, room_id: &RoomId) -> Result<RoomSummary, ApiError> {
        let url = self.endpoints.api_url(&format!("/api/rooms/{room_id}"));
        let resp = self.http.get(&url).send().await?;
        read_json(resp).await
    }

    /// `GET /api/simulation/{room}/status`
    pub async fn simulation_status(&self, room_id: &RoomId) -> Result<SimulationStatus, ApiError> {
        let url = self
            .endpoints
            .api_url(&format!("/api/simulation/{room_id}/status"));
        let resp = self.http.get(&url).send().await?;
        read_json(resp).await
    }

    /// `POST /api/simulation/{room}/{action}`
    pub async fn control(
        &self,
        room_id: &RoomId,
        action: ControlAction,
    ) -> Result<ControlAck, ApiError> {
        let url = self
            .endpoints
            .api_url(&format!("/api/simulation/{room_id}/{}", action.as_str()));
        let resp = self.http.post(&url).send().await?;
        let ack = read_ack(resp).await?;
        debug!(
            room = %room_id,
            action = action.as_str(),
            status = %ack.status,
            "control action accepted"
        );
        Ok(ack)
    }

    pub async fn start(&self, room_id: &RoomId) -> Result<ControlAck, ApiError> {
        self.control(room_id, ControlAction::Start).await
    }

    pub async fn pause(&self, room_id: &RoomId) -> Result<ControlAck, ApiError> {
        self.control(room_id, ControlAction::Pause).await
    }

    pub async fn resume(&self, room_id: &RoomId) -> Result<ControlAck, ApiError> {
        self.control(room_id, ControlAction::Resume).await
    }

    pub async fn stop(&self, room_id: &RoomId) -> Result<ControlAck, ApiError> {
        self.control(room_id, ControlAction::Stop).await
    }

    /// `POST /api/simulation/{room}/inject` with `{"content": ...}`
    pub async fn inject(&self, room_id: &RoomId, content: &str) -> Result<ControlAck, ApiError> {
        let url = self
            .endpoints
            .api_url(&format!("/api/simulation/{room_id}/inject"));
        let resp = self
            .http
            .post(&url)
            .json(&InjectBody { content })
            .send()
            .await?;
        read_ack(resp).await
    }
}

impl HistorySource for ApiClient {
    fn load_history(
        &self,
        room_id: &RoomId,
        limit: u32,
    ) -> BoxFuture<'static, Result<MessagePage, ApiError>> {
        let client = self.clone();
        let room_id = room_id.clone();
        async move { client.list_messages(&room_id, limit, 0).await }.boxed()
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let resp = check_status(resp).await?;
    resp.json::<T>().await.map_err(ApiError::from_reqwest)
}

/// Control endpoints may answer 204 or an empty body.
async fn read_ack(resp: reqwest::Response) -> Result<ControlAck, ApiError> {
    let resp = check_status(resp).await?;
    if resp.status() == reqwest::StatusCode::NO_CONTENT {
        return Ok(ControlAck::default());
    }
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Ok(ControlAck::default());
    }
    Ok(parse_ack(&bytes))
}

/// The ack body is informational; an unexpected shape still counts as success.
fn parse_ack(bytes: &[u8]) -> ControlAck {
    match serde_json::from_slice(bytes) {
        Ok(ack) => ack,
        Err(e) => {
            debug!(
                error = %e,
                len = bytes.len(),
                "unreadable control ack body, treating as empty"
            );
            ControlAck::default()
        }
    }
}
