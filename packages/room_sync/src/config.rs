use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::{self, ReconnectPolicy};
use crate::types::RoomId;

// =============================================================================
// File config (figment-deserialized from defaults / TOML file / env vars)
// =============================================================================
//
//   room-sync.toml:   api_base = "https://sim.example.com"
//                     [reconnect]
//                     max_retries = 5
//
//   env var:          ROOM_SYNC_RECONNECT__MAX_RETRIES=5   (double underscore = nesting)

pub const DEFAULT_API_BASE: &str = "http://localhost:8484";
pub const ENV_PREFIX: &str = "ROOM_SYNC_";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    /// Origin of the REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Explicit origin for live event streams. Derived from `api_base` when unset.
    #[serde(default)]
    pub ws_base: Option<String>,
    /// Messages requested by the one-shot history load on mount.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_base: None,
            history_page_size: default_history_page_size(),
            reconnect: ReconnectFileConfig::default(),
        }
    }
}

/// Reconnect tunables (lives under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_history_page_size() -> u32 {
    500
}
fn default_max_retries() -> u32 {
    backoff::DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    backoff::DEFAULT_BASE_DELAY.as_millis() as u64
}
fn default_max_delay_ms() -> u64 {
    backoff::DEFAULT_MAX_DELAY.as_millis() as u64
}

/// Build a figment that layers: defaults → TOML file (if given) → ROOM_SYNC_* env vars.
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// REST and live-stream origins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    api_base: String,
    ws_base: String,
}

impl Endpoints {
    /// Without an explicit `ws_base`, the API origin's scheme is mapped
    /// `http` → `ws` (and so `https` → `wss`).
    pub fn new(api_base: &str, ws_base: Option<&str>) -> Self {
        let api_base = api_base.trim_end_matches('/').to_string();
        let ws_base = match ws_base.filter(|s| !s.is_empty()) {
            Some(explicit) => explicit.trim_end_matches('/').to_string(),
            None => match api_base.strip_prefix("http") {
                Some(rest) => format!("ws{rest}"),
                None => api_base.clone(),
            },
        };
        Self { api_base, ws_base }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn ws_base(&self) -> &str {
        &self.ws_base
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub fn ws_url(&self, room_id: &RoomId) -> String {
        format!("{}/ws/{}", self.ws_base, room_id)
    }
}

/// Resolved client configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub history_page_size: u32,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            endpoints: Endpoints::new(&fc.api_base, fc.ws_base.as_deref()),
            history_page_size: fc.history_page_size.max(1),
            reconnect: ReconnectPolicy {
                max_retries: fc.reconnect.max_retries,
                base_delay: Duration::from_millis(fc.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(fc.reconnect.max_delay_ms),
                factor: backoff::DEFAULT_FACTOR,
            },
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
