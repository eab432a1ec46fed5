use tokio_tungstenite::tungstenite;

/// A frame that could not be decoded into a room event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures of the live event transport. Contained inside the synchronizer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection dropped: {0}")]
    Dropped(String),
}

impl TransportError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Handshake(err.to_string())
        }
    }
}

/// Failures of request/response calls to the backend API.
///
/// These are surfaced to the caller as-is; nothing in this crate retries them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("API error {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error(transparent)]
    Http(reqwest::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }

    /// HTTP status for server-side rejections, if any.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(err)
    }
}
