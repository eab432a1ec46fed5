//! Live event transport.
//!
//! A [`Connector`] opens one text-frame stream per call. The stream ends when
//! the server closes the connection; an `Err` item means the connection broke.

use std::sync::Once;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tracing::debug;

use crate::error::TransportError;

/// Inbound text frames from one live connection.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

pub trait Connector: Send + Sync + 'static {
    /// Establish a connection. Resolves once the handshake completes.
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<FrameStream, TransportError>>;
}

/// WebSocket transport over `tokio-tungstenite`. `wss://` uses rustls with
/// the webpki root set.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

/// rustls needs a process-wide crypto provider before the first TLS handshake.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
        let url = url.to_string();
        install_crypto_provider();
        async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(TransportError::from_tungstenite)?;

            // The write half is unused: the server never expects client frames.
            // Pings are answered by tungstenite while the stream is polled.
            let frames = ws_stream
                .take_while(|msg| {
                    let open = !matches!(msg, Ok(tungstenite::Message::Close(_)));
                    futures::future::ready(open)
                })
                .filter_map(|msg| {
                    let item = match msg {
                        Ok(tungstenite::Message::Text(text)) => Some(Ok(text.to_string())),
                        Ok(tungstenite::Message::Binary(data)) => {
                            match String::from_utf8(data.to_vec()) {
                                Ok(text) => Some(Ok(text)),
                                Err(_) => {
                                    debug!(len = data.len(), "dropping non-UTF-8 binary frame");
                                    None
                                }
                            }
                        }
                        Ok(_) => None,
                        Err(tungstenite::Error::ConnectionClosed) => None,
                        Err(e) => Some(Err(TransportError::Dropped(e.to_string()))),
                    };
                    futures::future::ready(item)
                });

            Ok(frames.boxed())
        }
        .boxed()
    }
}
