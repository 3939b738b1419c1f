//! Production streaming backend over WebSocket.

use crate::backend::{StreamConnector, StreamSession};
use crate::error::EnvError;
use crate::types::Endpoint;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Opens WebSocket sessions against `Endpoint::stream_url`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn StreamSession>, EnvError> {
        let (ws, _response) = tokio_tungstenite::connect_async(endpoint.stream_url.as_str())
            .await
            .map_err(|e| EnvError::connect(e.to_string()))?;
        tracing::debug!(url = %endpoint.stream_url, "websocket open");
        Ok(Box::new(WsSession { ws, closed: false }))
    }
}

struct WsSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl StreamSession for WsSession {
    async fn recv(&mut self) -> Option<Result<String, EnvError>> {
        if self.closed {
            return None;
        }
        while let Some(message) = self.ws.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| EnvError::protocol(format!("binary frame is not UTF-8: {}", e))),
                    );
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket closed by peer");
                    self.closed = true;
                    return None;
                }
                // ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(EnvError::ConnectionClosed(e.to_string()))),
            }
        }
        self.closed = true;
        None
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(error = %e, "websocket close handshake failed");
        }
    }
}
