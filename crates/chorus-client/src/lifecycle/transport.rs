//! Transport seam: the driver talks to the server through these traits so
//! tests can swap in an in-memory link.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::errors::TransportError;

/// Something received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// The transport ended. `code` is the close code if a close frame
    /// arrived.
    Closed { code: Option<u16>, reason: String },
}

/// One open connection.
#[async_trait]
pub trait TransportLink: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound item. After `Closed` the link is dead.
    async fn recv(&mut self) -> Inbound;

    async fn close(&mut self);
}

/// Opens links to a server URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError>;
}

/// WebSocket connector over tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(WsLink { ws }))
    }
}

struct WsLink {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Inbound {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return Inbound::Text(text.to_string()),
                Some(Ok(WsMessage::Close(frame))) => {
                    return match frame {
                        Some(frame) => Inbound::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.to_string(),
                        },
                        None => Inbound::Closed {
                            code: None,
                            reason: "closed without frame".into(),
                        },
                    };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket error");
                    return Inbound::Closed {
                        code: None,
                        reason: e.to_string(),
                    };
                }
                None => {
                    return Inbound::Closed {
                        code: None,
                        reason: "stream ended".into(),
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
