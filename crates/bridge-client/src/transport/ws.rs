//! WebSocket transport
//!
//! The stream is split after the handshake. Writes go through an unbounded
//! channel to a sender task so [`Transport::send`] never blocks the
//! dispatcher; reads stay on the transport and are polled by the manager.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use super::{Connector, Transport};
use crate::error::{BridgeError, BridgeResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket sessions to the gateway
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> BridgeResult<Box<dyn Transport>> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::transport(format!("WebSocket connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(sender_task(write, rx));

        Ok(Box::new(WebSocketTransport { tx: Some(tx), read }))
    }
}

async fn sender_task(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write.send(msg).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
    }
    let _ = write.close().await;
    debug!("WebSocket sender task terminated");
}

struct WebSocketTransport {
    tx: Option<mpsc::UnboundedSender<Message>>,
    read: SplitStream<WsStream>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn send(&mut self, text: String) -> BridgeResult<()> {
        let tx = self.tx.as_ref().ok_or_else(|| BridgeError::transport("session closed"))?;
        tx.send(Message::Text(text.into()))
            .map_err(|_| BridgeError::transport("WebSocket writer has stopped"))
    }

    async fn recv(&mut self) -> Option<BridgeResult<String>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    return None;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Ignoring binary frame of {} bytes", data.len());
                }
                // Ping/pong is answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(BridgeError::transport(e.to_string()))),
                None => return None,
            }
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Close(None));
        }
    }
}
