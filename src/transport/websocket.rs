// WebSocket transport built on tokio-tungstenite

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Connector, Transport, TransportEvent, TRANSPORT_QUEUE_CAPACITY};
use crate::error::{Result, SessionError};
use crate::protocol::Frame;

/// Connector for `ws://` endpoints
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        info!("Opening WebSocket to {}", url);

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::transport(format!("failed to open {url}: {e}")))?;

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(TRANSPORT_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(TRANSPORT_QUEUE_CAPACITY);

        // Writer: drains outbound frames, closes the socket once the sender is dropped
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let message = match frame {
                    Frame::Text(text) => Message::Text(text),
                    Frame::Binary(bytes) => Message::Binary(bytes),
                };
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                debug!("WebSocket close handshake failed: {}", e);
            }
            debug!("WebSocket writer stopped");
        });

        // Reader: forwards frames until the socket closes or nobody is listening
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Frame(Frame::Text(text)),
                    Ok(Message::Binary(bytes)) => TransportEvent::Frame(Frame::Binary(bytes)),
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        let _ = inbound_tx.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    Ok(_) => continue, // ping/pong are answered by tungstenite
                    Err(e) => {
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if inbound_tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("WebSocket reader stopped");
        });

        Ok(Transport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
