//! Transport seam between the connection manager and the network
//!
//! A connector opens one physical channel and hands back a pair of
//! queues. Dropping the outbound sender requests a graceful close; the
//! inbound receiver then yields `Closed` (or ends) once the peer is gone.

pub mod websocket;

use crate::error::Result;
use crate::protocol::Frame;
use tokio::sync::mpsc;

pub use websocket::WebSocketConnector;

/// Capacity of the per-transport frame queues
pub const TRANSPORT_QUEUE_CAPACITY: usize = 64;

/// Something that happened on an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Frame),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// An open physical channel
#[derive(Debug)]
pub struct Transport {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens transports to a service endpoint
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport>;

    /// Connector name for logging
    fn name(&self) -> &str;
}
