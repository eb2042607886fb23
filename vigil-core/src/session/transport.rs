//! Transport seam: a connector trait plus the WebSocket implementation.
//!
//! The session actor never touches tokio-tungstenite directly. A
//! [`Connector`] hands it a [`Transport`]: one bounded outbound channel
//! drained by a writer pump, one inbound channel fed by a reader pump, and
//! the pump task handles so teardown can abort them. Tests script the seam
//! with channel-backed transports and never open a socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::client::ClientConfig;
use crate::error::{Result, VigilError};

/// Inbound channel depth. Transport arrival outruns the actor only briefly;
/// the channel exerts backpressure on the reader pump, not on the socket.
const INBOUND_QUEUE: usize = 64;

/// An outbound frame toward the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// An inbound notification from the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Text(String),
    Binary(Vec<u8>),
    /// The link is gone — remote close, protocol error, or stream end.
    Closed(Option<String>),
}

/// A live transport: handles are owned by the session actor from hand-off
/// until teardown, and a fresh transport is created per connection attempt —
/// never reused across a close.
#[derive(Debug)]
pub struct Transport {
    pub outbound: mpsc::Sender<WireFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
    pub(crate) io_tasks: Vec<JoinHandle<()>>,
}

impl Transport {
    pub fn new(
        outbound: mpsc::Sender<WireFrame>,
        inbound: mpsc::Receiver<TransportEvent>,
        io_tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            io_tasks,
        }
    }

    /// Abort the pump tasks. Dropping the outbound sender afterwards lets
    /// the socket close from our side.
    pub fn abort_io(&self) {
        for task in &self.io_tasks {
            task.abort();
        }
    }
}

/// Dials the remote endpoint. The seam every test doubles.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &ClientConfig) -> Result<Transport>;
}

/// Production connector: WebSocket via tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, config: &ClientConfig) -> Result<Transport> {
        let url = match &config.api_key {
            Some(key) => format!("{}?key={}", config.endpoint, key),
            None => config.endpoint.clone(),
        };

        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| VigilError::Connect(e.to_string()))?;
        debug!(endpoint = %config.endpoint, "websocket handshake complete");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<WireFrame>(config.outbound_queue);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(INBOUND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match frame {
                    WireFrame::Text(text) => Message::Text(text),
                    WireFrame::Binary(bytes) => Message::Binary(bytes),
                };
                if sink.send(message).await.is_err() {
                    // The reader pump reports the close; just stop writing.
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx
                            .send(TransportEvent::Text(text.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if in_tx
                            .send(TransportEvent::Binary(bytes.to_vec()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = in_tx.send(TransportEvent::Closed(reason)).await;
                        return;
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(other)) => trace!(?other, "ignoring control frame"),
                    Some(Err(e)) => {
                        let _ = in_tx
                            .send(TransportEvent::Closed(Some(e.to_string())))
                            .await;
                        return;
                    }
                    None => {
                        let _ = in_tx.send(TransportEvent::Closed(None)).await;
                        return;
                    }
                }
            }
        });

        Ok(Transport::new(out_tx, in_rx, vec![writer, reader]))
    }
}
