//! WebSocket transport for remote terminals.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use remote_terminal_core::{
    Endpoint, Frame,
    traits::{ConnectionError, Connector, SendError, Transport, TransportEvent},
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{self, Message},
};

use crate::{fanout::EventFanout, protocol};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the close handshake during `disconnect`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connector dialing `ws://` endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, ConnectionError> {
        Ok(Arc::new(WsTransport::connect(endpoint).await?))
    }
}

/// A single WebSocket connection.
///
/// Outbound frames are serialized through a FIFO lock on the sink; a reader
/// task fans inbound binary messages out to subscribers. `disconnect` cancels
/// sends that are queued or blocked on a peer that stopped reading.
pub struct WsTransport {
    endpoint: Endpoint,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    events: Arc<EventFanout>,
    reader: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    /// Connect and complete the WebSocket handshake.
    ///
    /// # Errors
    /// Returns error if the TCP connect or the upgrade fails.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, ConnectionError> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| ConnectionError::Failed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(endpoint = %endpoint, "Terminal transport connected");

        let (sink, stream) = stream.split();
        let events = Arc::new(EventFanout::new());
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&events), endpoint.clone()));

        Ok(Self {
            endpoint: endpoint.clone(),
            sink: Mutex::new(Some(sink)),
            events,
            reader,
            shutdown: watch::Sender::new(false),
        })
    }

    /// The endpoint this transport is connected to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if self.events.is_closed() {
            return Err(SendError::Closed);
        }
        let stop = stopped(self.shutdown.subscribe());
        tokio::pin!(stop);

        let mut guard = tokio::select! {
            guard = self.sink.lock() => guard,
            () = &mut stop => return Err(SendError::Closed),
        };
        let sink = guard.as_mut().ok_or(SendError::Closed)?;
        tokio::select! {
            result = sink.send(Message::Binary(frame)) => result.map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    SendError::Closed
                }
                other => SendError::Failed(other.to_string()),
            }),
            () = &mut stop => Err(SendError::Closed),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        let first = self.events.close();
        self.shutdown.send_replace(true);
        self.reader.abort();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let handshake = async {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
            };
            if timeout(CLOSE_TIMEOUT, handshake).await.is_err() {
                tracing::debug!(endpoint = %self.endpoint, "Close handshake timed out");
            }
        }
        if first {
            tracing::info!(endpoint = %self.endpoint, "Terminal transport disconnected");
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Resolves once `disconnect` has been requested.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn classify(msg: Message) -> Option<Frame> {
    match msg {
        Message::Binary(data) => Some(protocol::classify_inbound(data)),
        Message::Close(_) => Some(Frame::Closed),
        Message::Text(text) => {
            tracing::debug!(len = text.len(), "Ignoring text frame from terminal server");
            None
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: Arc<EventFanout>, endpoint: Endpoint) {
    while let Some(msg) = stream.next().await {
        match msg.map(classify) {
            Ok(Some(Frame::RawOutput(data))) => events.publish(TransportEvent::Output(data)),
            Ok(Some(Frame::Closed)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "Terminal transport read failed");
                break;
            }
        }
    }
    if events.close() {
        tracing::info!(endpoint = %endpoint, "Terminal transport closed by remote");
    }
}
