//! In-process transport backed by channels.
//!
//! Useful for embedding a terminal server in the same process and for
//! driving sessions in tests.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use remote_terminal_core::{
    Endpoint,
    traits::{ConnectionError, Connector, SendError, Transport, TransportEvent},
};
use tokio::sync::mpsc;

use crate::fanout::EventFanout;

/// Client side of an in-process connection.
pub struct ChannelTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    events: Arc<EventFanout>,
}

impl ChannelTransport {
    /// Create a connected transport and the remote end that serves it.
    #[must_use]
    pub fn pair() -> (Self, RemoteEnd) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventFanout::new());

        let transport = Self {
            outbound: Mutex::new(Some(outbound_tx)),
            events: Arc::clone(&events),
        };
        let remote = RemoteEnd {
            frames: outbound_rx,
            events,
        };
        (transport, remote)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if self.events.is_closed() {
            return Err(SendError::Closed);
        }
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        outbound
            .as_ref()
            .ok_or(SendError::Closed)?
            .send(frame)
            .map_err(|_| SendError::Closed)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.events.close();
    }
}

/// Server side of an in-process connection.
///
/// Dropping it closes the connection.
pub struct RemoteEnd {
    frames: mpsc::UnboundedReceiver<Bytes>,
    events: Arc<EventFanout>,
}

impl RemoteEnd {
    /// Send raw output to the client.
    pub fn send_output(&self, data: impl Into<Bytes>) {
        self.events.publish(TransportEvent::Output(data.into()));
    }

    /// Close the connection from the remote side.
    pub fn close(&self) {
        self.events.close();
    }

    /// Whether either side has closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Receive the next frame sent by the client.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Receive a frame without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.frames.try_recv().ok()
    }

    /// Drain every frame sent so far.
    pub fn drain(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Drop for RemoteEnd {
    fn drop(&mut self) {
        self.events.close();
    }
}

/// Connector handing out in-process transports.
///
/// Every successful connect publishes its `RemoteEnd` on the channel
/// returned by [`ChannelConnector::new`].
pub struct ChannelConnector {
    remotes: mpsc::UnboundedSender<(Endpoint, RemoteEnd)>,
    connects: AtomicUsize,
    delay: Option<Duration>,
    fail_next: Mutex<Option<String>>,
}

impl ChannelConnector {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Endpoint, RemoteEnd)>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let connector = Self {
            remotes,
            connects: AtomicUsize::new(0),
            delay: None,
            fail_next: Mutex::new(None),
        };
        (connector, rx)
    }

    /// Delay every handshake.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make the next connect attempt fail.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Number of connect attempts so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reason) = failure {
            return Err(ConnectionError::Failed {
                endpoint: endpoint.to_string(),
                reason,
            });
        }

        let (transport, remote) = ChannelTransport::pair();
        // Nobody listening just means the remote end is dropped and closes.
        let _ = self.remotes.send((endpoint.clone(), remote));
        Ok(Arc::new(transport))
    }
}
