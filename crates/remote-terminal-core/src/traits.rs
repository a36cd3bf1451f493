//! Core traits for transports and display surfaces.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Dimensions, Endpoint};

/// Session identifier, unique per established connection.
pub type SessionId = Uuid;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Transport handshake still in flight.
    Connecting,
    /// Connected; `bound` is set once a surface target has been opened.
    Ready { bound: bool },
    /// Torn down, either locally or by the remote end.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The far end closed the connection.
    RemoteClosed,
    /// `destroy()` was called locally.
    Destroyed,
}

/// Inbound event delivered to transport subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw output bytes from the remote terminal.
    Output(Bytes),
    /// The connection has closed. Delivered exactly once per subscriber.
    Closed,
}

/// Connection error.
///
/// Cloneable so a single failed connect can be observed by every caller
/// awaiting the same pending session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Failed { endpoint: String, reason: String },
    #[error("Timed out connecting to {endpoint} after {timeout:?}")]
    TimedOut { endpoint: String, timeout: Duration },
    #[error("Connection attempt aborted: {0}")]
    Aborted(String),
}

/// Send error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Transport closed")]
    Closed,
    #[error("Send failed: {0}")]
    Failed(String),
}

/// A single bidirectional connection to a remote terminal.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an encoded frame.
    ///
    /// Frames are written in submission order. A failure is reported to the
    /// caller and does not close the connection.
    ///
    /// # Errors
    /// Returns `SendError::Closed` once the transport has been disconnected
    /// or closed remotely.
    async fn send(&self, frame: Bytes) -> Result<(), SendError>;

    /// Register a listener for inbound frames and closure.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);
}

/// Opens transports to resolved endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the handshake.
    ///
    /// # Errors
    /// Returns error if the endpoint cannot be reached or the handshake fails.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, ConnectionError>;
}

/// External component that renders output and captures input.
pub trait DisplaySurface: Send + Sync {
    /// Attach to a presentation target (a window, pane, or stream name).
    fn open(&self, target: &str);

    /// Recompute layout for the current target.
    fn fit(&self);

    /// Grant input focus.
    fn focus(&self);

    /// Proposed rows/cols, or `None` when the surface is not mounted.
    fn propose_dimensions(&self) -> Option<Dimensions>;

    /// Render raw output bytes.
    fn write(&self, data: &[u8]);

    /// Stream of typed input. Dropping the receiver cancels the subscription.
    fn on_input_data(&self) -> mpsc::UnboundedReceiver<String>;

    /// Release all resources.
    fn dispose(&self);
}

/// Creates one display surface per new session.
pub trait SurfaceFactory: Send + Sync {
    fn create(&self, project_id: &crate::ProjectId) -> Arc<dyn DisplaySurface>;
}
