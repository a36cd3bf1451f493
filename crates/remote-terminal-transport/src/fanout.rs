//! Subscriber fan-out shared by the transport implementations.

use std::sync::{Mutex, MutexGuard, PoisonError};

use remote_terminal_core::TransportEvent;
use tokio::sync::mpsc;

#[derive(Default)]
struct State {
    subscribers: Vec<mpsc::UnboundedSender<TransportEvent>>,
    /// Events received before anyone subscribed.
    backlog: Vec<TransportEvent>,
    has_subscribed: bool,
    closed: bool,
}

/// Delivers inbound events to every subscriber, in arrival order.
///
/// `Closed` is delivered exactly once per subscriber, including to those
/// that subscribe after the connection has already ended.
#[derive(Default)]
pub struct EventFanout {
    state: Mutex<State>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let first = !state.has_subscribed;
        if first {
            state.has_subscribed = true;
            // Includes `Closed` if the connection ended before this call.
            for event in state.backlog.drain(..) {
                let _ = tx.send(event);
            }
        }
        if !state.closed {
            state.subscribers.push(tx);
        } else if !first {
            let _ = tx.send(TransportEvent::Closed);
        }
        rx
    }

    /// Deliver an output event. Ignored after close.
    pub fn publish(&self, event: TransportEvent) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if matches!(event, TransportEvent::Closed) {
            drop(state);
            self.close();
            return;
        }
        if state.has_subscribed {
            state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        } else {
            state.backlog.push(event);
        }
    }

    /// Mark the connection closed and notify subscribers once.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        if state.has_subscribed {
            for tx in state.subscribers.drain(..) {
                let _ = tx.send(TransportEvent::Closed);
            }
        } else {
            state.backlog.push(TransportEvent::Closed);
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
