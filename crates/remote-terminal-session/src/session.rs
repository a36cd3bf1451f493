//! A single remote terminal session.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use remote_terminal_core::{
    DisplaySurface, ProjectId, TerminalSize, Transport, TransportEvent,
    traits::{EndReason, SendError, SessionId, SessionState},
};
use remote_terminal_transport::protocol::{self, ProtocolError};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Send error: {0}")]
    Send(#[from] SendError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Lifecycle notification delivered to the hosting environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session was torn down. On `RemoteClosed` the host should reset
    /// its presentation state.
    Ended {
        project_id: ProjectId,
        session_id: SessionId,
        reason: EndReason,
    },
}

struct Inner {
    surface: Option<Arc<dyn DisplaySurface>>,
    target: Option<String>,
    input: Option<JoinHandle<()>>,
    closed: bool,
}

/// One transport bound to one display surface.
///
/// Output from the transport is written to the surface, typed input from the
/// surface is sent to the transport, and a remote close tears everything down.
pub struct Session {
    id: SessionId,
    project_id: ProjectId,
    transport: Arc<dyn Transport>,
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Wire a connected transport to a surface and start forwarding.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        project_id: ProjectId,
        transport: Arc<dyn Transport>,
        surface: Arc<dyn DisplaySurface>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let inbound = transport.subscribe();
        let input = tokio::spawn(forward_input(
            surface.on_input_data(),
            Arc::clone(&transport),
            id,
        ));
        let (state, _) = watch::channel(SessionState::Ready { bound: false });

        let session = Arc::new(Self {
            id,
            project_id,
            transport,
            inner: Mutex::new(Inner {
                surface: Some(surface),
                target: None,
                input: Some(input),
                closed: false,
            }),
            state,
            events,
        });
        tokio::spawn(Arc::clone(&session).pump_inbound(inbound));

        tracing::info!(
            project_id = %session.project_id,
            session_id = %session.id,
            "Terminal session ready"
        );
        session
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Wait until the session has been torn down.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    /// Attach the surface to a presentation target, fit it and focus it.
    ///
    /// Binding again to the same target only re-fits and re-focuses; a
    /// different target is opened first. No-op once closed.
    pub fn bind(&self, target: &str) {
        let (surface, reopen) = {
            let mut inner = self.lock();
            let Some(surface) = inner.surface.clone() else {
                tracing::debug!(session_id = %self.id, "Ignoring bind on closed session");
                return;
            };
            let reopen = inner.target.as_deref() != Some(target);
            if reopen {
                inner.target = Some(target.to_owned());
            }
            (surface, reopen)
        };

        if reopen {
            tracing::debug!(session_id = %self.id, surface_target = target, "Opening display surface");
            surface.open(target);
        }
        surface.fit();
        surface.focus();

        self.state.send_if_modified(|state| {
            if *state == (SessionState::Ready { bound: false }) {
                *state = SessionState::Ready { bound: true };
                true
            } else {
                false
            }
        });
    }

    /// Send the surface's proposed size to the remote terminal.
    ///
    /// Returns the size sent, or `None` when the surface has no size to
    /// propose (nothing is sent in that case).
    ///
    /// # Errors
    /// Returns error if encoding or sending the resize frame fails.
    pub async fn resize(&self) -> Result<Option<TerminalSize>, SessionError> {
        let Some(surface) = self.surface() else {
            return Ok(None);
        };
        surface.fit();
        let Some(dimensions) = surface.propose_dimensions() else {
            return Ok(None);
        };
        let size = TerminalSize::from_dimensions(dimensions);
        self.transport.send(protocol::encode_resize(&size)?).await?;
        tracing::debug!(session_id = %self.id, rows = size.rows, cols = size.cols, "Resized terminal");
        Ok(Some(size))
    }

    /// Type `command` followed by a newline.
    ///
    /// # Errors
    /// Returns error if the transport rejects the frame.
    pub async fn run(&self, command: &str) -> Result<(), SendError> {
        self.transport
            .send(protocol::encode_user_input(&format!("{command}\n")))
            .await
    }

    /// Dispose the surface, cancel input capture and close the transport.
    ///
    /// Safe to call more than once and after a remote close.
    pub async fn destroy(&self) {
        self.teardown(EndReason::Destroyed).await;
    }

    async fn teardown(&self, reason: EndReason) {
        let (surface, input) = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.target = None;
            (inner.surface.take(), inner.input.take())
        };

        if let Some(surface) = surface {
            surface.dispose();
        }
        if let Some(input) = input {
            input.abort();
            let _ = input.await;
        }
        self.transport.disconnect().await;
        self.state.send_replace(SessionState::Closed);

        tracing::info!(
            project_id = %self.project_id,
            session_id = %self.id,
            ?reason,
            "Terminal session ended"
        );
        let _ = self.events.send(SessionEvent::Ended {
            project_id: self.project_id.clone(),
            session_id: self.id,
            reason,
        });
    }

    async fn pump_inbound(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Output(data) => {
                    if let Some(surface) = self.surface() {
                        surface.write(&data);
                    }
                }
                TransportEvent::Closed => break,
            }
        }
        self.teardown(EndReason::RemoteClosed).await;
    }

    fn surface(&self) -> Option<Arc<dyn DisplaySurface>> {
        self.lock().surface.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn forward_input(
    mut input: mpsc::UnboundedReceiver<String>,
    transport: Arc<dyn Transport>,
    session_id: SessionId,
) {
    while let Some(data) = input.recv().await {
        if let Err(e) = transport.send(protocol::encode_user_input(&data)).await {
            tracing::warn!(%session_id, error = %e, "Failed to send input to terminal");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use remote_terminal_core::Dimensions;
    use remote_terminal_transport::{ChannelTransport, RemoteEnd};
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::surface::MemorySurface;

    struct Fixture {
        session: Arc<Session>,
        surface: Arc<MemorySurface>,
        remote: RemoteEnd,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn start(surface: MemorySurface) -> Fixture {
        let (transport, remote) = ChannelTransport::pair();
        let surface = Arc::new(surface);
        let (events_tx, events) = mpsc::unbounded_channel();
        let session = Session::start(
            ProjectId::new("proj").unwrap(),
            Arc::new(transport),
            Arc::clone(&surface) as Arc<dyn DisplaySurface>,
            events_tx,
        );
        Fixture {
            session,
            surface,
            remote,
            events,
        }
    }

    async fn wait_closed(session: &Session) {
        timeout(Duration::from_secs(5), session.closed())
            .await
            .expect("session closes within 5s");
    }

    #[tokio::test]
    async fn test_run_sends_one_frame() {
        let mut fx = start(MemorySurface::new());
        assert_ok!(fx.session.run("ls").await);
        assert_eq!(fx.remote.drain(), vec![protocol::encode_user_input("ls\n")]);
    }

    #[tokio::test]
    async fn test_typed_input_is_forwarded() {
        let mut fx = start(MemorySurface::new());
        assert!(fx.surface.type_input("e"));
        assert!(fx.surface.type_input("ç"));

        let first = timeout(Duration::from_secs(5), fx.remote.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(5), fx.remote.recv()).await.unwrap();
        assert_eq!(first, Some(protocol::encode_user_input("e")));
        assert_eq!(second, Some(protocol::encode_user_input("ç")));
    }

    #[tokio::test]
    async fn test_output_reaches_surface() {
        let fx = start(MemorySurface::new());
        fx.remote.send_output(&b"total 0\r\n"[..]);
        fx.remote.send_output(&b"$ "[..]);

        timeout(Duration::from_secs(5), async {
            while fx.surface.output_string() != "total 0\r\n$ " {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("output delivered");
    }

    #[tokio::test]
    async fn test_bind_is_reentrant() {
        let fx = start(MemorySurface::new());
        assert_eq!(fx.session.state(), SessionState::Ready { bound: false });

        fx.session.bind("main");
        fx.session.bind("main");
        assert_eq!(fx.surface.opened_targets(), vec!["main".to_string()]);
        assert_eq!(fx.surface.fit_count(), 2);
        assert_eq!(fx.surface.focus_count(), 2);
        assert_eq!(fx.session.state(), SessionState::Ready { bound: true });

        fx.session.bind("popout");
        assert_eq!(
            fx.surface.opened_targets(),
            vec!["main".to_string(), "popout".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resize_without_dimensions_sends_nothing() {
        let mut fx = start(MemorySurface::new());
        assert_eq!(fx.session.resize().await.unwrap(), None);
        assert!(fx.remote.drain().is_empty());
    }

    #[tokio::test]
    async fn test_resize_sends_proposed_size() {
        let mut fx = start(MemorySurface::with_dimensions(40, 132));
        let sent = fx.session.resize().await.unwrap();
        let expected = TerminalSize {
            rows: 40,
            cols: 132,
            pixel_width: 0,
            pixel_height: 0,
        };
        assert_eq!(sent, Some(expected));
        assert_eq!(
            fx.remote.drain(),
            vec![protocol::encode_resize(&expected).unwrap()]
        );

        fx.surface.set_dimensions(Some(Dimensions { rows: 10, cols: 20 }));
        let sent = fx.session.resize().await.unwrap().unwrap();
        assert_eq!((sent.rows, sent.cols), (10, 20));
    }

    #[tokio::test]
    async fn test_destroy_closes_transport() {
        let mut fx = start(MemorySurface::new());
        fx.session.bind("main");
        fx.session.destroy().await;

        assert!(fx.session.is_closed());
        assert!(fx.remote.is_closed());
        assert_eq!(fx.surface.dispose_count(), 1);
        assert!(!fx.surface.type_input("ignored"));

        let err = assert_err!(fx.session.run("ls").await);
        assert_eq!(err, SendError::Closed);

        fx.session.destroy().await;
        fx.session.bind("main");
        assert_eq!(fx.surface.dispose_count(), 1);
        assert_eq!(fx.surface.opened_targets().len(), 1);

        assert!(matches!(
            fx.events.try_recv(),
            Ok(SessionEvent::Ended {
                reason: EndReason::Destroyed,
                ..
            })
        ));
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_close_tears_down_once() {
        let mut fx = start(MemorySurface::new());
        fx.session.bind("main");
        fx.remote.close();
        wait_closed(&fx.session).await;
        fx.session.destroy().await;

        assert_eq!(fx.surface.dispose_count(), 1);
        let event = timeout(Duration::from_secs(5), fx.events.recv()).await.unwrap();
        assert_eq!(
            event.unwrap(),
            SessionEvent::Ended {
                project_id: ProjectId::new("proj").unwrap(),
                session_id: fx.session.id(),
                reason: EndReason::RemoteClosed,
            }
        );
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_output_after_destroy_is_dropped() {
        let fx = start(MemorySurface::new());
        fx.session.destroy().await;
        fx.remote.send_output(&b"late"[..]);
        tokio::task::yield_now().await;
        assert!(fx.surface.output().is_empty());
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    /// Record input cancellation the first time it is observed.
    fn note_input_cancelled(log: &Log, input: &Mutex<Option<mpsc::UnboundedSender<String>>>) {
        let cancelled = input
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(mpsc::UnboundedSender::is_closed);
        let mut log = log.lock().unwrap();
        if cancelled && !log.contains(&"cancel input") {
            log.push("cancel input");
        }
    }

    /// Transport that records teardown order and can fail sends on demand.
    struct RecordingTransport {
        inner: ChannelTransport,
        log: Log,
        input: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
        fail_next_send: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, frame: Bytes) -> Result<(), SendError> {
            if self
                .fail_next_send
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(SendError::Failed("injected".into()));
            }
            self.inner.send(frame).await
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
            self.inner.subscribe()
        }

        async fn disconnect(&self) {
            note_input_cancelled(&self.log, &self.input);
            self.log.lock().unwrap().push("disconnect");
            self.inner.disconnect().await;
        }
    }

    /// Surface that records disposal and hands out its own input channel.
    struct RecordingSurface {
        inner: MemorySurface,
        log: Log,
        input: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    }

    impl RecordingSurface {
        fn type_input(&self, data: &str) -> bool {
            self.input
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|tx| tx.send(data.to_owned()).is_ok())
        }
    }

    impl DisplaySurface for RecordingSurface {
        fn open(&self, target: &str) {
            self.inner.open(target);
        }
        fn fit(&self) {
            self.inner.fit();
        }
        fn focus(&self) {
            self.inner.focus();
        }
        fn propose_dimensions(&self) -> Option<Dimensions> {
            self.inner.propose_dimensions()
        }
        fn write(&self, data: &[u8]) {
            self.inner.write(data);
        }
        fn on_input_data(&self) -> mpsc::UnboundedReceiver<String> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.input.lock().unwrap() = Some(tx);
            rx
        }
        fn dispose(&self) {
            note_input_cancelled(&self.log, &self.input);
            self.log.lock().unwrap().push("dispose");
            self.inner.dispose();
        }
    }

    fn recording_session(
        fail_first_send: bool,
    ) -> (Arc<Session>, Arc<RecordingSurface>, RemoteEnd, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let input = Arc::new(Mutex::new(None));
        let (channel, remote) = ChannelTransport::pair();
        let transport = Arc::new(RecordingTransport {
            inner: channel,
            log: Arc::clone(&log),
            input: Arc::clone(&input),
            fail_next_send: std::sync::atomic::AtomicBool::new(fail_first_send),
        });
        let surface = Arc::new(RecordingSurface {
            inner: MemorySurface::new(),
            log: Arc::clone(&log),
            input,
        });
        let (events_tx, _events) = mpsc::unbounded_channel();
        let session = Session::start(
            ProjectId::new("proj").unwrap(),
            transport,
            Arc::clone(&surface) as Arc<dyn DisplaySurface>,
            events_tx,
        );
        (session, surface, remote, log)
    }

    #[tokio::test]
    async fn test_failed_input_send_keeps_pump_running() {
        let (session, surface, mut remote, _log) = recording_session(true);

        assert!(surface.type_input("lost"));
        assert!(surface.type_input("kept"));
        let frame = timeout(Duration::from_secs(5), remote.recv()).await.unwrap();
        assert_eq!(frame, Some(protocol::encode_user_input("kept")));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_destroy_teardown_order() {
        let (session, surface, _remote, log) = recording_session(false);

        session.destroy().await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["dispose", "cancel input", "disconnect"]
        );
        assert!(!surface.type_input("late"));
    }

    #[tokio::test]
    async fn test_remote_close_teardown_order() {
        let (session, _surface, remote, log) = recording_session(false);

        remote.close();
        wait_closed(&session).await;
        session.destroy().await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["dispose", "cancel input", "disconnect"]
        );
    }

    #[tokio::test]
    async fn test_debug_names_session() {
        let fx = start(MemorySurface::new());
        let debug = format!("{:?}", fx.session);
        assert!(debug.contains("proj"));
        assert!(debug.contains(&fx.session.id().to_string()));
    }
}
