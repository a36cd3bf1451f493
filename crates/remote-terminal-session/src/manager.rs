//! Session manager attaching projects to remote terminals.

use std::sync::Arc;

use remote_terminal_core::{
    ClientConfig, Connector, ProjectId, SurfaceFactory,
    traits::{ConnectionError, SessionState},
};
use tokio::sync::mpsc;

use crate::{
    registry::SessionRegistry,
    session::{Session, SessionEvent},
};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("No established session for project: {0}")]
    NotFound(ProjectId),
}

/// Session manager for attaching to remote terminals.
///
/// Owns the registry, so each manager instance enforces one session per
/// project on its own.
pub struct SessionManager<C, F>
where
    C: Connector,
    F: SurfaceFactory,
{
    connector: Arc<C>,
    surfaces: Arc<F>,
    config: ClientConfig,
    registry: SessionRegistry,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<C, F> SessionManager<C, F>
where
    C: Connector + 'static,
    F: SurfaceFactory + 'static,
{
    /// Create a new session manager.
    ///
    /// Returns the manager and the receiver for session lifecycle events.
    #[must_use]
    pub fn new(
        connector: C,
        surfaces: F,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            connector: Arc::new(connector),
            surfaces: Arc::new(surfaces),
            config,
            registry: SessionRegistry::new(),
            events,
        };
        (manager, events_rx)
    }

    /// Get the session for a project, connecting if none exists.
    ///
    /// Concurrent calls for the same project share one connection attempt.
    ///
    /// # Errors
    /// Returns error if the connection fails or times out.
    pub async fn attach(&self, project_id: &ProjectId) -> Result<Arc<Session>, ManagerError> {
        let session = self.connect(project_id).await?;
        if !session.is_closed() {
            return Ok(session);
        }
        // Closed but not yet evicted by its watcher.
        self.registry.remove_closed(project_id);
        self.connect(project_id).await
    }

    async fn connect(&self, project_id: &ProjectId) -> Result<Arc<Session>, ManagerError> {
        let handle = self.registry.get_or_create(project_id, || {
            let connector = Arc::clone(&self.connector);
            let surfaces = Arc::clone(&self.surfaces);
            let events = self.events.clone();
            let endpoint = self.config.endpoint_for(project_id);
            let timeout = self.config.connect_timeout();
            let project_id = project_id.clone();

            async move {
                tracing::info!(%project_id, %endpoint, "Connecting to terminal");
                let connect = connector.connect(&endpoint);
                let transport = match timeout {
                    Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                        ConnectionError::TimedOut {
                            endpoint: endpoint.to_string(),
                            timeout: limit,
                        }
                    })??,
                    None => connect.await?,
                };
                let surface = surfaces.create(&project_id);
                Ok::<_, ConnectionError>(Session::start(project_id, transport, surface, events))
            }
        });
        Ok(handle.await?)
    }

    /// Destroy the established session for a project.
    ///
    /// # Errors
    /// Returns error if no established session exists.
    pub async fn destroy(&self, project_id: &ProjectId) -> Result<(), ManagerError> {
        let session = self
            .registry
            .established(project_id)
            .ok_or_else(|| ManagerError::NotFound(project_id.clone()))?;
        session.destroy().await;
        self.registry.remove_closed(project_id);
        Ok(())
    }

    /// Lifecycle state for a project, if it has an entry.
    #[must_use]
    pub fn status(&self, project_id: &ProjectId) -> Option<SessionState> {
        self.registry.status(project_id)
    }

    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    #[must_use]
    pub fn surfaces(&self) -> &F {
        &self.surfaces
    }
}
