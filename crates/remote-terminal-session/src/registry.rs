//! Per-project session registry.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use remote_terminal_core::{
    ProjectId,
    traits::{ConnectionError, SessionState},
};

use crate::session::Session;

/// Cloneable handle to a session that may still be connecting.
pub type SessionHandle = Shared<BoxFuture<'static, Result<Arc<Session>, ConnectionError>>>;

struct Entry {
    generation: u64,
    handle: SessionHandle,
    /// Set by the connect task as soon as the session is established.
    session: Option<Arc<Session>>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<ProjectId, Entry>,
    next_generation: u64,
}

/// At most one session per project.
///
/// The pending handle is stored before the connection completes, so
/// concurrent requests for the same project observe the same connection
/// attempt. Entries are evicted when the connect fails or the session
/// closes.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<Mutex<Entries>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing handle for `project_id`, or start `factory`.
    ///
    /// `factory` is only invoked when no entry exists. Its future is spawned
    /// immediately, so the connection proceeds even if nobody awaits the
    /// handle. Must be called from within a Tokio runtime, and `factory`
    /// must not call back into this registry.
    pub fn get_or_create<F, Fut>(&self, project_id: &ProjectId, factory: F) -> SessionHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Session>, ConnectionError>> + Send + 'static,
    {
        let mut entries = self.lock();
        if let Some(entry) = entries.map.get(project_id) {
            tracing::debug!(%project_id, "Reusing terminal session");
            return entry.handle.clone();
        }

        entries.next_generation += 1;
        let generation = entries.next_generation;
        let task = tokio::spawn(self.clone().establish(
            project_id.clone(),
            generation,
            factory(),
        ));
        let handle = async move {
            task.await
                .unwrap_or_else(|e| Err(ConnectionError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        entries.map.insert(
            project_id.clone(),
            Entry {
                generation,
                handle: handle.clone(),
                session: None,
            },
        );
        tracing::debug!(%project_id, generation, "Connecting terminal session");
        handle
    }

    async fn establish<Fut>(
        self,
        project_id: ProjectId,
        generation: u64,
        connect: Fut,
    ) -> Result<Arc<Session>, ConnectionError>
    where
        Fut: Future<Output = Result<Arc<Session>, ConnectionError>>,
    {
        match connect.await {
            Ok(session) => {
                self.record(&project_id, generation, &session);
                let watched = Arc::clone(&session);
                tokio::spawn(async move {
                    watched.closed().await;
                    self.evict(watched.project_id(), generation);
                });
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(%project_id, error = %e, "Terminal session connect failed");
                self.evict(&project_id, generation);
                Err(e)
            }
        }
    }

    fn record(&self, project_id: &ProjectId, generation: u64, session: &Arc<Session>) {
        let mut entries = self.lock();
        match entries.map.get_mut(project_id) {
            Some(entry) if entry.generation == generation => {
                entry.session = Some(Arc::clone(session));
            }
            _ => {}
        }
    }

    /// Remove the entry for `project_id` if it is still the given generation.
    fn evict(&self, project_id: &ProjectId, generation: u64) -> bool {
        let mut entries = self.lock();
        let current = entries
            .map
            .get(project_id)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            entries.map.remove(project_id);
            tracing::debug!(%project_id, generation, "Evicted terminal session");
        }
        current
    }

    /// Remove the entry for `project_id` if its session has closed.
    pub fn remove_closed(&self, project_id: &ProjectId) -> bool {
        let generation = {
            let entries = self.lock();
            match entries.map.get(project_id) {
                Some(entry) if entry.session.as_ref().is_some_and(|s| s.is_closed()) => {
                    entry.generation
                }
                _ => return false,
            }
        };
        self.evict(project_id, generation)
    }

    /// Forget the entry for `project_id` without touching its session.
    pub fn remove(&self, project_id: &ProjectId) -> Option<SessionHandle> {
        self.lock().map.remove(project_id).map(|entry| entry.handle)
    }

    /// The handle for `project_id`, pending or established.
    #[must_use]
    pub fn get(&self, project_id: &ProjectId) -> Option<SessionHandle> {
        self.lock()
            .map
            .get(project_id)
            .map(|entry| entry.handle.clone())
    }

    /// The session for `project_id` if its connection has completed.
    #[must_use]
    pub fn established(&self, project_id: &ProjectId) -> Option<Arc<Session>> {
        self.lock()
            .map
            .get(project_id)
            .and_then(|entry| entry.session.clone())
    }

    /// Lifecycle state of the entry for `project_id`.
    ///
    /// `Connecting` until the connection completes, whether or not anyone
    /// awaits the handle. Failed connects have no entry.
    #[must_use]
    pub fn status(&self, project_id: &ProjectId) -> Option<SessionState> {
        let entries = self.lock();
        let entry = entries.map.get(project_id)?;
        Some(
            entry
                .session
                .as_ref()
                .map_or(SessionState::Connecting, |session| session.state()),
        )
    }

    #[must_use]
    pub fn contains(&self, project_id: &ProjectId) -> bool {
        self.lock().map.contains_key(project_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
