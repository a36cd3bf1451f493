//! In-memory display surface.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use remote_terminal_core::{Dimensions, DisplaySurface, ProjectId, SurfaceFactory};
use tokio::sync::mpsc;

#[derive(Default)]
struct SurfaceState {
    output: Vec<u8>,
    opened: Vec<String>,
    dimensions: Option<Dimensions>,
    fit_count: usize,
    focus_count: usize,
    dispose_count: usize,
}

/// Headless display surface.
///
/// Useful for headless hosts and tests. Output is accumulated in memory
/// and input is injected with [`MemorySurface::type_input`].
#[derive(Default)]
pub struct MemorySurface {
    state: RwLock<SurfaceState>,
    input: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl MemorySurface {
    /// Create an unmounted surface (no dimensions).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a surface reporting fixed dimensions.
    #[must_use]
    pub fn with_dimensions(rows: u16, cols: u16) -> Self {
        let surface = Self::new();
        surface.set_dimensions(Some(Dimensions { rows, cols }));
        surface
    }

    /// Change the proposed dimensions.
    pub fn set_dimensions(&self, dimensions: Option<Dimensions>) {
        self.write_state().dimensions = dimensions;
    }

    /// Deliver typed input to live subscribers.
    ///
    /// Returns `false` if nobody is listening.
    pub fn type_input(&self, data: &str) -> bool {
        let mut input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
        input.retain(|tx| tx.send(data.to_owned()).is_ok());
        !input.is_empty()
    }

    /// Everything written so far.
    #[must_use]
    pub fn output(&self) -> Vec<u8> {
        self.read_state().output.clone()
    }

    /// Output decoded lossily as UTF-8.
    #[must_use]
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.read_state().output).into_owned()
    }

    /// Targets passed to `open`, in call order.
    #[must_use]
    pub fn opened_targets(&self) -> Vec<String> {
        self.read_state().opened.clone()
    }

    #[must_use]
    pub fn fit_count(&self) -> usize {
        self.read_state().fit_count
    }

    #[must_use]
    pub fn focus_count(&self) -> usize {
        self.read_state().focus_count
    }

    #[must_use]
    pub fn dispose_count(&self) -> usize {
        self.read_state().dispose_count
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SurfaceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, SurfaceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplaySurface for MemorySurface {
    fn open(&self, target: &str) {
        self.write_state().opened.push(target.to_owned());
    }

    fn fit(&self) {
        self.write_state().fit_count += 1;
    }

    fn focus(&self) {
        self.write_state().focus_count += 1;
    }

    fn propose_dimensions(&self) -> Option<Dimensions> {
        self.read_state().dimensions
    }

    fn write(&self, data: &[u8]) {
        self.write_state().output.extend_from_slice(data);
    }

    fn on_input_data(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn dispose(&self) {
        self.write_state().dispose_count += 1;
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Factory creating one [`MemorySurface`] per session.
///
/// Keeps a handle to every surface it created so hosts can inspect them.
#[derive(Default)]
pub struct MemorySurfaceFactory {
    dimensions: Option<Dimensions>,
    created: Mutex<Vec<(ProjectId, Arc<MemorySurface>)>>,
}

impl MemorySurfaceFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Surfaces created by this factory report these dimensions.
    #[must_use]
    pub const fn with_dimensions(mut self, rows: u16, cols: u16) -> Self {
        self.dimensions = Some(Dimensions { rows, cols });
        self
    }

    /// Most recent surface created for a project.
    #[must_use]
    pub fn latest(&self, project_id: &ProjectId) -> Option<Arc<MemorySurface>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(id, _)| id == project_id)
            .map(|(_, surface)| Arc::clone(surface))
    }

    /// Number of surfaces created so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl SurfaceFactory for MemorySurfaceFactory {
    fn create(&self, project_id: &ProjectId) -> Arc<dyn DisplaySurface> {
        let surface = Arc::new(MemorySurface::new());
        surface.set_dimensions(self.dimensions);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((project_id.clone(), Arc::clone(&surface)));
        surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls() {
        let surface = MemorySurface::with_dimensions(24, 80);
        surface.open("main");
        surface.fit();
        surface.focus();
        surface.write(b"hello ");
        surface.write(b"world");

        assert_eq!(surface.opened_targets(), vec!["main".to_string()]);
        assert_eq!(surface.fit_count(), 1);
        assert_eq!(surface.focus_count(), 1);
        assert_eq!(surface.output_string(), "hello world");
        assert_eq!(
            surface.propose_dimensions(),
            Some(Dimensions { rows: 24, cols: 80 })
        );
    }

    #[test]
    fn test_input_until_dispose() {
        let surface = MemorySurface::new();
        assert!(!surface.type_input("x"));

        let mut rx = surface.on_input_data();
        assert!(surface.type_input("ab"));
        assert_eq!(rx.try_recv().unwrap(), "ab");

        surface.dispose();
        assert!(!surface.type_input("c"));
        assert_eq!(surface.dispose_count(), 1);
    }

    #[test]
    fn test_factory_tracks_surfaces() {
        let factory = MemorySurfaceFactory::new().with_dimensions(30, 100);
        let id = ProjectId::new("p").unwrap();
        let created = factory.create(&id);
        assert_eq!(factory.created_count(), 1);
        assert_eq!(
            created.propose_dimensions(),
            Some(Dimensions { rows: 30, cols: 100 })
        );
        assert!(factory.latest(&id).is_some());
        assert!(factory.latest(&ProjectId::new("other").unwrap()).is_none());
    }
}
