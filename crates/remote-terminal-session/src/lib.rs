//! Session lifecycle and per-project registry for remote terminals.
//!
//! Provides:
//! - `Session` - One transport wired to one display surface
//! - `SessionRegistry` - At most one session per project
//! - `SessionManager` - Attach projects using a connector and config
//! - Display surface implementations (memory)

pub mod manager;
pub mod registry;
pub mod session;
pub mod surface;

pub use manager::{ManagerError, SessionManager};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{Session, SessionError, SessionEvent};
