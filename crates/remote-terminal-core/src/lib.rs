//! Core abstractions for remote terminal sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `ProjectId` / `Endpoint` - Session identity and addressing
//! - `Frame` - Typed wire-level message enum
//! - `ClientConfig` - TOML-backed client configuration
//! - Transport and display surface traits

pub mod config;
pub mod context;
pub mod frame;
pub mod traits;

pub use config::{BuildMode, ClientConfig, ConfigError};
pub use context::{Endpoint, InvalidProjectId, ProjectId};
pub use frame::{Dimensions, Frame, TerminalSize};
pub use traits::{
    ConnectionError, Connector, DisplaySurface, EndReason, SendError, SessionId, SessionState,
    SurfaceFactory, Transport, TransportEvent,
};
