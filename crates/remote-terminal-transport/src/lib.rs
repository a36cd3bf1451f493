//! Wire codec and transports for remote terminal sessions.
//!
//! Provides:
//! - Wire protocol (tagged binary frames)
//! - WebSocket transport (feature: websocket)
//! - In-process channel transport
//! - Crossterm display surface (feature: tui)

mod fanout;

pub mod channel;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "tui")]
pub mod tui;

pub use channel::{ChannelConnector, ChannelTransport, RemoteEnd};
pub use protocol::{ProtocolError, decode, decode_tag, encode, encode_resize, encode_user_input};

#[cfg(feature = "websocket")]
pub use websocket::{WsConnector, WsTransport};

#[cfg(feature = "tui")]
pub use tui::CrosstermSurface;
