//! Typed frames exchanged with a remote terminal.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Row/column proposal reported by a display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub rows: u16,
    pub cols: u16,
}

/// Viewport size sent with a resize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl TerminalSize {
    /// Size with no pixel information.
    #[must_use]
    pub const fn from_dimensions(dims: Dimensions) -> Self {
        Self {
            rows: dims.rows,
            cols: dims.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::from_dimensions(Dimensions { rows: 24, cols: 80 })
    }
}

/// A single unit of data exchanged with the remote end.
///
/// Only `UserInput` and `Resize` are ever written to the wire; the server
/// sends untagged output and a close notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keystrokes typed by the user.
    UserInput(String),
    /// Viewport resize request.
    Resize(TerminalSize),
    /// Raw output bytes to render.
    RawOutput(Bytes),
    /// The connection has ended.
    Closed,
}

impl Frame {
    pub const USER_INPUT_TAG: u8 = 0x00;
    pub const RESIZE_TAG: u8 = 0x01;

    /// Wire tag for client-originated frames.
    #[must_use]
    pub const fn tag(&self) -> Option<u8> {
        match self {
            Self::UserInput(_) => Some(Self::USER_INPUT_TAG),
            Self::Resize(_) => Some(Self::RESIZE_TAG),
            Self::RawOutput(_) | Self::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_json_field_names() {
        let size = TerminalSize {
            rows: 40,
            cols: 120,
            pixel_width: 0,
            pixel_height: 0,
        };
        let value = serde_json::to_value(size).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"rows": 40, "cols": 120, "pixel_width": 0, "pixel_height": 0})
        );
    }

    #[test]
    fn test_tags() {
        assert_eq!(Frame::UserInput(String::new()).tag(), Some(0x00));
        assert_eq!(Frame::Resize(TerminalSize::default()).tag(), Some(0x01));
        assert_eq!(Frame::RawOutput(Bytes::new()).tag(), None);
        assert_eq!(Frame::Closed.tag(), None);
    }
}
