//! Wire protocol for client-server communication.
//!
//! The protocol is asymmetric. The client sends tagged binary frames:
//! `0x00` + UTF-8 keystrokes, or `0x01` + UTF-8 JSON resize request. The
//! server sends untagged output bytes.

use bytes::{BufMut, Bytes, BytesMut};
use remote_terminal_core::{Frame, TerminalSize};
use thiserror::Error;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,
    #[error("Unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    #[error("Frame payload is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Invalid resize payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("{0} frames are never sent by the client")]
    NotEncodable(&'static str),
}

/// Encode typed text as a user input frame.
#[must_use]
pub fn encode_user_input(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + text.len());
    buf.put_u8(Frame::USER_INPUT_TAG);
    buf.put_slice(text.as_bytes());
    buf.freeze()
}

/// Encode a viewport resize request.
///
/// # Errors
/// Returns error if the size cannot be serialized.
pub fn encode_resize(size: &TerminalSize) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(64).writer();
    buf.get_mut().put_u8(Frame::RESIZE_TAG);
    serde_json::to_writer(&mut buf, size)?;
    Ok(buf.into_inner().freeze())
}

/// Encode a client-originated frame.
///
/// # Errors
/// Returns error for `RawOutput` and `Closed`, which only flow server to client.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    match frame {
        Frame::UserInput(text) => Ok(encode_user_input(text)),
        Frame::Resize(size) => encode_resize(size),
        Frame::RawOutput(_) => Err(ProtocolError::NotEncodable("Raw output")),
        Frame::Closed => Err(ProtocolError::NotEncodable("Close")),
    }
}

/// Leading tag byte of a client frame.
#[must_use]
pub fn decode_tag(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

/// Decode a client frame.
///
/// # Errors
/// Returns error if the frame is empty, carries an unknown tag, or has a
/// malformed payload.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let (&tag, payload) = data.split_first().ok_or(ProtocolError::Empty)?;
    match tag {
        Frame::USER_INPUT_TAG => Ok(Frame::UserInput(std::str::from_utf8(payload)?.to_owned())),
        Frame::RESIZE_TAG => {
            let json = std::str::from_utf8(payload)?;
            Ok(Frame::Resize(serde_json::from_str(json)?))
        }
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

/// Classify a binary message received from the server.
///
/// Server output carries no tag, so the bytes are passed through verbatim.
#[must_use]
pub fn classify_inbound(data: Bytes) -> Frame {
    Frame::RawOutput(data)
}
