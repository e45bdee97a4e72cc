//! Frame decoding on top of WebSocket messages.
//!
//! The WebSocket layer provides message boundaries; this module turns
//! each message into a [`Command`] or classifies why it could not be.

use tokio_tungstenite::tungstenite::Message;

use super::protocol::{Command, FrameError, MAX_FRAME_SIZE, Outbound};

/// Result of attempting to decode one socket message.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult {
    /// A known command.
    Command(Command),
    /// Text frame with an unrecognised or missing command code.
    Invalid { frame: String, reason: FrameError },
    /// Binary or oversized frame; cannot be answered meaningfully.
    Malformed(String),
    /// Control traffic (ping/pong) handled by the WebSocket layer.
    Control,
    /// Peer sent a close frame.
    Closed,
}

/// Classify a socket message.
pub fn decode_frame(msg: Message) -> DecodeResult {
    match msg {
        Message::Text(text) => {
            if text.len() > MAX_FRAME_SIZE {
                return DecodeResult::Malformed(format!(
                    "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                    text.len()
                ));
            }
            match Command::parse(&text) {
                Ok(cmd) => DecodeResult::Command(cmd),
                Err(reason) => DecodeResult::Invalid {
                    frame: text,
                    reason,
                },
            }
        }
        Message::Binary(data) => {
            DecodeResult::Malformed(format!("unexpected binary frame ({} bytes)", data.len()))
        }
        Message::Ping(_) | Message::Pong(_) => DecodeResult::Control,
        Message::Close(_) => DecodeResult::Closed,
        Message::Frame(_) => DecodeResult::Malformed("unexpected raw frame".into()),
    }
}

/// Encode an outbound frame as a WebSocket text message.
pub fn encode_frame(frame: &Outbound) -> Message {
    Message::Text(frame.to_string())
}
