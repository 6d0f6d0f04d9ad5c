// SPDX-License-Identifier: Apache-2.0
//! WebSocket transport for LCE envelopes.
//!
//! Connections open with the four-step LHS handshake (Hello → Mirror →
//! Bind → Seal, see [`protocol`]) carried as JSON text frames. After Seal
//! both sides exchange envelopes framed by the negotiated encoding: one LCE
//! per text frame for `json`, one per binary frame for `cbor`. The
//! handshake is non-resumable — a dropped connection starts over with a new
//! Hello.

mod client;
pub mod protocol;
mod server;

pub use client::WsClient;
pub use protocol::{negotiate, Encoding, Handshake, LRI_VERSION};
pub use server::{WsServer, WsServerConfig};

use lri_envelope::wire::{self, WireError};
use lri_envelope::Lce;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

/// Failure taxonomy for the WebSocket layer.
#[derive(Debug, Error)]
pub enum WsError {
    /// The client has not completed `connect()`.
    #[error("Not connected")]
    NotConnected,
    /// `send` addressed a session the server does not know.
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    /// The peer broke the handshake or framing rules; the connection is
    /// closed.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The connection closed while an operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,
    /// Envelope codec failure on an outbound payload.
    #[error("envelope codec failure: {0}")]
    Envelope(#[from] WireError),
    /// Socket-level failure.
    #[error("transport failure: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// Listener socket failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame an envelope for the negotiated encoding.
pub(crate) fn encode_payload(encoding: Encoding, lce: &Lce) -> Result<Message, WsError> {
    match encoding {
        Encoding::Json => Ok(Message::Text(wire::to_json(lce)?)),
        Encoding::Cbor => Ok(Message::Binary(wire::to_cbor(lce)?)),
    }
}

/// Decode a payload frame under the negotiated encoding. Any mismatch
/// between frame type and encoding is a protocol error.
pub(crate) fn decode_payload(encoding: Encoding, message: &Message) -> Result<Lce, WsError> {
    match (encoding, message) {
        (Encoding::Json, Message::Text(text)) => Ok(wire::from_json(text)?),
        (Encoding::Cbor, Message::Binary(bytes)) => Ok(wire::from_cbor(bytes)?),
        (Encoding::Json, Message::Binary(_)) => Err(WsError::Protocol(
            "binary frame on a json-encoded session".into(),
        )),
        (Encoding::Cbor, Message::Text(_)) => Err(WsError::Protocol(
            "text frame on a cbor-encoded session".into(),
        )),
        _ => Err(WsError::Protocol("unexpected control frame".into())),
    }
}
