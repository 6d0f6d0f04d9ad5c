// SPDX-License-Identifier: Apache-2.0
//! LHS handshake frames and encoding negotiation.
//!
//! ```text
//!         HELLO                MIRROR             BIND             SEAL
//! client ───────────▶ server ───────▶ client ───────▶ server ───────▶ client
//! ```
//!
//! Handshake frames are always JSON text, regardless of the payload
//! encoding being negotiated. The `step` field names the role of each
//! frame.

use serde::{Deserialize, Serialize};

use crate::WsError;

/// Protocol version spoken by this crate.
pub const LRI_VERSION: &str = "0.2";

/// Feature tokens a fresh peer advertises.
pub fn default_features() -> Vec<String> {
    vec!["ltp".to_owned(), "lss".to_owned()]
}

/// Payload encodings a session can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One LCE per text frame.
    Json,
    /// One LCE per binary frame.
    Cbor,
}

impl Encoding {
    /// The lowercase wire token for this encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cbor => "cbor",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four handshake frames, tagged by `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum Handshake {
    /// Client → server: advertise preferences.
    Hello {
        /// Protocol version the client speaks.
        lri_version: String,
        /// Encodings in preference order.
        encodings: Vec<Encoding>,
        /// Advisory feature set.
        features: Vec<String>,
        /// Caller-chosen client identifier.
        client_id: String,
    },
    /// Server → client: selected encoding and feature intersection.
    Mirror {
        /// Protocol version the server speaks.
        lri_version: String,
        /// The encoding every payload frame will use.
        encoding: Encoding,
        /// Intersection of client and server features.
        features: Vec<String>,
        /// Server identifier.
        server_id: String,
    },
    /// Client → server: bind to a thread.
    Bind {
        /// Thread to join; absent for an anonymous session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread: Option<String>,
        /// Opaque credential; the core accepts any value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<serde_json::Value>,
    },
    /// Server → client: the session is ready.
    Seal {
        /// Fresh server-generated session identifier.
        session_id: String,
        /// The bound thread (echoed, or server-generated when the client
        /// omitted it).
        thread: String,
        /// Always `"ready"`.
        status: String,
    },
}

impl Handshake {
    /// Serialize to the JSON text carried in a handshake frame.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Protocol`] if serialization fails (not expected
    /// for well-formed frames).
    pub fn to_text(&self) -> Result<String, WsError> {
        serde_json::to_string(self).map_err(|err| WsError::Protocol(err.to_string()))
    }

    /// Parse a handshake frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Protocol`] when the text is not a handshake
    /// frame.
    pub fn from_text(text: &str) -> Result<Self, WsError> {
        serde_json::from_str(text)
            .map_err(|err| WsError::Protocol(format!("bad handshake frame: {err}")))
    }
}

/// Pick the first client-preferred encoding the server supports.
///
/// `None` means the sets do not intersect and the connection must close
/// with a protocol error.
pub fn negotiate(client_prefs: &[Encoding], supported: &[Encoding]) -> Option<Encoding> {
    client_prefs
        .iter()
        .copied()
        .find(|encoding| supported.contains(encoding))
}

/// Intersection of the client's advisory features with the server's, in
/// server order.
pub(crate) fn feature_intersection(client: &[String], server: &[String]) -> Vec<String> {
    server
        .iter()
        .filter(|feature| client.contains(feature))
        .cloned()
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. step tags on the wire ────────────────────────────────────────

    #[test]
    fn hello_serializes_with_step_tag() {
        let hello = Handshake::Hello {
            lri_version: LRI_VERSION.to_owned(),
            encodings: vec![Encoding::Json, Encoding::Cbor],
            features: default_features(),
            client_id: "test-client".to_owned(),
        };
        let text = hello.to_text().unwrap();
        assert!(text.contains("\"step\":\"hello\""));
        assert!(text.contains("test-client"));
        let back = Handshake::from_text(&text).unwrap();
        assert_eq!(back, hello);
    }

    #[test]
    fn mirror_serializes_with_encoding_token() {
        let mirror = Handshake::Mirror {
            lri_version: LRI_VERSION.to_owned(),
            encoding: Encoding::Cbor,
            features: vec!["lss".to_owned()],
            server_id: "test-server".to_owned(),
        };
        let text = mirror.to_text().unwrap();
        assert!(text.contains("\"step\":\"mirror\""));
        assert!(text.contains("\"cbor\""));
        let back = Handshake::from_text(&text).unwrap();
        assert_eq!(back, mirror);
    }

    // ── 2. bind tolerates an absent thread ──────────────────────────────

    #[test]
    fn bind_without_thread_round_trips() {
        let bind = Handshake::from_text(r#"{"step":"bind"}"#).unwrap();
        assert_eq!(
            bind,
            Handshake::Bind {
                thread: None,
                auth: None
            }
        );

        let bound = Handshake::Bind {
            thread: Some("thread-123".to_owned()),
            auth: Some(serde_json::json!("token-abc")),
        };
        let text = bound.to_text().unwrap();
        assert!(text.contains("thread-123"));
        assert_eq!(Handshake::from_text(&text).unwrap(), bound);
    }

    // ── 3. seal carries the session ─────────────────────────────────────

    #[test]
    fn seal_round_trips() {
        let seal = Handshake::Seal {
            session_id: "session-456".to_owned(),
            thread: "thread-123".to_owned(),
            status: "ready".to_owned(),
        };
        let back = Handshake::from_text(&seal.to_text().unwrap()).unwrap();
        assert_eq!(back, seal);
    }

    // ── 4. non-handshake text is a protocol error ───────────────────────

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(Handshake::from_text("{}").is_err());
        assert!(Handshake::from_text("not json").is_err());
        assert!(Handshake::from_text(r#"{"step":"teleport"}"#).is_err());
    }

    // ── 5. negotiation picks the first client preference ────────────────

    #[test]
    fn negotiation_respects_client_order() {
        let both = [Encoding::Json, Encoding::Cbor];
        assert_eq!(
            negotiate(&[Encoding::Cbor, Encoding::Json], &both),
            Some(Encoding::Cbor)
        );
        assert_eq!(
            negotiate(&[Encoding::Json, Encoding::Cbor], &both),
            Some(Encoding::Json)
        );
        assert_eq!(negotiate(&[Encoding::Cbor], &[Encoding::Json]), None);
        assert_eq!(negotiate(&[], &both), None);
    }

    // ── 6. feature intersection ─────────────────────────────────────────

    #[test]
    fn features_intersect() {
        let client = vec!["ltp".to_owned(), "lss".to_owned(), "x".to_owned()];
        let server = default_features();
        assert_eq!(feature_intersection(&client, &server), server);
        assert!(feature_intersection(&[], &server).is_empty());
    }
}
