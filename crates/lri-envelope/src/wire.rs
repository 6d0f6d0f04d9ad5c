// SPDX-License-Identifier: Apache-2.0
//! Wire codecs for LCE envelopes.
//!
//! Two forms exist: the HTTP header form `base64(utf8(json(lce)))` and the
//! WebSocket payload forms (`json` text frames, `cbor` binary frames).
//! Decode failures are taxonomized so the HTTP boundary can map each stage
//! to a distinct status code.

use crate::{InvalidLce, Issue, Lce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Decode/encode failure taxonomy for the LCE wire forms.
#[derive(Debug, Error)]
pub enum WireError {
    /// Base64 decode failure or non-UTF-8 bytes in the header form.
    #[error("malformed LCE header: {0}")]
    MalformedHeader(String),
    /// Decoded bytes are not parseable JSON.
    #[error("invalid LCE JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// JSON parsed but the envelope violates the schema.
    #[error(transparent)]
    InvalidLce(#[from] InvalidLce),
    /// CBOR serialization or deserialization failure.
    #[error("invalid LCE CBOR: {0}")]
    InvalidCbor(String),
}

/// Serialize an envelope to its canonical JSON string. Absent optional
/// fields are omitted.
///
/// # Errors
///
/// Returns [`WireError::InvalidJson`] if serialization fails (not expected
/// for well-formed envelopes).
pub fn to_json(lce: &Lce) -> Result<String, WireError> {
    Ok(serde_json::to_string(lce)?)
}

/// Strict-parse an envelope from JSON text.
///
/// # Errors
///
/// [`WireError::InvalidJson`] when the text is not JSON,
/// [`WireError::InvalidLce`] when it is JSON but not a valid envelope.
pub fn from_json(text: &str) -> Result<Lce, WireError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(Lce::from_value(value)?)
}

/// Encode an envelope into its HTTP header form:
/// `base64(utf8(json(lce)))`. Deterministic for equal envelopes.
///
/// # Errors
///
/// Returns [`WireError::InvalidJson`] if JSON serialization fails.
pub fn encode_header(lce: &Lce) -> Result<String, WireError> {
    let json = to_json(lce)?;
    Ok(STANDARD.encode(json.as_bytes()))
}

/// Decode an envelope from its HTTP header form.
///
/// # Errors
///
/// [`WireError::MalformedHeader`] on Base64 or UTF-8 failure,
/// [`WireError::InvalidJson`] when the decoded bytes are not JSON,
/// [`WireError::InvalidLce`] when the JSON violates the envelope schema.
pub fn decode_header(header: &str) -> Result<Lce, WireError> {
    let bytes = STANDARD
        .decode(header.trim())
        .map_err(|err| WireError::MalformedHeader(err.to_string()))?;
    let text =
        String::from_utf8(bytes).map_err(|err| WireError::MalformedHeader(err.to_string()))?;
    from_json(&text)
}

/// Decode the HTTP header form without running the soft validator.
///
/// The typed parse (plus the numeric invariants in [`Lce::check`]) still
/// runs, so a wholly ill-formed envelope is still rejected — only the
/// path-tagged diagnostic pass is skipped.
///
/// # Errors
///
/// Same taxonomy as [`decode_header`]; schema violations surface as a
/// single deserialization diagnostic instead of the full list.
pub fn decode_header_unvalidated(header: &str) -> Result<Lce, WireError> {
    let bytes = STANDARD
        .decode(header.trim())
        .map_err(|err| WireError::MalformedHeader(err.to_string()))?;
    let text =
        String::from_utf8(bytes).map_err(|err| WireError::MalformedHeader(err.to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let lce: Lce = serde_json::from_value(value).map_err(|err| {
        WireError::InvalidLce(InvalidLce {
            issues: vec![Issue {
                path: String::new(),
                message: format!("LCE deserialization failed: {err}"),
            }],
        })
    })?;
    lce.check()?;
    Ok(lce)
}

/// Serialize an envelope to CBOR bytes (the `cbor` WebSocket encoding).
///
/// # Errors
///
/// Returns [`WireError::InvalidCbor`] if serialization fails.
pub fn to_cbor(lce: &Lce) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(lce, &mut buf).map_err(|err| WireError::InvalidCbor(err.to_string()))?;
    Ok(buf)
}

/// Deserialize an envelope from CBOR bytes, then enforce the numeric
/// invariants the typed deserializer cannot express.
///
/// # Errors
///
/// [`WireError::InvalidCbor`] on CBOR-level failure,
/// [`WireError::InvalidLce`] when the decoded envelope violates an
/// invariant (wrong version, out-of-range PAD or coherence).
pub fn from_cbor(bytes: &[u8]) -> Result<Lce, WireError> {
    let lce: Lce =
        ciborium::from_reader(bytes).map_err(|err| WireError::InvalidCbor(err.to_string()))?;
    lce.check()?;
    Ok(lce)
}

impl WireError {
    /// The diagnostics behind an [`WireError::InvalidLce`], empty otherwise.
    pub fn issues(&self) -> &[Issue] {
        match self {
            Self::InvalidLce(invalid) => &invalid.issues,
            _ => &[],
        }
    }
}
