// SPDX-License-Identifier: Apache-2.0
//! HTTP boundary for LCE envelopes.
//!
//! Services carry envelopes in a request header (`LCE` by default) as
//! Base64-encoded UTF-8 JSON. [`Lri::extract`] pulls the envelope out of a
//! header map and taxonomizes every failure so the boundary can answer with
//! a distinct status code:
//!
//! | failure | status |
//! |---|---|
//! | header missing but required | 428 |
//! | Base64/UTF-8 failure, non-JSON bytes | 400 |
//! | JSON that violates the envelope schema | 422 |
//!
//! [`ExtractError`] implements [`IntoResponse`], so axum handlers can
//! propagate it with `?` and get the mapped status plus a
//! `{"detail": {"error": ...}}` body.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use lri_envelope::wire::{self, WireError};
use lri_envelope::Lce;
use serde_json::json;
use thiserror::Error;

pub use lri_envelope::wire::encode_header as create_header;

/// Default request header carrying the envelope.
pub const DEFAULT_HEADER_NAME: &str = "LCE";

/// Header extraction failure, mapped onto HTTP statuses.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The header was absent and the caller required it.
    #[error("LCE header required")]
    MissingHeader,
    /// Base64 decode failure, or the bytes were not UTF-8.
    #[error("Malformed LCE header: {0}")]
    MalformedHeader(String),
    /// The decoded bytes were not parseable JSON.
    #[error("Invalid LCE JSON: {0}")]
    InvalidJson(String),
    /// The JSON parsed but is not a valid envelope.
    #[error("Invalid LCE: {0}")]
    InvalidLce(String),
}

impl ExtractError {
    /// The HTTP status this failure maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader => StatusCode::PRECONDITION_REQUIRED,
            Self::MalformedHeader(_) | Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::InvalidLce(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<WireError> for ExtractError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::MalformedHeader(detail) => Self::MalformedHeader(detail),
            WireError::InvalidJson(detail) => Self::InvalidJson(detail.to_string()),
            WireError::InvalidLce(invalid) => {
                let details: Vec<String> = invalid.issues.iter().map(ToString::to_string).collect();
                Self::InvalidLce(details.join("; "))
            }
            WireError::InvalidCbor(detail) => Self::InvalidLce(detail),
        }
    }
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": { "error": self.to_string() } }));
        (self.status(), body).into_response()
    }
}

/// Header extractor configuration.
///
/// `validate` controls only the soft diagnostic pass; with it disabled the
/// strict structural parse (and the numeric envelope invariants) still run,
/// so an ill-formed envelope still fails with 422.
#[derive(Debug, Clone)]
pub struct Lri {
    header_name: String,
    validate: bool,
}

impl Default for Lri {
    fn default() -> Self {
        Self::new()
    }
}

impl Lri {
    /// Extractor with the default header name and validation enabled.
    pub fn new() -> Self {
        Self {
            header_name: DEFAULT_HEADER_NAME.to_owned(),
            validate: true,
        }
    }

    /// Use a custom header name.
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Enable or disable the soft validation pass.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// The header this extractor reads.
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Whether the soft validation pass runs.
    pub fn validates(&self) -> bool {
        self.validate
    }

    /// Extract an envelope from a request's headers.
    ///
    /// Returns `Ok(None)` when the header is absent and not required.
    ///
    /// # Errors
    ///
    /// [`ExtractError::MissingHeader`] when the header is absent but
    /// required; otherwise the decode taxonomy documented on
    /// [`ExtractError`].
    pub fn extract(&self, headers: &HeaderMap, required: bool) -> Result<Option<Lce>, ExtractError> {
        let Some(raw) = headers.get(self.header_name.as_str()) else {
            if required {
                return Err(ExtractError::MissingHeader);
            }
            return Ok(None);
        };
        let raw = raw
            .to_str()
            .map_err(|err| ExtractError::MalformedHeader(err.to_string()))?;
        let lce = if self.validate {
            wire::decode_header(raw)?
        } else {
            wire::decode_header_unvalidated(raw)?
        };
        Ok(Some(lce))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use lri_envelope::{Consent, Intent, IntentKind, Policy};

    fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::try_from(name.to_owned()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    async fn body_text(err: ExtractError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    // ── 1. construction defaults ────────────────────────────────────────

    #[test]
    fn default_configuration() {
        let lri = Lri::new();
        assert_eq!(lri.header_name(), "LCE");
        assert!(lri.validates());

        let custom = Lri::new()
            .with_header_name("X-Custom-LCE")
            .with_validation(false);
        assert_eq!(custom.header_name(), "X-Custom-LCE");
        assert!(!custom.validates());
    }

    // ── 2. happy path ───────────────────────────────────────────────────

    #[test]
    fn extracts_valid_envelope() {
        let header = encode(br#"{"v":1,"intent":{"type":"ask"},"policy":{"consent":"private"}}"#);
        let headers = headers_with("LCE", &header);
        let lce = Lri::new().extract(&headers, false).unwrap().unwrap();
        assert_eq!(lce.intent.kind, IntentKind::Ask);
        assert_eq!(lce.policy.consent, Consent::Private);
    }

    // ── 3. absent header ────────────────────────────────────────────────

    #[test]
    fn absent_and_optional_is_none() {
        let result = Lri::new().extract(&HeaderMap::new(), false).unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn absent_and_required_is_428() {
        let err = Lri::new().extract(&HeaderMap::new(), true).unwrap_err();
        let (status, body) = body_text(err).await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
        assert!(body.contains("LCE header required"));
    }

    // ── 4. malformed header ─────────────────────────────────────────────

    #[tokio::test]
    async fn malformed_base64_is_400() {
        let headers = headers_with("LCE", "not-valid-base64!!!");
        let err = Lri::new().extract(&headers, false).unwrap_err();
        let (status, body) = body_text(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Malformed LCE header"));
    }

    // ── 5. invalid JSON ─────────────────────────────────────────────────

    #[test]
    fn invalid_json_is_400() {
        let headers = headers_with("LCE", &encode(b"not json"));
        let err = Lri::new().extract(&headers, false).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    // ── 6. schema violation ─────────────────────────────────────────────

    #[tokio::test]
    async fn invalid_schema_is_422() {
        // Missing policy.
        let headers = headers_with("LCE", &encode(br#"{"v":1,"intent":{"type":"ask"}}"#));
        let err = Lri::new().extract(&headers, false).unwrap_err();
        let (status, body) = body_text(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.contains("Invalid LCE"));
    }

    // ── 7. custom header name ───────────────────────────────────────────

    #[test]
    fn custom_header_name_is_read() {
        let header = encode(br#"{"v":1,"intent":{"type":"tell"},"policy":{"consent":"private"}}"#);
        let lri = Lri::new().with_header_name("X-Custom-LCE");
        let headers = headers_with("X-Custom-LCE", &header);
        let lce = lri.extract(&headers, false).unwrap().unwrap();
        assert_eq!(lce.intent.kind, IntentKind::Tell);
        // The default name is not consulted.
        let wrong = headers_with("LCE", &header);
        assert!(lri.extract(&wrong, false).unwrap().is_none());
    }

    // ── 8. disabled validation still runs the strict parse ──────────────

    #[test]
    fn disabled_validation_still_rejects_ill_formed() {
        let lri = Lri::new().with_validation(false);
        // Missing policy fails the typed parse.
        let headers = headers_with("LCE", &encode(br#"{"v":1,"intent":{"type":"ask"}}"#));
        let err = lri.extract(&headers, false).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        // A well-formed envelope still extracts.
        let ok = headers_with(
            "LCE",
            &encode(br#"{"v":1,"intent":{"type":"ask"},"policy":{"consent":"private"}}"#),
        );
        assert!(lri.extract(&ok, false).unwrap().is_some());
    }

    // ── 9. create_header round-trips through extract ────────────────────

    #[test]
    fn create_header_round_trip() {
        let lce = Lce::new(
            Intent::with_goal(IntentKind::Tell, "Test"),
            Policy::new(Consent::Private),
        );
        let header = create_header(&lce).unwrap();
        assert_eq!(header, create_header(&lce).unwrap());
        let headers = headers_with("LCE", &header);
        let back = Lri::new().extract(&headers, true).unwrap().unwrap();
        assert_eq!(back, lce);
    }
}
