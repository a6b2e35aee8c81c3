use base64::Engine;
use base64::alphabet::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::Value;
use time::OffsetDateTime;

use crate::types::Subject;

/// Seconds before `exp` at which a token is already treated as expired.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

// JWT segments are unpadded base64url, but some issuers pad anyway.
const JWT_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims read from an access token payload without verifying the signature.
///
/// Only used to schedule refreshes. The server stays the authority on
/// whether a token is acceptable.
///
/// Claims of an unexpected type are skipped rather than rejecting the whole
/// payload: a numeric `sub` is kept as its decimal text, and `exp` may be any
/// JSON number (RFC 7519 NumericDate allows fractions).
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Claims {
    pub sub: Option<Subject>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: Option<f64>,
}

impl Claims {
    fn from_payload(payload: &serde_json::Map<String, Value>) -> Self {
        let sub = match payload.get("sub") {
            Some(Value::String(s)) => Some(Subject(s.clone())),
            Some(Value::Number(n)) => Some(Subject(n.to_string())),
            _ => None,
        };
        let exp = payload
            .get("exp")
            .and_then(Value::as_f64)
            .filter(|exp| exp.is_finite());
        Self { sub, exp }
    }

    /// Expiry in milliseconds since the Unix epoch.
    #[must_use]
    pub fn expires_at_ms(&self) -> Option<i128> {
        // Float to int casts saturate.
        self.exp.map(|exp| (exp * 1000.0).floor() as i128)
    }
}

/// Decodes the payload segment of a `header.payload.signature` token.
///
/// Returns `None` for anything malformed: wrong segment count, invalid
/// base64url, or a payload that is not a JSON object.
#[must_use]
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let bytes = JWT_SEGMENT.decode(payload).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(payload) => Some(Claims::from_payload(&payload)),
        _ => None,
    }
}

/// Whether `token` should be treated as expired `buffer_secs` from now.
///
/// Undecodable tokens and tokens without `exp` count as expired.
#[must_use]
pub fn is_expired(token: &str, buffer_secs: i64) -> bool {
    is_expired_at(token, buffer_secs, OffsetDateTime::now_utc())
}

/// [`is_expired`] against an explicit clock.
#[must_use]
pub fn is_expired_at(token: &str, buffer_secs: i64, now: OffsetDateTime) -> bool {
    let Some(expires_at_ms) = decode_claims(token).and_then(|claims| claims.expires_at_ms())
    else {
        return true;
    };
    let now_ms = now.unix_timestamp_nanos() / 1_000_000;
    now_ms + i128::from(buffer_secs) * 1000 > expires_at_ms
}
