//! Token Codec
//!
//! Reads the payload segment of a bearer token to find its expiry.
//! Signatures are not verified here; the server remains the authority.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{Map, Value};

/// Decode the payload (middle) segment of a token.
///
/// Returns `None` for anything that is not a three-segment token whose
/// payload is base64 encoded JSON object.
pub fn decode(token: &str) -> Option<Map<String, Value>> {
    let mut segments = token.split('.');
    let (_, payload, _) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()?;

    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Expiration instant (`exp`, epoch seconds), if the token carries one.
pub fn expires_at(token: &str) -> Option<i64> {
    let claims = decode(token)?;
    match claims.get("exp")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

/// Fail-closed expiry check against the current clock.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, chrono::Utc::now().timestamp())
}

/// Expiry check against an explicit `now` (epoch seconds).
///
/// Undecodable tokens and tokens without `exp` count as expired.
pub fn is_expired_at(token: &str, now: i64) -> bool {
    match expires_at(token) {
        Some(exp) => exp < now,
        None => true,
    }
}
