//! Basic authentication for webhook calls
//!
//! The bus sends the subscriber UUID as the Basic-auth username; the
//! password is ignored.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use subtle::ConstantTimeEq;

/// Extracts the Basic-auth username from an `Authorization` header value.
///
/// Returns `None` for a missing header, another scheme, invalid base64,
/// non-UTF-8 credentials, or credentials without a `:` separator.
pub fn basic_auth_username(header: Option<&str>) -> Option<String> {
    let encoded = header?.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (username, _password) = credentials.split_once(':')?;
    Some(username.to_string())
}

/// Compares the presented username against the configured secret in
/// constant time (length differences still short-circuit).
pub fn credential_matches(secret: &str, username: &str) -> bool {
    secret.as_bytes().ct_eq(username.as_bytes()).into()
}
