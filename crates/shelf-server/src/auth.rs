//! Request authentication.
//!
//! During `conan user` the client sends `Authorization: Basic
//! base64(user:password)` and we echo the credential straight back; the
//! client then replays it as a bearer token on every later request. Users
//! who put their GitHub personal access token in the password slot give
//! the registry exactly what it needs to act on their behalf.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use hyper::header::AUTHORIZATION;
use hyper::http::HeaderMap;
use hyper::Uri;
use percent_encoding::percent_decode_str;
use shelf_core::error::{RegistryError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

fn missing() -> RegistryError {
    RegistryError::BadRequest("Missing header: Authorization".into())
}

fn malformed() -> RegistryError {
    RegistryError::BadRequest("Malformed header: Authorization".into())
}

/// Decoded query pairs of a request URI.
pub fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    let Some(query) = uri.query() else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

fn query_credentials(query: &[(String, String)]) -> Option<Credentials> {
    let find = |name: &str| {
        query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };
    let user = find("user")?;
    let token = find("auth")?;
    Some(Credentials { user, token })
}

/// Parses the bearer credential: `base64(user:token)`. A `?user=&auth=`
/// query pair is accepted in place of the header.
pub fn parse_bearer(headers: &HeaderMap, query: &[(String, String)]) -> Result<Credentials> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return query_credentials(query).ok_or_else(missing);
    };
    let value = header.to_str().map_err(|_| malformed())?;
    let encoded = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(malformed)?;
    let decoded = BASE64_STANDARD.decode(encoded).map_err(|_| malformed())?;
    let text = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (user, token) = text.split_once(':').ok_or_else(malformed)?;
    if user.is_empty() || token.is_empty() {
        return Err(malformed());
    }
    Ok(Credentials {
        user: user.to_string(),
        token: token.to_string(),
    })
}

/// Credentials if the request carries any; reads fall back to the
/// server's own token when it does not.
pub fn optional_bearer(headers: &HeaderMap, query: &[(String, String)]) -> Option<Credentials> {
    parse_bearer(headers, query).ok()
}

/// The raw Basic credential, echoed back during `conan user`.
pub fn parse_basic(headers: &HeaderMap) -> Result<String> {
    let header = headers.get(AUTHORIZATION).ok_or_else(missing)?;
    let value = header.to_str().map_err(|_| malformed())?;
    value
        .strip_prefix("Basic ")
        .map(str::trim)
        .filter(|rest| !rest.is_empty())
        .map(String::from)
        .ok_or_else(malformed)
}
