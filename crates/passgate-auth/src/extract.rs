//! Credential extraction from request headers.

use http::{HeaderMap, HeaderName};

use crate::{Error, Result};

const BEARER_SCHEME: &str = "bearer";

/// Strip a case-insensitive `Bearer` scheme and surrounding whitespace.
///
/// Values without a recognized scheme are returned trimmed but otherwise as-is.
/// A bare scheme yields an empty string.
pub fn extract_token(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case(BEARER_SCHEME) => rest.trim(),
        _ if trimmed.eq_ignore_ascii_case(BEARER_SCHEME) => "",
        _ => trimmed,
    }
}

/// Read a token from a single-valued header.
///
/// - header missing or blank: `Ok(None)`
/// - header repeated, not visible ASCII, or a scheme with no token: `Err(MalformedHeader)`
/// - otherwise the extracted token
pub fn header_token<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>> {
    let mut values = headers.get_all(name).iter();
    let Some(value) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(malformed(name, "header repeated"));
    }

    let raw = value
        .to_str()
        .map_err(|_| malformed(name, "value is not visible ASCII"))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let token = extract_token(raw);
    if token.is_empty() {
        return Err(malformed(name, "scheme without token"));
    }
    Ok(Some(token))
}

fn malformed(name: &HeaderName, reason: &'static str) -> Error {
    Error::MalformedHeader {
        header: name.to_string(),
        reason,
    }
}
