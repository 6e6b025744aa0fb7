//! Cookie helpers.

use http::HeaderMap;
use http::header::COOKIE;

/// Find a cookie on the request by name.
///
/// Every `Cookie` header is searched (HTTP/2 clients may split them) and the first
/// match wins. A value wrapped in double quotes is returned without them. Pairs are
/// decoded one at a time, so a pair that is not UTF-8 is skipped without hiding its
/// neighbours.
pub fn request_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .flat_map(|v| v.as_bytes().split(|b| *b == b';'))
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| unquote(v.trim()))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
